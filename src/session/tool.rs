//! 把 provider 工具包装成 Tool，使其可注册到动作目录

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::manager::SessionManager;
use super::types::ToolDefinition;
use crate::core::AgentError;
use crate::tools::Tool;

pub struct ExternalTool {
    manager: Arc<SessionManager>,
    provider: String,
    definition: ToolDefinition,
}

impl ExternalTool {
    pub fn new(manager: Arc<SessionManager>, provider: &str, definition: ToolDefinition) -> Self {
        Self {
            manager,
            provider: provider.to_string(),
            definition,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

#[async_trait]
impl Tool for ExternalTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn parameters_schema(&self) -> Value {
        if self.definition.input_schema.is_object() {
            self.definition.input_schema.clone()
        } else {
            serde_json::json!({"type": "object", "properties": {}})
        }
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        let response = self
            .manager
            .call(&self.provider, &self.definition.name, args)
            .await?;
        let is_error = response.is_error;
        let rendered = response.into_value().to_string();
        if is_error {
            return Err(AgentError::ToolExecutionFailed(rendered));
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake;
    use serde_json::json;

    #[tokio::test]
    async fn test_external_tool_round_trip() {
        let manager = Arc::new(SessionManager::new(vec![]));
        manager.attach(fake::session("fake")).await;
        let tools = manager.discover("fake").await.unwrap();
        let echo = tools.iter().find(|t| t.name() == "echo").unwrap();
        assert_eq!(echo.provider(), "fake");
        assert_eq!(echo.parameters_schema()["type"], "object");

        let out = echo.execute(json!({"device": "r1"})).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({"device": "r1"}));
    }

    #[tokio::test]
    async fn test_provider_error_is_action_level() {
        let manager = Arc::new(SessionManager::new(vec![]));
        manager.attach(fake::session("fake")).await;
        let tool = ExternalTool::new(
            manager,
            "fake",
            ToolDefinition {
                name: "missing".into(),
                description: String::new(),
                input_schema: Value::Null,
            },
        );
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(!err.is_structural());
    }
}
