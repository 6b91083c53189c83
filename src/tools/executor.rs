//! 动作执行器
//!
//! 内置动作基于快照同步执行；注册工具在超时内调用，超时转为 ToolTimeout。
//! 每次执行输出一条结构化审计日志（JSON）。派发动作由运行时负责，只借用这里的审计。

use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::state::{ActionOutcome, StateSnapshot};
use crate::core::AgentError;
use crate::tools::catalog::{ActionKind, BuiltinAction};
use crate::tools::{artifacts, todos};

pub struct ToolExecutor {
    timeout: Duration,
    enforce_single_in_progress: bool,
}

impl ToolExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            enforce_single_in_progress: false,
        }
    }

    pub fn with_single_in_progress(mut self, enforce: bool) -> Self {
        self.enforce_single_in_progress = enforce;
        self
    }

    /// 执行非派发动作
    pub async fn execute(
        &self,
        name: &str,
        kind: &ActionKind,
        args: Value,
        snapshot: &StateSnapshot,
    ) -> Result<ActionOutcome, AgentError> {
        let preview = args_preview(&args);
        match kind {
            ActionKind::Builtin(builtin) => {
                let result = self.run_builtin(*builtin, args, snapshot);
                self.audited(name, preview, async { result }).await
            }
            ActionKind::Tool(tool) => {
                let fut = async {
                    match timeout(self.timeout, tool.execute(args)).await {
                        Ok(result) => result.map(ActionOutcome::text),
                        Err(_) => Err(AgentError::ToolTimeout(name.to_string())),
                    }
                };
                self.audited(name, preview, fut).await
            }
        }
    }

    fn run_builtin(
        &self,
        builtin: BuiltinAction,
        args: Value,
        snapshot: &StateSnapshot,
    ) -> Result<ActionOutcome, AgentError> {
        match builtin {
            BuiltinAction::WriteTodos => todos::write_todos(args, self.enforce_single_in_progress),
            BuiltinAction::Ls => Ok(artifacts::ls(snapshot)),
            BuiltinAction::ReadFile => artifacts::read_file(args, snapshot),
            BuiltinAction::WriteFile => artifacts::write_file(args, snapshot),
            BuiltinAction::EditFile => artifacts::edit_file(args, snapshot),
            BuiltinAction::Task => Err(AgentError::ToolExecutionFailed(
                "task must be dispatched by the runtime".to_string(),
            )),
        }
    }

    /// 运行一个动作 future 并输出 JSON 审计日志
    pub async fn audited<F>(&self, name: &str, args_preview: String, fut: F) -> Result<ActionOutcome, AgentError>
    where
        F: Future<Output = Result<ActionOutcome, AgentError>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }
}

pub fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_builtin_write_returns_delta() {
        let executor = ToolExecutor::new(1);
        let out = executor
            .execute(
                "write_file",
                &ActionKind::Builtin(BuiltinAction::WriteFile),
                json!({"file_path": "a.md", "content": "x"}),
                &StateSnapshot::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.delta.artifacts.get("a.md").map(String::as_str), Some("x"));
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let executor = ToolExecutor {
            timeout: Duration::from_millis(20),
            enforce_single_in_progress: false,
        };
        let err = executor
            .execute("sleepy", &ActionKind::Tool(Arc::new(Sleepy)), json!({}), &StateSnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(n) if n == "sleepy"));
    }

    #[tokio::test]
    async fn test_task_is_not_executed_here() {
        let executor = ToolExecutor::new(1);
        let err = executor
            .execute(
                "task",
                &ActionKind::Builtin(BuiltinAction::Task),
                json!({}),
                &StateSnapshot::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(_)));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({"content": "z".repeat(500)});
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
    }
}
