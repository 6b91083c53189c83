//! 动作目录：推理引擎可见的唯一契约 {name, 参数 schema, description}
//!
//! 动作按名称解析为封闭的变体：内置动作（任务清单 / 产物存储 / 派发）或注册的外部工具。
//! 一次调用内目录保持不变；子智能体的目录是全局目录去掉 `task` 后与其允许子集的交集。

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::react::dispatch::TaskInput;
use crate::tools::artifacts::{EditFileInput, LsInput, ReadFileInput, WriteFileInput};
use crate::tools::todos::WriteTodosInput;
use crate::tools::{Tool, ToolRegistry};

/// 派发动作名
pub const DISPATCH_ACTION: &str = "task";

/// 内置动作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinAction {
    WriteTodos,
    Ls,
    ReadFile,
    WriteFile,
    EditFile,
    Task,
}

impl BuiltinAction {
    /// 状态类内置动作（不含派发）
    pub const STATE: [BuiltinAction; 5] = [
        BuiltinAction::WriteTodos,
        BuiltinAction::Ls,
        BuiltinAction::ReadFile,
        BuiltinAction::WriteFile,
        BuiltinAction::EditFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinAction::WriteTodos => "write_todos",
            BuiltinAction::Ls => "ls",
            BuiltinAction::ReadFile => "read_file",
            BuiltinAction::WriteFile => "write_file",
            BuiltinAction::EditFile => "edit_file",
            BuiltinAction::Task => DISPATCH_ACTION,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::STATE
            .into_iter()
            .chain(std::iter::once(BuiltinAction::Task))
            .find(|b| b.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            BuiltinAction::WriteTodos => {
                "Replace the whole task list. Each entry has content and status (pending, in_progress, completed). \
                 Keep at most one task in_progress."
            }
            BuiltinAction::Ls => "List the paths of all files in the artifact store.",
            BuiltinAction::ReadFile => {
                "Read a file from the artifact store. Returns numbered lines; use offset and limit to page through long files."
            }
            BuiltinAction::WriteFile => {
                "Create a new file in the artifact store. Fails if the file already exists; use edit_file to change it."
            }
            BuiltinAction::EditFile => {
                "Replace exactly one occurrence of old_string with new_string in a file. \
                 Fails if old_string is missing or occurs more than once."
            }
            BuiltinAction::Task => {
                "Delegate a self-contained task to a subagent with an isolated context. \
                 The subagent only sees the description you pass; it returns one final report."
            }
        }
    }

    pub fn parameters_schema(self) -> Value {
        match self {
            BuiltinAction::WriteTodos => schema_value::<WriteTodosInput>(),
            BuiltinAction::Ls => schema_value::<LsInput>(),
            BuiltinAction::ReadFile => schema_value::<ReadFileInput>(),
            BuiltinAction::WriteFile => schema_value::<WriteFileInput>(),
            BuiltinAction::EditFile => schema_value::<EditFileInput>(),
            BuiltinAction::Task => schema_value::<TaskInput>(),
        }
    }
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

/// 把调用参数解析为强类型输入，失败即 ArgumentValidation
pub fn parse_args<T: DeserializeOwned>(action: &str, args: Value) -> Result<T, AgentError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| AgentError::invalid_args(action, e))
}

/// 名称解析后的动作
#[derive(Clone)]
pub enum ActionKind {
    Builtin(BuiltinAction),
    Tool(Arc<dyn Tool>),
}

impl ActionKind {
    pub fn description(&self) -> &str {
        match self {
            ActionKind::Builtin(b) => b.description(),
            ActionKind::Tool(t) => t.description(),
        }
    }

    pub fn parameters_schema(&self) -> Value {
        match self {
            ActionKind::Builtin(b) => b.parameters_schema(),
            ActionKind::Tool(t) => t.parameters_schema(),
        }
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self, ActionKind::Builtin(BuiltinAction::Task))
    }
}

/// 渲染给推理引擎的动作描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Default)]
pub struct ActionCatalog {
    actions: BTreeMap<String, ActionKind>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全局目录：内置动作（可按白名单筛选，`task` 总是包含）+ 所有注册工具
    pub fn global(builtin_filter: Option<&[String]>, registry: &ToolRegistry) -> Self {
        let mut catalog = Self::new();
        for builtin in BuiltinAction::STATE {
            let allowed = builtin_filter.map_or(true, |names| names.iter().any(|n| n == builtin.name()));
            if allowed {
                catalog.insert_builtin(builtin);
            }
        }
        catalog.insert_builtin(BuiltinAction::Task);
        for (_, tool) in registry.iter() {
            catalog.insert_tool(tool.clone());
        }
        catalog
    }

    pub fn insert_builtin(&mut self, builtin: BuiltinAction) {
        self.actions
            .insert(builtin.name().to_string(), ActionKind::Builtin(builtin));
    }

    /// 注册工具；与内置动作同名时保留内置动作
    pub fn insert_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if BuiltinAction::from_name(&name).is_some() {
            tracing::warn!(tool = %name, "tool name collides with a built-in action, ignored");
            return;
        }
        self.actions.insert(name, ActionKind::Tool(tool));
    }

    pub fn resolve(&self, name: &str) -> Result<&ActionKind, AgentError> {
        self.actions
            .get(name)
            .ok_or_else(|| AgentError::ActionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// 按名称排序
    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 与允许子集求交集；子集中不存在的名称被忽略
    pub fn restrict(&self, allowed: &[String]) -> Self {
        Self {
            actions: self
                .actions
                .iter()
                .filter(|(name, _)| allowed.iter().any(|a| a == *name))
                .map(|(name, kind)| (name.clone(), kind.clone()))
                .collect(),
        }
    }

    /// 只对注册工具应用白名单，内置动作全部保留
    pub fn restrict_tools(&self, allowed: &[String]) -> Self {
        Self {
            actions: self
                .actions
                .iter()
                .filter(|(name, kind)| match kind {
                    ActionKind::Builtin(_) => true,
                    ActionKind::Tool(_) => allowed.iter().any(|a| a == *name),
                })
                .map(|(name, kind)| (name.clone(), kind.clone()))
                .collect(),
        }
    }

    /// 去掉派发动作（子智能体不可再派发）
    pub fn without_dispatch(&self) -> Self {
        Self {
            actions: self
                .actions
                .iter()
                .filter(|(_, kind)| !kind.is_dispatch())
                .map(|(name, kind)| (name.clone(), kind.clone()))
                .collect(),
        }
    }

    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions
            .iter()
            .map(|(name, kind)| ActionDescriptor {
                name: name.clone(),
                description: kind.description().to_string(),
                parameters: kind.parameters_schema(),
            })
            .collect()
    }

    /// 渲染动作目录 JSON，拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.descriptors()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Probe;

    #[async_trait]
    impl Tool for Probe {
        fn name(&self) -> &str {
            "get_devices"
        }

        fn description(&self) -> &str {
            "List devices"
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            Ok("[]".into())
        }
    }

    struct Impostor;

    #[async_trait]
    impl Tool for Impostor {
        fn name(&self) -> &str {
            "ls"
        }

        fn description(&self) -> &str {
            "not the real ls"
        }

        async fn execute(&self, _args: Value) -> Result<String, AgentError> {
            Ok(String::new())
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Probe);
        r
    }

    #[test]
    fn test_global_catalog_contents() {
        let catalog = ActionCatalog::global(None, &registry());
        assert_eq!(
            catalog.names(),
            vec!["edit_file", "get_devices", "ls", "read_file", "task", "write_file", "write_todos"]
        );
    }

    #[test]
    fn test_builtin_filter_keeps_task() {
        let filter = vec!["ls".to_string()];
        let catalog = ActionCatalog::global(Some(&filter), &ToolRegistry::new());
        assert_eq!(catalog.names(), vec!["ls", "task"]);
    }

    #[test]
    fn test_unknown_action() {
        let catalog = ActionCatalog::global(None, &ToolRegistry::new());
        assert!(matches!(
            catalog.resolve("delete_everything"),
            Err(AgentError::ActionNotFound(n)) if n == "delete_everything"
        ));
    }

    #[test]
    fn test_subagent_catalog_never_dispatches() {
        let global = ActionCatalog::global(None, &registry());
        let sub = global
            .without_dispatch()
            .restrict(&["task".to_string(), "read_file".to_string(), "nope".to_string()]);
        assert_eq!(sub.names(), vec!["read_file"]);
        assert!(!global.without_dispatch().contains("task"));
    }

    #[test]
    fn test_restrict_tools_keeps_builtins() {
        let global = ActionCatalog::global(None, &registry());
        let main = global.restrict_tools(&[]);
        assert!(!main.contains("get_devices"));
        assert!(main.contains("task"));
        assert!(main.contains("write_todos"));
    }

    #[test]
    fn test_builtin_name_cannot_be_shadowed() {
        let mut r = ToolRegistry::new();
        r.register(Impostor);
        let catalog = ActionCatalog::global(None, &r);
        assert!(matches!(catalog.resolve("ls"), Ok(ActionKind::Builtin(BuiltinAction::Ls))));
    }

    #[test]
    fn test_schema_json_lists_parameters() {
        let catalog = ActionCatalog::global(None, &ToolRegistry::new());
        let rendered: Value = serde_json::from_str(&catalog.to_schema_json()).unwrap();
        let task = rendered
            .as_array()
            .unwrap()
            .iter()
            .find(|d| d["name"] == "task")
            .unwrap();
        let props = &task["parameters"]["properties"];
        assert!(props.get("description").is_some());
        assert!(props.get("subagent_type").is_some());
    }

    #[test]
    fn test_parse_args_rejects_bad_shape() {
        let err = parse_args::<WriteFileInput>("write_file", serde_json::json!({"file_path": 3})).unwrap_err();
        assert!(matches!(err, AgentError::ArgumentValidation { ref action, .. } if action == "write_file"));
    }
}
