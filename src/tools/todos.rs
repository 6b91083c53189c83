//! 任务清单内置动作：write_todos 整体替换清单

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::state::{ActionOutcome, StateDelta, Todo, TodoStatus};
use crate::core::AgentError;
use crate::tools::catalog::parse_args;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteTodosInput {
    /// 新的完整任务清单
    pub todos: Vec<Todo>,
}

/// 用新清单替换整个任务清单。enforce_single_in_progress 为 true 时拒绝多个 in_progress
pub fn write_todos(args: Value, enforce_single_in_progress: bool) -> Result<ActionOutcome, AgentError> {
    let input: WriteTodosInput = parse_args("write_todos", args)?;

    if enforce_single_in_progress {
        let active = input
            .todos
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .count();
        if active > 1 {
            return Err(AgentError::invalid_args(
                "write_todos",
                format!("{active} tasks are in_progress, at most one is allowed"),
            ));
        }
    }

    let rendered = serde_json::to_string(&input.todos).unwrap_or_default();
    Ok(ActionOutcome::with_delta(
        format!("Updated todo list to {rendered}"),
        StateDelta::replace_todos(input.todos),
    ))
}
