//! 错误恢复引擎
//!
//! 推理引擎的输出无法解析时返回 RetryWithPrompt（注入纠正提示后继续下一步）；
//! 其余推理层错误一律 Abort，交给宿主处理。动作级错误不经过这里，它们直接变成结果消息。

use crate::core::{AgentError, RecoveryAction};

/// 将推理层错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output contained malformed JSON: {raw}. \
                When calling actions you must output exactly one JSON object and nothing else. \
                Use {{\"tool\": \"<name>\", \"args\": {{...}}}} for one action or \
                {{\"tool_calls\": [{{\"tool\": \"<name>\", \"args\": {{...}}}}]}} for several. \
                Reply with plain text only when you are giving the final answer."
            )),
            _ => RecoveryAction::Abort,
        }
    }
}
