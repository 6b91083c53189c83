//! 内核错误类型与恢复动作
//!
//! 动作级错误（找不到动作、参数校验失败、产物冲突、子智能体失败等）由运行时转成一条
//! 错误内容的结果消息交还给推理引擎；结构性误用（会话未初始化、并发中断、非法审批结果、取消）
//! 必须向宿主传播。与 RecoveryEngine 配合：推理引擎输出异常时决定 RetryWithPrompt 或 Abort。

use thiserror::Error;

use crate::session::SessionError;

/// 内核运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Invalid arguments for {action}: {reason}")]
    ArgumentValidation { action: String, reason: String },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact already exists: {0}. Use edit_file to change it")]
    ArtifactAlreadyExists(String),

    /// edit 的目标子串在产物中出现 0 次
    #[error("String not found in artifact {path}: {target}")]
    EditTargetNotFound { path: String, target: String },

    #[error("Ambiguous edit in {path}: target occurs {occurrences} times, it must be unique")]
    ArtifactAmbiguousEdit { path: String, occurrences: usize },

    #[error("Unknown subagent type: {name}. Allowed types: {allowed}")]
    SubAgentTypeUnknown { name: String, allowed: String },

    #[error("Subagent {name} failed: {reason}")]
    SubAgentRunFailure { name: String, reason: String },

    /// 步数上限耗尽（“需要更多预算”），与逻辑失败区分
    #[error("Loop budget exceeded: ran out of steps after {steps} steps")]
    LoopBudgetExceeded { steps: usize },

    #[error("Multiple concurrent interrupts requested: {0:?}")]
    MultipleConcurrentInterrupts(Vec<String>),

    #[error("Resolution '{kind}' is not allowed for action {action}")]
    InvalidApprovalResolution { action: String, kind: String },

    #[error("Approval channel closed")]
    ApprovalChannelClosed,

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否为结构性误用：这类错误不能被当作普通结果消息吞掉，必须传播到宿主
    pub fn is_structural(&self) -> bool {
        match self {
            AgentError::MultipleConcurrentInterrupts(_)
            | AgentError::InvalidApprovalResolution { .. }
            | AgentError::ApprovalChannelClosed
            | AgentError::Cancelled => true,
            AgentError::Session(e) => e.is_misuse(),
            _ => false,
        }
    }

    /// 参数校验失败的便捷构造
    pub fn invalid_args(action: impl Into<String>, reason: impl ToString) -> Self {
        AgentError::ArgumentValidation {
            action: action.into(),
            reason: reason.to_string(),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让推理引擎重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 终止当前运行并把错误交给宿主
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(AgentError::MultipleConcurrentInterrupts(vec!["a".into(), "b".into()]).is_structural());
        assert!(AgentError::Cancelled.is_structural());
        assert!(AgentError::Session(SessionError::Uninitialized {
            provider: "netbox".into()
        })
        .is_structural());

        assert!(!AgentError::ArtifactNotFound("a.md".into()).is_structural());
        assert!(!AgentError::LoopBudgetExceeded { steps: 5 }.is_structural());
        assert!(!AgentError::SubAgentRunFailure {
            name: "researcher".into(),
            reason: "boom".into()
        }
        .is_structural());
    }

    #[test]
    fn test_budget_message_is_distinct_from_failure() {
        let budget = AgentError::LoopBudgetExceeded { steps: 5 }.to_string();
        assert!(budget.contains("ran out of steps"));
        let failure = AgentError::SubAgentRunFailure {
            name: "x".into(),
            reason: "y".into(),
        }
        .to_string();
        assert!(!failure.contains("ran out of steps"));
    }
}
