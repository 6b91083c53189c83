//! 运行时过程事件：供宿主展示步数、动作调用、观察、审批中断与子智能体进度

use serde::Serialize;

use crate::core::approval::ResolutionKind;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// agent 为 "main" 或子智能体名
    StepUpdate {
        agent: String,
        step: usize,
        max_steps: usize,
    },
    ToolCall {
        agent: String,
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 动作结果预览
    Observation {
        agent: String,
        call_id: String,
        tool: String,
        preview: String,
    },
    /// 受保护动作等待宿主决定
    Interrupt {
        tool: String,
        allowed: Vec<ResolutionKind>,
    },
    Recovery { agent: String, detail: String },
    SubAgentStarted { name: String, description: String },
    SubAgentFinished { name: String, ok: bool },
    BudgetExceeded { agent: String, steps: usize },
    Final { agent: String, text: String },
}
