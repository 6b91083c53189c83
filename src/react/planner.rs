//! Planner：调用推理引擎并解析动作调用
//!
//! parse_llm_output 从文本中提取 JSON（```json 块，或首个 '{' 到最后一个 '}'）：
//! - `{"tool": name, "args": {...}}` → 一个调用
//! - `{"tool_calls": [{"tool": ..., "args": ...}, ...]}` → 同一步发起多个调用，按数组顺序
//! - 不含 JSON 对象 → 最终答案
//! - 含 `"tool"` 的 JSON 非法 → JsonParseError，由 RecoveryEngine 注入纠正提示
//! - 其他带花括号但不是 JSON 的文本 → 最终答案

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{ActionCall, Message};

#[derive(Debug, Deserialize)]
struct RawCall {
    #[serde(default)]
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    tool_calls: Vec<RawCall>,
}

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 最终答案
    Response(String),
    /// 本步发起的调用，按发起顺序
    Actions(Vec<ActionCall>),
}

fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 只有带 "tool" 键的片段才算动作请求
fn looks_like_call(json_str: &str) -> bool {
    json_str.contains("\"tool\"") || json_str.contains("\"tool_calls\"")
}

fn into_call(raw: RawCall) -> ActionCall {
    let args = if raw.args.is_null() {
        Value::Object(Default::default())
    } else {
        raw.args
    };
    ActionCall::new(raw.tool, args)
}

pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    let value: Value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(e) if looks_like_call(json_str) => {
            return Err(AgentError::JsonParseError(format!("{e}: {json_str}")));
        }
        Err(_) => return Ok(PlannerOutput::Response(trimmed.to_string())),
    };

    if value.get("tool_calls").is_some() {
        let batch: RawBatch = serde_json::from_value(value)
            .map_err(|e| AgentError::JsonParseError(format!("{e}: {json_str}")))?;
        let calls: Vec<ActionCall> = batch
            .tool_calls
            .into_iter()
            .filter(|c| !c.tool.is_empty())
            .map(into_call)
            .collect();
        if calls.is_empty() {
            return Ok(PlannerOutput::Response(trimmed.to_string()));
        }
        return Ok(PlannerOutput::Actions(calls));
    }

    let single: RawCall = serde_json::from_value(value)
        .map_err(|e| AgentError::JsonParseError(format!("{e}: {json_str}")))?;
    if single.tool.is_empty() {
        Ok(PlannerOutput::Response(trimmed.to_string()))
    } else {
        Ok(PlannerOutput::Actions(vec![into_call(single)]))
    }
}

/// Planner：持有推理引擎，plan_with_system 拼 system + messages 后调用
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan_with_system(&self, messages: &[Message], system: &str) -> Result<String, AgentError> {
        let mut full_messages = Vec::with_capacity(messages.len() + 1);
        full_messages.push(Message::system(system));
        full_messages.extend_from_slice(messages);
        self.llm
            .complete(&full_messages)
            .await
            .map_err(AgentError::LlmError)
    }
}
