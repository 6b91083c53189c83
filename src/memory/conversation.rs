//! 对话记录（Transcript）
//!
//! 单次循环调用的只追加消息序列：user / assistant（可携带结构化动作调用）/ tool（动作结果）。
//! 跨隔离边界时从不合并 Transcript，子智能体只把一条汇总结果消息交还给调用方。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    /// 动作执行结果
    Tool,
}

/// 推理引擎请求的一次动作调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ActionCall {
    /// 生成带唯一 id 的调用
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            tool: tool.into(),
            args,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ActionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// 携带一组动作调用的 assistant 消息
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ActionCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// 某次动作调用的结果消息
    pub fn tool_result(call: &ActionCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.tool.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// 只追加的对话记录
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 发送给推理引擎的窗口：保留最近 max_messages 条，且窗口从一条 user 消息开始，
    /// 避免把动作结果与其调用拆开。max_messages 为 0 表示不裁剪；存储的记录本身不变。
    ///
    /// 最近的消息里没有 user 消息时（单一任务的长运行），固定保留第一条 user 消息（任务描述），
    /// 其后接从 assistant 调用开始的最近消息。
    pub fn window(&self, max_messages: usize) -> Vec<Message> {
        if max_messages == 0 || self.messages.len() <= max_messages {
            return self.messages.clone();
        }
        let tail = self.messages.len() - max_messages;
        if let Some(offset) = self.messages[tail..].iter().position(|m| m.role == Role::User) {
            return self.messages[tail + offset..].to_vec();
        }
        let Some(task) = self.messages.iter().position(|m| m.role == Role::User) else {
            return self.messages[tail..].to_vec();
        };

        let rest = tail + 1;
        let rest = self.messages[rest..]
            .iter()
            .position(|m| m.role == Role::Assistant)
            .map_or(self.messages.len(), |offset| rest + offset);
        let mut window = Vec::with_capacity(1 + self.messages.len() - rest);
        window.push(self.messages[task].clone());
        window.extend_from_slice(&self.messages[rest..]);
        window
    }

    /// 最近一条非空的 assistant / tool 内容，用于步数耗尽时的“部分进展”
    pub fn last_progress(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::Tool | Role::Assistant) && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
    }
}

impl FromIterator<Message> for Transcript {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}
