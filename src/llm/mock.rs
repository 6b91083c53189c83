//! Mock 推理引擎（用于测试，无需 API）
//!
//! 两种模式：按脚本依次返回预设回复；或由闭包根据当前消息决定回复（闭包也可以返回错误，
//! 模拟推理引擎故障）。脚本耗尽后返回一条纯文本最终答案。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

type Responder = Box<dyn Fn(&[Message]) -> Result<String, String> + Send + Sync>;

enum Mode {
    Scripted(Mutex<VecDeque<String>>),
    Function(Responder),
}

pub struct MockLlmClient {
    mode: Mode,
}

impl MockLlmClient {
    /// 依次返回给定回复
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: Mode::Scripted(Mutex::new(replies.into_iter().map(Into::into).collect())),
        }
    }

    /// 根据收到的消息计算回复
    pub fn from_fn(f: impl Fn(&[Message]) -> String + Send + Sync + 'static) -> Self {
        Self::from_result_fn(move |messages| Ok(f(messages)))
    }

    /// 同 from_fn，但闭包可以返回 Err
    pub fn from_result_fn(f: impl Fn(&[Message]) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            mode: Mode::Function(Box::new(f)),
        }
    }
}

impl Default for MockLlmClient {
    /// 回显最后一条用户消息作为最终答案
    fn default() -> Self {
        Self::from_fn(|messages| {
            let last_user = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or("(no input)");
            format!("Echo from Mock: {last_user}")
        })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        match &self.mode {
            Mode::Scripted(queue) => {
                let mut queue = queue.lock().map_err(|e| e.to_string())?;
                Ok(queue.pop_front().unwrap_or_else(|| "Done.".to_string()))
            }
            Mode::Function(f) => f(messages),
        }
    }
}
