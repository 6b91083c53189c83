//! 人工审批闸门
//!
//! 对配置为受保护的动作，在执行前挂起整个循环：把 {action_name, arguments, allowed_resolutions}
//! 交给宿主，等待恰好一个决定：Accept（原样执行）、Edit（执行修改后的调用）、Respond（跳过执行，
//! 把文本作为结果写回）。不支持 ignore。
//!
//! 任意时刻最多一个 PendingInterrupt。同一步请求两个受保护调用是致命的
//! MultipleConcurrentInterrupts；来自不同分支（并发子智能体）的审批请求排队，
//! 前一个决定完成后才会交给宿主。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::core::AgentError;
use crate::memory::ActionCall;

fn default_allow() -> bool {
    true
}

/// 单个受保护动作允许的决定类型（对应配置 [approval.<action>]）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptConfig {
    #[serde(default = "default_allow")]
    pub allow_accept: bool,
    #[serde(default = "default_allow")]
    pub allow_edit: bool,
    #[serde(default = "default_allow")]
    pub allow_respond: bool,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            allow_accept: true,
            allow_edit: true,
            allow_respond: true,
        }
    }
}

impl InterruptConfig {
    pub fn permits(&self, kind: ResolutionKind) -> bool {
        match kind {
            ResolutionKind::Accept => self.allow_accept,
            ResolutionKind::Edit => self.allow_edit,
            ResolutionKind::Respond => self.allow_respond,
        }
    }

    pub fn allowed(&self) -> Vec<ResolutionKind> {
        [ResolutionKind::Accept, ResolutionKind::Edit, ResolutionKind::Respond]
            .into_iter()
            .filter(|k| self.permits(*k))
            .collect()
    }
}

/// 决定类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Accept,
    Edit,
    Respond,
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionKind::Accept => "accept",
            ResolutionKind::Edit => "edit",
            ResolutionKind::Respond => "respond",
        };
        f.write_str(s)
    }
}

/// 发给宿主的审批请求
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: String,
    /// 被拦截调用的 id
    pub call_id: String,
    pub action_name: String,
    pub arguments: Value,
    pub allowed_resolutions: Vec<ResolutionKind>,
    pub requested_at: DateTime<Utc>,
}

/// 宿主的回复：`{"kind": "accept" | "edit" | "respond", "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ApprovalResponse {
    Accept,
    Edit { action_name: String, arguments: Value },
    Respond(String),
}

impl ApprovalResponse {
    pub fn kind(&self) -> ResolutionKind {
        match self {
            ApprovalResponse::Accept => ResolutionKind::Accept,
            ApprovalResponse::Edit { .. } => ResolutionKind::Edit,
            ApprovalResponse::Respond(_) => ResolutionKind::Respond,
        }
    }
}

/// 宿主侧审批通道
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// 挂起直到宿主给出恰好一个决定
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalResponse, AgentError>;
}

/// 等待宿主决定的中断；宿主调用 resolve 恢复循环，直接丢弃则运行以 ApprovalChannelClosed 失败
#[derive(Debug)]
pub struct PendingInterrupt {
    pub request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalResponse>,
}

impl PendingInterrupt {
    pub fn resolve(self, response: ApprovalResponse) -> Result<(), AgentError> {
        self.responder
            .send(response)
            .map_err(|_| AgentError::ApprovalChannelClosed)
    }

    pub fn accept(self) -> Result<(), AgentError> {
        self.resolve(ApprovalResponse::Accept)
    }

    pub fn edit(self, action_name: impl Into<String>, arguments: Value) -> Result<(), AgentError> {
        self.resolve(ApprovalResponse::Edit {
            action_name: action_name.into(),
            arguments,
        })
    }

    pub fn respond(self, text: impl Into<String>) -> Result<(), AgentError> {
        self.resolve(ApprovalResponse::Respond(text.into()))
    }
}

/// 基于 mpsc + oneshot 的审批通道：宿主从接收端逐个取出 PendingInterrupt 并作答
pub struct QueuedApprovalChannel {
    tx: mpsc::UnboundedSender<PendingInterrupt>,
}

impl QueuedApprovalChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingInterrupt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalChannel for QueuedApprovalChannel {
    async fn request(&self, request: ApprovalRequest) -> Result<ApprovalResponse, AgentError> {
        let (responder, rx) = oneshot::channel();
        self.tx
            .send(PendingInterrupt { request, responder })
            .map_err(|_| AgentError::ApprovalChannelClosed)?;
        rx.await.map_err(|_| AgentError::ApprovalChannelClosed)
    }
}

/// 审批后的处理方式
#[derive(Debug, Clone, PartialEq)]
pub enum Review {
    /// 执行（原调用或修改后的调用）
    Run(ActionCall),
    /// 跳过执行，以文本作为结果
    Respond(String),
}

/// 审批闸门：持有受保护动作配置与宿主通道
pub struct ApprovalGate {
    configs: HashMap<String, InterruptConfig>,
    channel: Option<Arc<dyn ApprovalChannel>>,
    /// 唯一的挂起槽位，持有期间其他分支的审批排队等待
    outstanding: Mutex<()>,
}

impl ApprovalGate {
    pub fn new(
        configs: HashMap<String, InterruptConfig>,
        channel: Option<Arc<dyn ApprovalChannel>>,
    ) -> Self {
        Self {
            configs,
            channel,
            outstanding: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(HashMap::new(), None)
    }

    pub fn is_guarded(&self, action: &str) -> bool {
        self.configs.contains_key(action)
    }

    pub fn allowed_for(&self, action: &str) -> Vec<ResolutionKind> {
        self.configs
            .get(action)
            .map(InterruptConfig::allowed)
            .unwrap_or_default()
    }

    pub fn guarded_actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// 一步内最多一个受保护调用
    pub fn check_step(&self, calls: &[ActionCall]) -> Result<(), AgentError> {
        let guarded: Vec<String> = calls
            .iter()
            .filter(|c| self.is_guarded(&c.tool))
            .map(|c| c.tool.clone())
            .collect();
        if guarded.len() > 1 {
            return Err(AgentError::MultipleConcurrentInterrupts(guarded));
        }
        Ok(())
    }

    /// 非受保护调用直接放行；受保护调用挂起等待宿主决定并校验决定类型
    pub async fn review(&self, call: &ActionCall) -> Result<Review, AgentError> {
        let Some(config) = self.configs.get(&call.tool) else {
            return Ok(Review::Run(call.clone()));
        };
        let channel = self.channel.as_ref().ok_or(AgentError::ApprovalChannelClosed)?;

        let _slot = match self.outstanding.try_lock() {
            Ok(slot) => slot,
            Err(_) => {
                tracing::info!(action = %call.tool, call_id = %call.id, "approval queued behind outstanding interrupt");
                self.outstanding.lock().await
            }
        };

        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call.id.clone(),
            action_name: call.tool.clone(),
            arguments: call.args.clone(),
            allowed_resolutions: config.allowed(),
            requested_at: Utc::now(),
        };
        tracing::info!(action = %call.tool, call_id = %call.id, "awaiting human approval");
        let response = channel.request(request).await?;

        let kind = response.kind();
        if !config.permits(kind) {
            tracing::warn!(action = %call.tool, %kind, "rejected disallowed resolution");
            return Err(AgentError::InvalidApprovalResolution {
                action: call.tool.clone(),
                kind: kind.to_string(),
            });
        }
        tracing::info!(action = %call.tool, %kind, "approval resolved");

        Ok(match response {
            ApprovalResponse::Accept => Review::Run(call.clone()),
            ApprovalResponse::Edit {
                action_name,
                arguments,
            } => Review::Run(ActionCall {
                id: call.id.clone(),
                tool: action_name,
                args: arguments,
            }),
            ApprovalResponse::Respond(text) => Review::Respond(text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// 固定回复的审批通道
    struct FixedChannel(ApprovalResponse);

    #[async_trait]
    impl ApprovalChannel for FixedChannel {
        async fn request(&self, _request: ApprovalRequest) -> Result<ApprovalResponse, AgentError> {
            Ok(self.0.clone())
        }
    }

    fn gate(config: InterruptConfig, response: ApprovalResponse) -> ApprovalGate {
        let mut configs = HashMap::new();
        configs.insert("write_file".to_string(), config);
        ApprovalGate::new(configs, Some(Arc::new(FixedChannel(response))))
    }

    fn respond_only() -> InterruptConfig {
        InterruptConfig {
            allow_accept: false,
            allow_edit: false,
            allow_respond: true,
        }
    }

    #[tokio::test]
    async fn test_unguarded_passes_through() {
        let g = gate(InterruptConfig::default(), ApprovalResponse::Accept);
        let call = ActionCall::new("ls", json!({}));
        assert_eq!(g.review(&call).await.unwrap(), Review::Run(call));
    }

    #[tokio::test]
    async fn test_edit_rejected_when_only_respond_allowed() {
        let g = gate(
            respond_only(),
            ApprovalResponse::Edit {
                action_name: "write_file".into(),
                arguments: json!({"file_path": "x", "content": "y"}),
            },
        );
        let call = ActionCall::new("write_file", json!({"file_path": "a", "content": "b"}));
        let err = g.review(&call).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidApprovalResolution { ref kind, .. } if kind == "edit"));
        // 槽位已释放
        assert!(g.outstanding.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_respond_skips_execution() {
        let g = gate(respond_only(), ApprovalResponse::Respond("not today".into()));
        let call = ActionCall::new("write_file", json!({}));
        assert_eq!(g.review(&call).await.unwrap(), Review::Respond("not today".into()));
    }

    #[tokio::test]
    async fn test_edit_keeps_call_id() {
        let g = gate(
            InterruptConfig::default(),
            ApprovalResponse::Edit {
                action_name: "write_file".into(),
                arguments: json!({"file_path": "safe.md", "content": "ok"}),
            },
        );
        let call = ActionCall::new("write_file", json!({"file_path": "a.md", "content": "b"}));
        match g.review(&call).await.unwrap() {
            Review::Run(edited) => {
                assert_eq!(edited.id, call.id);
                assert_eq!(edited.args["file_path"], "safe.md");
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn test_two_guarded_calls_in_one_step_is_fatal() {
        let g = gate(InterruptConfig::default(), ApprovalResponse::Accept);
        let calls = vec![
            ActionCall::new("write_file", json!({})),
            ActionCall::new("ls", json!({})),
            ActionCall::new("write_file", json!({})),
        ];
        let err = g.check_step(&calls).unwrap_err();
        assert!(matches!(err, AgentError::MultipleConcurrentInterrupts(ref names) if names.len() == 2));
        assert!(g.check_step(&calls[..2]).is_ok());
    }

    #[tokio::test]
    async fn test_second_interrupt_waits_for_the_first() {
        let (channel, mut rx) = QueuedApprovalChannel::new();
        let mut configs = HashMap::new();
        configs.insert("write_file".to_string(), InterruptConfig::default());
        let g = Arc::new(ApprovalGate::new(configs, Some(Arc::new(channel))));

        let review = |path: &'static str| {
            let g = g.clone();
            tokio::spawn(async move {
                g.review(&ActionCall::new("write_file", json!({"file_path": path}))).await
            })
        };
        let first = review("a.md");
        let pending = rx.recv().await.unwrap();
        assert_eq!(pending.request.arguments["file_path"], "a.md");

        let second = review("b.md");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // 第一个决定之前，第二个请求不会到达宿主
        assert!(rx.try_recv().is_err());
        assert!(!second.is_finished());

        pending.accept().unwrap();
        assert!(matches!(first.await.unwrap(), Ok(Review::Run(_))));

        let pending = rx.recv().await.unwrap();
        assert_eq!(pending.request.arguments["file_path"], "b.md");
        pending.respond("skip").unwrap();
        assert_eq!(second.await.unwrap().unwrap(), Review::Respond("skip".into()));
    }

    #[tokio::test]
    async fn test_dropped_interrupt_closes_channel() {
        let (channel, mut rx) = QueuedApprovalChannel::new();
        let handle = tokio::spawn(async move {
            channel
                .request(ApprovalRequest {
                    id: "1".into(),
                    call_id: "call_1".into(),
                    action_name: "write_file".into(),
                    arguments: json!({}),
                    allowed_resolutions: vec![ResolutionKind::Accept],
                    requested_at: Utc::now(),
                })
                .await
        });
        drop(rx.recv().await.unwrap());
        assert!(matches!(handle.await.unwrap(), Err(AgentError::ApprovalChannelClosed)));
    }

    #[test]
    fn test_response_wire_format() {
        let edit: ApprovalResponse = serde_json::from_value(json!({
            "kind": "edit",
            "payload": {"action_name": "write_file", "arguments": {"file_path": "a"}}
        }))
        .unwrap();
        assert_eq!(edit.kind(), ResolutionKind::Edit);

        let accept: ApprovalResponse = serde_json::from_value(json!({"kind": "accept"})).unwrap();
        assert_eq!(accept, ApprovalResponse::Accept);

        let respond = serde_json::to_value(ApprovalResponse::Respond("no".into())).unwrap();
        assert_eq!(respond, json!({"kind": "respond", "payload": "no"}));
    }

    #[test]
    fn test_allowed_resolutions() {
        assert_eq!(respond_only().allowed(), vec![ResolutionKind::Respond]);
        assert_eq!(InterruptConfig::default().allowed().len(), 3);
    }
}
