//! 外部工具会话：一个子进程 + 一条 JSON-RPC 通道
//!
//! 约束：
//! - initialize 握手完成前任何调用都返回 Uninitialized
//! - 同一时刻只有一个在途调用，其余调用在 Mutex 上排队
//! - close 先关闭 stdin 让 provider 自行退出，超时后强杀；子进程带 kill_on_drop，
//!   会话对象被丢弃时也不会泄漏进程

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::error::SessionError;
use super::transport::{BoxedReader, BoxedWriter, LineTransport};
use super::types::{initialize_params, CallToolResult, ListToolsResult, ToolDefinition, ToolResponse};
use crate::config::ProviderConfig;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct ExternalSession {
    provider: String,
    transport: Mutex<Option<LineTransport>>,
    child: Mutex<Option<Child>>,
    initialized: AtomicBool,
    call_timeout: Duration,
    init_timeout: Duration,
    shutdown_grace: Duration,
}

impl ExternalSession {
    /// 启动 provider 子进程（stdin/stdout 管道，stderr 继承），不做握手
    pub fn spawn(config: &ProviderConfig) -> Result<Self, SessionError> {
        let spawn_err = |reason: String| SessionError::Spawn {
            provider: config.name.clone(),
            reason,
        };

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_err(format!("{}: {e}", config.command)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".into()))?;

        tracing::info!(provider = %config.name, pid = ?child.id(), "provider process started");

        let mut session = Self::from_streams(&config.name, Box::new(stdin), Box::new(stdout))
            .with_timeouts(
                Duration::from_secs(config.call_timeout_secs),
                Duration::from_secs(config.init_timeout_secs),
            );
        session.child = Mutex::new(Some(child));
        Ok(session)
    }

    /// 基于任意读写流构造会话（无子进程）
    pub fn from_streams(provider: &str, writer: BoxedWriter, reader: BoxedReader) -> Self {
        Self {
            provider: provider.to_string(),
            transport: Mutex::new(Some(LineTransport::new(provider, writer, reader))),
            child: Mutex::new(None),
            initialized: AtomicBool::new(false),
            call_timeout: DEFAULT_TIMEOUT,
            init_timeout: DEFAULT_TIMEOUT,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    pub fn with_timeouts(mut self, call: Duration, init: Duration) -> Self {
        self.call_timeout = call;
        self.init_timeout = init;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// 握手：initialize 请求 + notifications/initialized 通知。重复调用无副作用
    pub async fn initialize(&self) -> Result<(), SessionError> {
        if self.is_initialized() {
            return Ok(());
        }
        let mut guard = self.transport.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        let transport = guard.as_mut().ok_or_else(|| self.closed())?;

        let init_failed = |reason: String| SessionError::InitFailed {
            provider: self.provider.clone(),
            reason,
        };
        let result = tokio::time::timeout(
            self.init_timeout,
            transport.request("initialize", Some(initialize_params(env!("CARGO_PKG_NAME")))),
        )
        .await
        .map_err(|_| init_failed(format!("timed out after {}s", self.init_timeout.as_secs())))?
        .map_err(|e| init_failed(e.to_string()))?;

        transport
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| init_failed(e.to_string()))?;

        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            provider = %self.provider,
            server = %result.get("serverInfo").cloned().unwrap_or(serde_json::Value::Null),
            "session initialized"
        );
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, SessionError> {
        let result = self.request("tools/list", None, "tools/list").await?;
        let listed: ListToolsResult = serde_json::from_value(result).map_err(|e| SessionError::Server {
            code: -32603,
            message: format!("malformed tools/list result: {e}"),
        })?;
        Ok(listed.tools)
    }

    /// 调用一个 provider 工具；内容片段按顺序聚合
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<ToolResponse, SessionError> {
        let params = json!({ "name": tool, "arguments": arguments });
        let result = self.request("tools/call", Some(params), tool).await?;
        let parsed: CallToolResult = serde_json::from_value(result).map_err(|e| SessionError::Server {
            code: -32603,
            message: format!("malformed tools/call result: {e}"),
        })?;
        Ok(ToolResponse::from_result(parsed))
    }

    async fn request(&self, method: &str, params: Option<Value>, label: &str) -> Result<Value, SessionError> {
        if !self.is_initialized() {
            return Err(SessionError::Uninitialized {
                provider: self.provider.clone(),
            });
        }
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or_else(|| self.closed())?;
        tokio::time::timeout(self.call_timeout, transport.request(method, params))
            .await
            .map_err(|_| SessionError::Timeout {
                provider: self.provider.clone(),
                tool: label.to_string(),
                secs: self.call_timeout.as_secs(),
            })?
    }

    fn closed(&self) -> SessionError {
        SessionError::Closed {
            provider: self.provider.clone(),
        }
    }

    /// 关闭通道并终止子进程；返回子进程退出状态（无子进程时为 None）
    pub async fn close(&self) -> Option<ExitStatus> {
        // 丢弃传输即关闭 stdin
        self.transport.lock().await.take();
        self.initialized.store(false, Ordering::SeqCst);

        let mut child = self.child.lock().await.take()?;
        let status = match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(provider = %self.provider, "wait failed: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(provider = %self.provider, "provider did not exit, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(provider = %self.provider, "kill failed: {}", e);
                }
                child.wait().await.ok()
            }
        };
        tracing::info!(provider = %self.provider, ?status, "session closed");
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake;

    #[tokio::test]
    async fn test_call_before_initialize_fails() {
        let session = fake::session("fake");
        let err = session.call("echo", json!({"x": 1})).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Uninitialized {
                provider: "fake".into()
            }
        );
        assert!(err.is_misuse());
    }

    #[tokio::test]
    async fn test_call_after_initialize_succeeds() {
        let session = fake::session("fake");
        session.initialize().await.unwrap();
        session.initialize().await.unwrap();
        assert!(session.is_initialized());

        let response = session.call("echo", json!({"site": "lab"})).await.unwrap();
        assert_eq!(response.into_value(), json!({"site": "lab"}));
    }

    #[tokio::test]
    async fn test_multi_part_response_is_not_truncated() {
        let session = fake::session("fake");
        session.initialize().await.unwrap();
        let response = session
            .call("split", json!({"parts": ["{\"a\":1}", "{\"b\":2}", "oops"]}))
            .await
            .unwrap();
        assert_eq!(response.parts.len(), 3);
        assert_eq!(response.parts[1]["b"], 2);
        assert_eq!(response.parts[2]["error"], "Invalid JSON response: oops");
    }

    #[tokio::test]
    async fn test_list_tools() {
        let session = fake::session("fake");
        session.initialize().await.unwrap();
        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "split"]);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized() {
        let session = std::sync::Arc::new(fake::session("fake"));
        session.initialize().await.unwrap();
        let a = {
            let s = session.clone();
            tokio::spawn(async move { s.call("slow", json!({"ms": 50})).await })
        };
        let b = {
            let s = session.clone();
            tokio::spawn(async move { s.call("echo", json!({"n": 2})).await })
        };
        assert_eq!(a.await.unwrap().unwrap().into_value(), json!({"done": true}));
        assert_eq!(b.await.unwrap().unwrap().into_value(), json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_crash_mid_call_is_fatal_and_close_is_clean() {
        let session = fake::session("fake");
        session.initialize().await.unwrap();
        let err = session.call("crash", json!({})).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(session.close().await.is_none());
        assert!(matches!(
            session.call("echo", json!({})).await,
            Err(SessionError::Uninitialized { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let session = fake::session("fake").with_timeouts(Duration::from_millis(20), DEFAULT_TIMEOUT);
        session.initialize().await.unwrap();
        let err = session.call("slow", json!({"ms": 500})).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { ref tool, .. } if tool == "slow"));
    }

    #[cfg(unix)]
    fn provider(command: &str, args: &[&str]) -> ProviderConfig {
        ProviderConfig {
            name: "proc".into(),
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..ProviderConfig::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_lets_provider_exit_on_eof() {
        let session = ExternalSession::spawn(&provider("sh", &["-c", "cat > /dev/null"])).unwrap();
        let status = session.close().await.unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_unresponsive_provider() {
        let session = ExternalSession::spawn(&provider("sh", &["-c", "trap '' TERM; sleep 30"]))
            .unwrap()
            .with_shutdown_grace(Duration::from_millis(100));
        let status = session.close().await.unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let err = ExternalSession::spawn(&ProviderConfig {
                name: "ghost".into(),
                command: "/definitely/not/a/binary".into(),
                ..ProviderConfig::default()
            })
            .err()
            .unwrap();
            assert!(matches!(err, SessionError::Spawn { .. }));
        });
    }
}
