//! 优雅关闭
//!
//! 统一的关闭信号与清理逻辑：
//! - 关闭 token 同时作为内核的取消 token，正在进行的运行在下一步之前结束
//! - 所有外部工具会话在超时内关闭，子进程不泄漏

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::session::SessionManager;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// Ctrl+C 或宿主主动退出
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 关闭 token，可交给 KernelBuilder::with_cancel_token
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器：SIGINT (Ctrl+C) 与 SIGTERM
    ///
    /// 返回时信号已注册，此后收到的信号都会触发关闭。
    pub fn install_signal_handlers(self: &Arc<Self>) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let handlers = [
                (SignalKind::interrupt(), ShutdownReason::UserInitiated, "Ctrl+C"),
                (SignalKind::terminate(), ShutdownReason::Signal, "SIGTERM"),
            ];
            for (kind, reason, label) in handlers {
                let mut stream = signal(kind)?;
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    if stream.recv().await.is_some() {
                        tracing::info!("Received {}, initiating graceful shutdown...", label);
                        manager.shutdown(reason);
                    }
                });
            }
        }

        #[cfg(not(unix))]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Ok(()) = tokio::signal::ctrl_c().await {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::UserInitiated);
                }
            });
        }
        Ok(())
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：依次执行清理任务，每个任务单独限时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 触发关闭信号并执行所有清理任务
    pub async fn shutdown(&self, reason: ShutdownReason) {
        self.manager.shutdown(reason);
        self.run_cleanup().await;
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());
        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup task '{}' completed successfully", name),
                Ok(Err(e)) => tracing::warn!("Cleanup task '{}' failed: {}", name, e),
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs)
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 关闭所有外部工具会话
pub struct SessionCleanup {
    sessions: Arc<SessionManager>,
}

impl SessionCleanup {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SessionCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let active = self.sessions.active_sessions().await;
        self.sessions.shutdown().await;
        tracing::info!(closed = active, "external sessions closed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ExternalSessions"
    }
}
