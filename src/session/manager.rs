//! 会话管理器：每个 provider 一个持久会话，按需创建，显式拆除
//!
//! 以 `Arc<SessionManager>` 注入到内核与工具中，不依赖进程级全局状态。
//! 首次调用时启动并完成握手；致命的通道错误会拆除会话并从表中移除，下次调用重建。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::client::ExternalSession;
use super::error::SessionError;
use super::tool::ExternalTool;
use super::types::ToolResponse;
use crate::config::ProviderConfig;

pub struct SessionManager {
    providers: HashMap<String, ProviderConfig>,
    sessions: Mutex<HashMap<String, Arc<ExternalSession>>>,
}

impl SessionManager {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.name.clone(), p)).collect(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// 挂接一个已构造好的会话（例如进程内 provider），会话仍需 initialize
    pub async fn attach(&self, session: ExternalSession) {
        let name = session.provider().to_string();
        self.sessions.lock().await.insert(name, Arc::new(session));
    }

    /// 取得已存在的会话（不创建）
    pub async fn get(&self, provider: &str) -> Option<Arc<ExternalSession>> {
        self.sessions.lock().await.get(provider).cloned()
    }

    /// 取得会话，不存在则按配置启动；返回前保证已完成握手
    ///
    /// 会话表的锁只覆盖查找与启动，握手在锁外进行，一个 provider 的慢调用不会阻塞其他 provider。
    pub async fn session(&self, provider: &str) -> Result<Arc<ExternalSession>, SessionError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(provider) {
                Some(existing) => existing.clone(),
                None => {
                    let config = self
                        .providers
                        .get(provider)
                        .ok_or_else(|| SessionError::UnknownProvider(provider.to_string()))?;
                    let session = Arc::new(ExternalSession::spawn(config)?);
                    sessions.insert(provider.to_string(), session.clone());
                    session
                }
            }
        };
        if let Err(e) = session.initialize().await {
            self.evict(provider, &session).await;
            return Err(e);
        }
        Ok(session)
    }

    /// 经由 provider 会话调用工具；致命错误时拆除该会话
    pub async fn call(&self, provider: &str, tool: &str, arguments: Value) -> Result<ToolResponse, SessionError> {
        let session = self.session(provider).await?;
        let result = session.call(tool, arguments).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!(provider, tool, error = %e, "fatal session error, tearing down");
                self.evict(provider, &session).await;
            }
        }
        result
    }

    /// 通过 tools/list 发现 provider 的工具，包装为可注册的 ExternalTool
    pub async fn discover(self: &Arc<Self>, provider: &str) -> Result<Vec<ExternalTool>, SessionError> {
        let session = self.session(provider).await?;
        let definitions = match session.list_tools().await {
            Ok(defs) => defs,
            Err(e) => {
                if e.is_fatal() {
                    self.evict(provider, &session).await;
                }
                return Err(e);
            }
        };
        tracing::info!(provider, count = definitions.len(), "discovered provider tools");
        Ok(definitions
            .into_iter()
            .map(|def| ExternalTool::new(Arc::clone(self), provider, def))
            .collect())
    }

    /// 只移除仍是同一个实例的会话，避免误删已重建的新会话
    async fn evict(&self, provider: &str, session: &Arc<ExternalSession>) {
        {
            let mut sessions = self.sessions.lock().await;
            if sessions
                .get(provider)
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(provider);
            }
        }
        session.close().await;
    }

    /// 关闭并移除所有会话
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<ExternalSession>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close().await;
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
