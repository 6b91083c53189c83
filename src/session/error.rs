//! 外部工具会话错误

use thiserror::Error;

/// 外部工具会话（子进程 + JSON-RPC 通道）相关错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Failed to spawn provider {provider}: {reason}")]
    Spawn { provider: String, reason: String },

    #[error("Initialize handshake with {provider} failed: {reason}")]
    InitFailed { provider: String, reason: String },

    /// 未完成 initialize 握手就发起调用
    #[error("Session {provider} is not initialized; call initialize() first")]
    Uninitialized { provider: String },

    #[error("Session {provider} is closed")]
    Closed { provider: String },

    /// 通道层故障（stdout 关闭、写入失败等），会话不可再用
    #[error("Transport error on {provider}: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Provider returned error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Call {tool} on {provider} timed out after {secs}s")]
    Timeout {
        provider: String,
        tool: String,
        secs: u64,
    },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl SessionError {
    /// 协议误用（未初始化、已关闭）：调用方的错，必须传播给宿主
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            SessionError::Uninitialized { .. } | SessionError::Closed { .. }
        )
    }

    /// 致命协议错误：会话需拆除，下次调用重建
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Transport { .. } | SessionError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let uninit = SessionError::Uninitialized {
            provider: "netbox".into(),
        };
        assert!(uninit.is_misuse());
        assert!(!uninit.is_fatal());

        let transport = SessionError::Transport {
            provider: "netbox".into(),
            reason: "stdout closed".into(),
        };
        assert!(transport.is_fatal());
        assert!(!transport.is_misuse());

        let server = SessionError::Server {
            code: -32602,
            message: "bad params".into(),
        };
        assert!(!server.is_fatal());
        assert!(!server.is_misuse());
    }
}
