//! 外部工具会话：子进程 provider + 行分隔 JSON-RPC

pub mod client;
pub mod error;
pub mod manager;
pub mod tool;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use client::ExternalSession;
pub use error::SessionError;
pub use manager::SessionManager;
pub use tool::ExternalTool;
pub use types::{ToolDefinition, ToolResponse};
