//! Hive - 智能体编排内核
//!
//! 一个协调循环把有界的工作委派给隔离的子循环，在委派之间维护共享状态（任务清单 + 扁平产物存储），
//! 对选定动作施加人工审批，并管理持久的外部工具会话。
//!
//! 模块划分：
//! - **config**: 配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、共享状态与合并策略、审批闸门、Kernel 构建、优雅关闭
//! - **llm**: 推理引擎抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话记录
//! - **observability**: tracing 初始化
//! - **react**: Planner、推理-动作主循环、任务派发
//! - **session**: 外部工具会话（子进程 + JSON-RPC）
//! - **tools**: Tool trait、动作目录、内置动作与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod session;
pub mod tools;

pub use crate::config::{load_config, AppConfig, ProviderConfig, SubAgentSpec};
pub use crate::core::{AgentError, AgentState, Kernel, KernelBuilder};
pub use crate::react::{ReactEvent, RunResult, RunStatus};
