//! 核心层：错误与恢复、共享状态、审批闸门、内核构建、优雅关闭

pub mod approval;
pub mod builder;
pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use approval::{
    ApprovalChannel, ApprovalGate, ApprovalRequest, ApprovalResponse, InterruptConfig, PendingInterrupt,
    QueuedApprovalChannel, ResolutionKind,
};
pub use builder::{Kernel, KernelBuilder, GENERAL_PURPOSE};
pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use shutdown::{SessionCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::{
    merge_todos, ActionOutcome, AgentState, ArtifactStore, StateDelta, StateSnapshot, Todo, TodoStatus, TodoUpdate,
};
