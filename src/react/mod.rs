//! 认知层：Planner、推理-动作主循环、任务派发、过程事件

pub mod dispatch;
pub mod events;
pub mod loop_;
pub mod planner;

pub use dispatch::TaskInput;
pub use events::ReactEvent;
pub use loop_::{RunResult, RunStatus, MAIN_AGENT};
pub use planner::{parse_llm_output, Planner, PlannerOutput};
