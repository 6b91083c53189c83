//! 任务派发（上下文隔离）
//!
//! `task` 动作：按 subagent_type 找到子智能体，用调用方状态的快照（任务清单 + 产物）和一条只含
//! 任务描述的 user 消息启动全新的循环。调用方的对话记录从不传入；子运行结束后只交回一条结果，
//! 以及产物/任务清单的变化（StateDelta::between）。子运行失败转成 SubAgentRunFailure，不影响调用方。

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::state::{ActionOutcome, AgentState, StateDelta, StateSnapshot};
use crate::core::{AgentError, Kernel};
use crate::memory::Message;
use crate::react::loop_::{LoopContext, RunStatus};
use crate::react::ReactEvent;
use crate::tools::catalog::parse_args;
use crate::tools::DISPATCH_ACTION;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TaskInput {
    /// 交给子智能体的完整任务描述；子智能体看不到其他上下文
    pub description: String,
    /// 子智能体类型
    pub subagent_type: String,
}

impl Kernel {
    pub(crate) async fn dispatch(&self, args: Value, snapshot: &StateSnapshot) -> Result<ActionOutcome, AgentError> {
        let input: TaskInput = parse_args(DISPATCH_ACTION, args)?;
        let runtime = self
            .subagents
            .get(&input.subagent_type)
            .ok_or_else(|| AgentError::SubAgentTypeUnknown {
                name: input.subagent_type.clone(),
                allowed: self.subagent_names().join(", "),
            })?;
        let name = runtime.spec.name.as_str();

        tracing::info!(subagent = name, "dispatching task");
        self.emit(ReactEvent::SubAgentStarted {
            name: name.to_string(),
            description: input.description.clone(),
        });

        let mut state = AgentState::from_snapshot(snapshot.clone());
        state.transcript.push(Message::user(input.description));
        let ctx = LoopContext {
            agent: name,
            catalog: &runtime.catalog,
            system: &runtime.system,
            max_steps: self.limits.subagent_max_steps,
        };

        match self.run_loop(ctx, state).await {
            Ok(result) => {
                let completed = result.status == RunStatus::Completed;
                tracing::info!(subagent = name, steps = result.steps, completed, "subagent finished");
                self.emit(ReactEvent::SubAgentFinished {
                    name: name.to_string(),
                    ok: completed,
                });
                let delta = StateDelta::between(snapshot, &result.state);
                Ok(ActionOutcome::with_delta(result.response, delta))
            }
            Err(e) if e.is_structural() => Err(e),
            Err(e) => {
                self.emit(ReactEvent::SubAgentFinished {
                    name: name.to_string(),
                    ok: false,
                });
                Err(AgentError::SubAgentRunFailure {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
