//! 推理-动作主循环
//!
//! Plan -> 解析调用 -> 审批 -> 并发执行 -> 按发起顺序追加结果并应用增量 -> 下一轮 Plan。
//! 步数上限是步与步之间的协作式检查，从不打断在途调用；耗尽时返回 BudgetExceeded 结果而不是报错。
//! 派发动作会递归进入本循环（子智能体），因此 run_loop 返回装箱的 future。

use futures_util::future::{join_all, BoxFuture};
use serde::Serialize;

use crate::core::approval::Review;
use crate::core::state::{ActionOutcome, AgentState, StateSnapshot};
use crate::core::{AgentError, Kernel, RecoveryAction};
use crate::memory::{ActionCall, Message};
use crate::react::{parse_llm_output, PlannerOutput, ReactEvent};
use crate::tools::executor::args_preview;
use crate::tools::ActionCatalog;

/// 主智能体在事件与日志中的名称
pub const MAIN_AGENT: &str = "main";

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// 推理引擎给出了最终答案
    Completed,
    /// 步数耗尽，response 中带部分进展
    BudgetExceeded,
}

/// 一次循环调用的结果
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub response: String,
    /// 实际消耗的步数
    pub steps: usize,
    pub state: AgentState,
}

/// 单次循环的不变参数
pub(crate) struct LoopContext<'a> {
    pub agent: &'a str,
    pub catalog: &'a ActionCatalog,
    pub system: &'a str,
    pub max_steps: usize,
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

impl Kernel {
    /// 运行主智能体：追加用户输入，循环直到最终答案或步数耗尽
    ///
    /// 调用方可以在 `state.artifacts` 中预置产物，并从返回的 state 中读回。
    pub async fn invoke(&self, mut state: AgentState, user_input: &str) -> Result<RunResult, AgentError> {
        state.transcript.push(Message::user(user_input));
        let ctx = LoopContext {
            agent: MAIN_AGENT,
            catalog: &self.main_catalog,
            system: &self.main_system,
            max_steps: self.limits.max_steps,
        };
        self.run_loop(ctx, state).await
    }

    pub(crate) fn run_loop<'a>(
        &'a self,
        ctx: LoopContext<'a>,
        mut state: AgentState,
    ) -> BoxFuture<'a, Result<RunResult, AgentError>> {
        Box::pin(async move {
            let agent = ctx.agent;
            let mut step = 0;

            loop {
                self.emit(ReactEvent::StepUpdate {
                    agent: agent.to_string(),
                    step,
                    max_steps: ctx.max_steps,
                });

                if self.cancel_token.is_cancelled() {
                    tracing::info!(agent, step, "run cancelled");
                    return Err(AgentError::Cancelled);
                }

                if step >= ctx.max_steps {
                    let err = AgentError::LoopBudgetExceeded { steps: step };
                    tracing::warn!(agent, steps = step, "{}", err);
                    self.emit(ReactEvent::BudgetExceeded {
                        agent: agent.to_string(),
                        steps: step,
                    });
                    let progress = state
                        .transcript
                        .last_progress()
                        .unwrap_or("(no progress recorded)");
                    let response = format!("{err}. Partial progress:\n{progress}");
                    return Ok(RunResult {
                        status: RunStatus::BudgetExceeded,
                        response,
                        steps: step,
                        state,
                    });
                }

                let window = state.transcript.window(self.limits.max_transcript_messages);
                let output = match self.planner.plan_with_system(&window, ctx.system).await {
                    Ok(output) => output,
                    Err(e) => match self.recovery.handle(&e) {
                        RecoveryAction::RetryWithPrompt(prompt) => {
                            self.note_recovery(agent, &prompt);
                            state.transcript.push(Message::user(prompt));
                            step += 1;
                            continue;
                        }
                        RecoveryAction::Abort => return Err(e),
                    },
                };

                let calls = match parse_llm_output(&output) {
                    Ok(PlannerOutput::Response(text)) => {
                        state.transcript.push(Message::assistant(text.clone()));
                        self.emit(ReactEvent::Final {
                            agent: agent.to_string(),
                            text: text.clone(),
                        });
                        tracing::info!(agent, steps = step, "run completed");
                        return Ok(RunResult {
                            status: RunStatus::Completed,
                            response: text,
                            steps: step,
                            state,
                        });
                    }
                    Ok(PlannerOutput::Actions(calls)) => calls,
                    Err(e) => match self.recovery.handle(&e) {
                        RecoveryAction::RetryWithPrompt(prompt) => {
                            tracing::debug!(agent, error = %e, "unparseable planner output");
                            self.note_recovery(agent, &prompt);
                            state.transcript.push(Message::assistant(output));
                            state.transcript.push(Message::user(prompt));
                            step += 1;
                            continue;
                        }
                        RecoveryAction::Abort => return Err(e),
                    },
                };

                state
                    .transcript
                    .push(Message::assistant_with_calls(output, calls.clone()));

                self.gate.check_step(&calls)?;
                let mut reviews = Vec::with_capacity(calls.len());
                for call in &calls {
                    if self.gate.is_guarded(&call.tool) {
                        self.emit(ReactEvent::Interrupt {
                            tool: call.tool.clone(),
                            allowed: self.gate.allowed_for(&call.tool),
                        });
                    }
                    reviews.push(self.gate.review(call).await?);
                }

                let snapshot = state.snapshot();
                let outcomes = join_all(
                    reviews
                        .into_iter()
                        .map(|review| self.run_reviewed(&ctx, review, &snapshot)),
                )
                .await;

                for (call, outcome) in calls.iter().zip(outcomes) {
                    let outcome = outcome?;
                    self.emit(ReactEvent::Observation {
                        agent: agent.to_string(),
                        call_id: call.id.clone(),
                        tool: call.tool.clone(),
                        preview: preview(&outcome.content),
                    });
                    state.transcript.push(Message::tool_result(call, outcome.content));
                    state.apply(outcome.delta);
                }

                step += 1;
            }
        })
    }

    fn note_recovery(&self, agent: &str, prompt: &str) {
        self.emit(ReactEvent::Recovery {
            agent: agent.to_string(),
            detail: prompt.to_string(),
        });
    }

    /// 执行审批后的调用；动作级错误转成错误内容的结果，结构性错误向上传播
    async fn run_reviewed(
        &self,
        ctx: &LoopContext<'_>,
        review: Review,
        snapshot: &StateSnapshot,
    ) -> Result<ActionOutcome, AgentError> {
        let call = match review {
            Review::Respond(text) => return Ok(ActionOutcome::text(text)),
            Review::Run(call) => call,
        };
        self.emit(ReactEvent::ToolCall {
            agent: ctx.agent.to_string(),
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            args: call.args.clone(),
        });

        match self.execute_call(ctx.catalog, &call, snapshot).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_structural() => Err(e),
            Err(e) => {
                tracing::warn!(agent = ctx.agent, tool = %call.tool, error = %e, "action failed");
                Ok(ActionOutcome::error(&e))
            }
        }
    }

    async fn execute_call(
        &self,
        catalog: &ActionCatalog,
        call: &ActionCall,
        snapshot: &StateSnapshot,
    ) -> Result<ActionOutcome, AgentError> {
        let kind = catalog.resolve(&call.tool)?;
        if kind.is_dispatch() {
            let fut = self.dispatch(call.args.clone(), snapshot);
            self.executor.audited(&call.tool, args_preview(&call.args), fut).await
        } else {
            self.executor
                .execute(&call.tool, kind, call.args.clone(), snapshot)
                .await
        }
    }
}
