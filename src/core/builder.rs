//! 内核构建器：统一的初始化逻辑
//!
//! 汇总配置、推理引擎、注册工具、子智能体规格、审批通道与会话管理器，
//! 构建时一次性确定主目录与各子智能体目录，并组装各自的 system prompt。

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, KernelSection, SubAgentSpec};
use crate::core::approval::{ApprovalChannel, ApprovalGate};
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::react::{Planner, ReactEvent};
use crate::session::SessionManager;
use crate::tools::{tool_call_schema_json, ActionCatalog, Tool, ToolExecutor, ToolRegistry};

/// 默认子智能体名
pub const GENERAL_PURPOSE: &str = "general-purpose";

const GENERAL_PURPOSE_DESCRIPTION: &str = "General-purpose agent for researching complex questions, \
     searching for content and executing multi-step tasks. It has access to every action except task.";

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful agent. Plan with write_todos, keep notes in files, \
     and delegate self-contained work with task.";

/// 构建完成的子智能体：规格 + 目录 + system prompt
pub(crate) struct SubAgentRuntime {
    pub spec: SubAgentSpec,
    pub catalog: ActionCatalog,
    pub system: String,
}

/// 编排内核：主循环、派发、审批与外部会话的汇合点
pub struct Kernel {
    pub(crate) planner: Planner,
    pub(crate) executor: ToolExecutor,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) gate: ApprovalGate,
    pub(crate) main_catalog: ActionCatalog,
    pub(crate) main_system: String,
    pub(crate) subagents: BTreeMap<String, SubAgentRuntime>,
    pub(crate) limits: KernelSection,
    pub(crate) sessions: Option<Arc<SessionManager>>,
    pub(crate) event_tx: Option<mpsc::UnboundedSender<ReactEvent>>,
    pub(crate) cancel_token: CancellationToken,
}

impl Kernel {
    pub fn builder(config: AppConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    /// 主智能体可见的动作名（排序）
    pub fn action_names(&self) -> Vec<String> {
        self.main_catalog.names()
    }

    pub fn subagent_names(&self) -> Vec<String> {
        self.subagents.keys().cloned().collect()
    }

    /// 子智能体可见的动作名
    pub fn subagent_actions(&self, name: &str) -> Option<Vec<String>> {
        self.subagents.get(name).map(|s| s.catalog.names())
    }

    pub fn system_prompt(&self) -> &str {
        &self.main_system
    }

    pub fn sessions(&self) -> Option<&Arc<SessionManager>> {
        self.sessions.as_ref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.planner.token_usage()
    }

    pub(crate) fn emit(&self, event: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

pub struct KernelBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    instructions: String,
    registry: ToolRegistry,
    extra_subagents: Vec<SubAgentSpec>,
    approval_channel: Option<Arc<dyn ApprovalChannel>>,
    sessions: Option<Arc<SessionManager>>,
    event_tx: Option<mpsc::UnboundedSender<ReactEvent>>,
    cancel_token: CancellationToken,
}

impl KernelBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            registry: ToolRegistry::new(),
            extra_subagents: Vec::new(),
            approval_channel: None,
            sessions: None,
            event_tx: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// 未设置时按配置创建（有 API Key 用 OpenAI 兼容端点，否则 Mock）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 主智能体的操作说明
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.registry.register_arc(tool);
        self
    }

    /// 追加子智能体规格（在配置中的 [[subagents]] 之后）
    pub fn with_subagent(mut self, spec: SubAgentSpec) -> Self {
        self.extra_subagents.push(spec);
        self
    }

    pub fn with_approval_channel(mut self, channel: Arc<dyn ApprovalChannel>) -> Self {
        self.approval_channel = Some(channel);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 通过会话管理器发现 provider 的工具并注册
    pub async fn with_provider_tools(mut self, provider: &str) -> Result<Self, AgentError> {
        let sessions = self.sessions.clone().ok_or_else(|| {
            AgentError::ConfigError(format!(
                "provider {provider} requested but no session manager is configured"
            ))
        })?;
        for tool in sessions.discover(provider).await? {
            self.registry.register(tool);
        }
        Ok(self)
    }

    pub fn build(self) -> Result<Kernel, AgentError> {
        let kernel_cfg = self.config.kernel.clone();

        if !self.config.approval.is_empty() && self.approval_channel.is_none() {
            return Err(AgentError::ConfigError(
                "approval is configured for some actions but no approval channel was provided".into(),
            ));
        }

        let global = ActionCatalog::global(kernel_cfg.builtin_tools.as_deref(), &self.registry);
        let main_catalog = match kernel_cfg.main_agent_tools.as_deref() {
            Some(allowed) => global.restrict_tools(allowed),
            None => global.clone(),
        };
        for action in self.config.approval.keys() {
            if !global.contains(action) {
                tracing::warn!(action = %action, "approval configured for an action that is not in the catalog");
            }
        }

        let mut specs: BTreeMap<String, SubAgentSpec> = BTreeMap::new();
        specs.insert(
            GENERAL_PURPOSE.to_string(),
            SubAgentSpec::new(GENERAL_PURPOSE, GENERAL_PURPOSE_DESCRIPTION, self.instructions.clone()),
        );
        let mut seen = std::collections::HashSet::new();
        for spec in self.config.subagents.iter().cloned().chain(self.extra_subagents) {
            if spec.name.trim().is_empty() {
                return Err(AgentError::ConfigError("subagent name must not be empty".into()));
            }
            if !seen.insert(spec.name.clone()) {
                return Err(AgentError::ConfigError(format!("duplicate subagent name: {}", spec.name)));
            }
            specs.insert(spec.name.clone(), spec);
        }

        let sub_base = global.without_dispatch();
        let subagents: BTreeMap<String, SubAgentRuntime> = specs
            .into_iter()
            .map(|(name, spec)| {
                let catalog = match &spec.tools {
                    Some(allowed) => {
                        for missing in allowed.iter().filter(|a| !sub_base.contains(a)) {
                            tracing::warn!(subagent = %name, action = %missing, "subagent action not available");
                        }
                        sub_base.restrict(allowed)
                    }
                    None => sub_base.clone(),
                };
                let system = assemble_system_prompt(&spec.prompt, &catalog, None);
                (name, SubAgentRuntime { spec, catalog, system })
            })
            .collect();

        let roster: Vec<(&str, &str)> = subagents
            .values()
            .map(|s| (s.spec.name.as_str(), s.spec.description.as_str()))
            .collect();
        let main_system = assemble_system_prompt(&self.instructions, &main_catalog, Some(&roster));

        let llm = self.llm.unwrap_or_else(|| create_llm_from_config(&self.config));
        let executor = ToolExecutor::new(kernel_cfg.tool_timeout_secs)
            .with_single_in_progress(kernel_cfg.enforce_single_in_progress);
        let gate = ApprovalGate::new(self.config.approval.clone(), self.approval_channel);

        tracing::info!(
            actions = main_catalog.len(),
            subagents = subagents.len(),
            guarded = ?gate.guarded_actions(),
            "kernel built"
        );

        Ok(Kernel {
            planner: Planner::new(llm),
            executor,
            recovery: RecoveryEngine::new(),
            gate,
            main_catalog,
            main_system,
            subagents,
            limits: kernel_cfg,
            sessions: self.sessions,
            event_tx: self.event_tx,
            cancel_token: self.cancel_token,
        })
    }
}

/// 拼装 system prompt：操作说明 + 动作目录 + 调用格式 +（主智能体）可用子智能体
fn assemble_system_prompt(instructions: &str, catalog: &ActionCatalog, roster: Option<&[(&str, &str)]>) -> String {
    let mut prompt = format!(
        "{instructions}\n\n## Available actions\n{}\n\n## Calling actions\n\
         To call actions reply with a single JSON object matching one of these schemas. \
         Calls listed together in tool_calls run concurrently and their results come back in the same order. \
         When you are finished, reply with plain text and no JSON.\n{}",
        catalog.to_schema_json(),
        tool_call_schema_json()
    );
    if let Some(roster) = roster {
        if catalog.contains(crate::tools::DISPATCH_ACTION) {
            prompt.push_str("\n\n## Available subagent types for task\n");
            for (name, description) in roster {
                prompt.push_str(&format!("- {name}: {description}\n"));
            }
        }
    }
    prompt
}
