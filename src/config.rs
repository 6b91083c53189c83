//! 内核配置：从 config/hive.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__KERNEL__MAX_STEPS=40`）。
//! 所有字段都有默认值，未知键忽略。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::approval::InterruptConfig;

/// 配置根
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub kernel: KernelSection,
    pub llm: LlmSection,
    /// 子智能体规格（[[subagents]]）
    pub subagents: Vec<SubAgentSpec>,
    /// 受保护动作：[approval.<action>]
    pub approval: HashMap<String, InterruptConfig>,
    /// 外部工具 provider（[[providers]]）
    pub providers: Vec<ProviderConfig>,
}

/// [kernel] 段：步数上限、超时、裁剪窗口、内置动作选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KernelSection {
    /// 主循环步数上限
    pub max_steps: usize,
    /// 子智能体循环步数上限
    pub subagent_max_steps: usize,
    pub tool_timeout_secs: u64,
    /// 发送给推理引擎的最大消息数，0 表示不裁剪
    pub max_transcript_messages: usize,
    /// 为 true 时 write_todos 拒绝多个 in_progress 的清单
    pub enforce_single_in_progress: bool,
    /// 暴露的内置动作白名单；None 表示全部
    pub builtin_tools: Option<Vec<String>>,
    /// 主智能体可见的已注册工具白名单；None 表示全部
    pub main_agent_tools: Option<Vec<String>>,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            max_steps: 25,
            subagent_max_steps: 15,
            tool_timeout_secs: 60,
            max_transcript_messages: 0,
            enforce_single_in_progress: false,
            builtin_tools: None,
            main_agent_tools: None,
        }
    }
}

/// [llm] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

/// 子智能体规格：名称、描述（展示给调用方）、能力说明、可用动作子集
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubAgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 子智能体的系统提示
    #[serde(default)]
    pub prompt: String,
    /// 允许的动作；None 表示所有非派发动作
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

impl SubAgentSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt: prompt.into(),
            tools: None,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }
}

/// 外部工具 provider：以子进程方式启动
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub call_timeout_secs: u64,
    pub init_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            call_timeout_secs: 30,
            init_timeout_secs: 30,
        }
    }
}

/// 加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/hive.toml、hive.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/hive", "hive"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
