//! 共享状态：Transcript + 任务清单 + 产物存储
//!
//! 动作不直接改状态，而是返回 StateDelta 描述期望的变化；只有运行时按发起顺序应用增量，
//! 因此并发分支的合并顺序集中在一处、可测试。
//!
//! 合并策略：
//! - 产物：同一步内按发起顺序应用，真正的键冲突由后发起者覆盖（last-writer-by-issue-order）
//! - 任务清单：`Replace` 整体替换（write_todos）；`Merge` 按 content 合并（子智能体回传），
//!   同名条目只有状态优先级更高才替换：completed > in_progress > pending

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::Transcript;

/// 任务状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    fn priority(self) -> u8 {
        match self {
            TodoStatus::Pending => 1,
            TodoStatus::InProgress => 2,
            TodoStatus::Completed => 3,
        }
    }
}

/// 任务清单条目
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Todo {
    /// 任务描述，同时作为合并时的键
    pub content: String,
    pub status: TodoStatus,
}

impl Todo {
    pub fn new(content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            content: content.into(),
            status,
        }
    }
}

/// 按 content 合并两份任务清单，保持 existing 的顺序，新条目依次追加
pub fn merge_todos(existing: &[Todo], incoming: &[Todo]) -> Vec<Todo> {
    let mut merged: Vec<Todo> = existing.to_vec();
    for todo in incoming {
        match merged.iter_mut().find(|t| t.content == todo.content) {
            Some(current) => {
                if todo.status.priority() > current.status.priority() {
                    current.status = todo.status;
                }
            }
            None => merged.push(todo.clone()),
        }
    }
    merged
}

/// 扁平产物存储：path -> content，无目录概念
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactStore {
    files: BTreeMap<String, String>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只返回键，按字典序
    pub fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn read(&self, path: &str) -> Result<&str, AgentError> {
        self.files
            .get(path)
            .map(String::as_str)
            .ok_or_else(|| AgentError::ArtifactNotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// 新建产物；已存在时失败，覆盖必须显式走 edit
    pub fn write(&mut self, path: &str, content: &str) -> Result<(), AgentError> {
        self.check_writable(path)?;
        self.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    pub fn check_writable(&self, path: &str) -> Result<(), AgentError> {
        if self.files.contains_key(path) {
            return Err(AgentError::ArtifactAlreadyExists(path.to_string()));
        }
        Ok(())
    }

    /// 精确单次替换：old 必须恰好出现一次
    pub fn edit(&mut self, path: &str, old: &str, new: &str) -> Result<(), AgentError> {
        let updated = self.preview_edit(path, old, new)?;
        self.files.insert(path.to_string(), updated);
        Ok(())
    }

    /// 计算 edit 之后的内容，不修改存储
    pub fn preview_edit(&self, path: &str, old: &str, new: &str) -> Result<String, AgentError> {
        if old.is_empty() {
            return Err(AgentError::invalid_args("edit_file", "old_string must not be empty"));
        }
        let current = self.read(path)?;
        match current.matches(old).count() {
            0 => Err(AgentError::EditTargetNotFound {
                path: path.to_string(),
                target: old.to_string(),
            }),
            1 => Ok(current.replacen(old, new, 1)),
            n => Err(AgentError::ArtifactAmbiguousEdit {
                path: path.to_string(),
                occurrences: n,
            }),
        }
    }

    /// 合并用：无条件写入
    pub(crate) fn insert(&mut self, path: String, content: String) {
        self.files.insert(path, content);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.files.iter()
    }

    /// 相对 base 新增或内容变化的键
    pub fn changed_since(&self, base: &ArtifactStore) -> BTreeMap<String, String> {
        self.files
            .iter()
            .filter(|(k, v)| base.files.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ArtifactStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// 任务清单的更新方式
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TodoUpdate {
    /// 整体替换（write_todos）
    Replace(Vec<Todo>),
    /// 按 content 合并（子智能体回传）
    Merge(Vec<Todo>),
}

/// 动作期望对共享状态做出的变化；由运行时统一应用
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDelta {
    pub artifacts: BTreeMap<String, String>,
    pub todos: Option<TodoUpdate>,
}

impl StateDelta {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn artifact(path: impl Into<String>, content: impl Into<String>) -> Self {
        let mut delta = Self::default();
        delta.artifacts.insert(path.into(), content.into());
        delta
    }

    pub fn replace_todos(todos: Vec<Todo>) -> Self {
        Self {
            todos: Some(TodoUpdate::Replace(todos)),
            ..Self::default()
        }
    }

    /// 子运行结束后的回传增量：只包含内容变化的产物；任务清单变化时以 Merge 方式回传
    pub fn between(base: &StateSnapshot, after: &AgentState) -> Self {
        let todos = (after.todos != base.todos).then(|| TodoUpdate::Merge(after.todos.clone()));
        Self {
            artifacts: after.artifacts.changed_since(&base.artifacts),
            todos,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.todos.is_none()
    }
}

/// 一次动作执行的结果：给推理引擎看的内容 + 期望的状态增量
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub content: String,
    pub delta: StateDelta,
}

impl ActionOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            delta: StateDelta::none(),
        }
    }

    pub fn with_delta(content: impl Into<String>, delta: StateDelta) -> Self {
        Self {
            content: content.into(),
            delta,
        }
    }

    /// 动作级错误转成的结果内容
    pub fn error(err: &AgentError) -> Self {
        Self::text(format!("Error: {err}"))
    }
}

/// 一步开始时的只读快照，同一步内并发执行的动作都基于它
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub todos: Vec<Todo>,
    pub artifacts: ArtifactStore,
}

/// 进入 / 离开内核的状态形状：{transcript, task_list, artifact_store}
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default, rename = "messages")]
    pub transcript: Transcript,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default, rename = "files")]
    pub artifacts: ArtifactStore,
    /// 每应用一个非空增量加一
    #[serde(default)]
    pub version: u64,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以调用方提供的产物作为初始状态
    pub fn with_artifacts(artifacts: ArtifactStore) -> Self {
        Self {
            artifacts,
            ..Self::default()
        }
    }

    /// 从快照构造一个空 Transcript 的状态（子智能体的起点）
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            transcript: Transcript::new(),
            todos: snapshot.todos,
            artifacts: snapshot.artifacts,
            version: 0,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            todos: self.todos.clone(),
            artifacts: self.artifacts.clone(),
        }
    }

    pub fn apply(&mut self, delta: StateDelta) {
        if delta.is_empty() {
            return;
        }
        for (path, content) in delta.artifacts {
            self.artifacts.insert(path, content);
        }
        match delta.todos {
            Some(TodoUpdate::Replace(todos)) => self.todos = todos,
            Some(TodoUpdate::Merge(todos)) => self.todos = merge_todos(&self.todos, &todos),
            None => {}
        }
        self.version += 1;
    }

    /// 按给定顺序（即发起顺序）依次应用
    pub fn apply_all(&mut self, deltas: impl IntoIterator<Item = StateDelta>) {
        for delta in deltas {
            self.apply(delta);
        }
    }
}
