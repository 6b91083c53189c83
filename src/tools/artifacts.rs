//! 产物存储内置动作：ls / read_file / write_file / edit_file
//!
//! 全部基于一步开始时的快照执行，写类动作只返回 StateDelta，由运行时按发起顺序应用。

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::state::{ActionOutcome, StateDelta, StateSnapshot};
use crate::core::AgentError;
use crate::tools::catalog::parse_args;

const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;

fn default_limit() -> usize {
    DEFAULT_READ_LIMIT
}

/// ls 无参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct LsInput {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileInput {
    /// 产物路径
    pub file_path: String,
    /// 起始行（从 0 开始）
    #[serde(default)]
    pub offset: usize,
    /// 最多返回的行数
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileInput {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditFileInput {
    pub file_path: String,
    /// 必须在文件中恰好出现一次
    pub old_string: String,
    pub new_string: String,
}

pub fn ls(snapshot: &StateSnapshot) -> ActionOutcome {
    let paths = snapshot.artifacts.list();
    ActionOutcome::text(serde_json::to_string(&paths).unwrap_or_else(|_| "[]".to_string()))
}

pub fn read_file(args: Value, snapshot: &StateSnapshot) -> Result<ActionOutcome, AgentError> {
    let input: ReadFileInput = parse_args("read_file", args)?;
    let content = snapshot.artifacts.read(&input.file_path)?;
    if content.trim().is_empty() {
        return Ok(ActionOutcome::text(
            "System reminder: File exists but has empty contents",
        ));
    }

    let lines: Vec<&str> = content.lines().collect();
    if input.offset >= lines.len() {
        return Err(AgentError::invalid_args(
            "read_file",
            format!(
                "line offset {} exceeds file length ({} lines)",
                input.offset,
                lines.len()
            ),
        ));
    }
    let end = input.offset.saturating_add(input.limit).min(lines.len());
    let rendered: Vec<String> = lines[input.offset..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let line: String = line.chars().take(MAX_LINE_CHARS).collect();
            format!("{:6}\t{}", input.offset + i + 1, line)
        })
        .collect();
    Ok(ActionOutcome::text(rendered.join("\n")))
}

pub fn write_file(args: Value, snapshot: &StateSnapshot) -> Result<ActionOutcome, AgentError> {
    let input: WriteFileInput = parse_args("write_file", args)?;
    snapshot.artifacts.check_writable(&input.file_path)?;
    Ok(ActionOutcome::with_delta(
        format!("Updated file {}", input.file_path),
        StateDelta::artifact(input.file_path, input.content),
    ))
}

pub fn edit_file(args: Value, snapshot: &StateSnapshot) -> Result<ActionOutcome, AgentError> {
    let input: EditFileInput = parse_args("edit_file", args)?;
    let updated = snapshot
        .artifacts
        .preview_edit(&input.file_path, &input.old_string, &input.new_string)?;
    Ok(ActionOutcome::with_delta(
        format!("Successfully replaced string in '{}'", input.file_path),
        StateDelta::artifact(input.file_path, updated),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ArtifactStore;
    use serde_json::json;

    fn snapshot(entries: &[(&str, &str)]) -> StateSnapshot {
        StateSnapshot {
            todos: vec![],
            artifacts: entries.iter().copied().collect::<ArtifactStore>(),
        }
    }

    #[test]
    fn test_ls_lists_keys_only() {
        let out = ls(&snapshot(&[("b.md", "2"), ("a.md", "1")]));
        assert_eq!(out.content, r#"["a.md","b.md"]"#);
        assert!(out.delta.is_empty());
    }

    #[test]
    fn test_read_numbered_window() {
        let snap = snapshot(&[("log.txt", "one\ntwo\nthree\nfour")]);
        let out = read_file(json!({"file_path": "log.txt", "offset": 1, "limit": 2}), &snap).unwrap();
        assert_eq!(out.content, "     2\ttwo\n     3\tthree");
    }

    #[test]
    fn test_read_empty_and_missing() {
        let snap = snapshot(&[("empty.md", "  ")]);
        let out = read_file(json!({"file_path": "empty.md"}), &snap).unwrap();
        assert!(out.content.contains("empty contents"));
        assert!(matches!(
            read_file(json!({"file_path": "nope.md"}), &snap),
            Err(AgentError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn test_read_offset_past_end() {
        let snap = snapshot(&[("a.md", "only line")]);
        assert!(matches!(
            read_file(json!({"file_path": "a.md", "offset": 5}), &snap),
            Err(AgentError::ArgumentValidation { .. })
        ));
    }

    #[test]
    fn test_read_truncates_long_lines() {
        let long = "y".repeat(2500);
        let snap = snapshot(&[("wide.txt", long.as_str())]);
        let out = read_file(json!({"file_path": "wide.txt"}), &snap).unwrap();
        assert_eq!(out.content.len(), 7 + 2000);
    }

    #[test]
    fn test_write_existing_fails() {
        let snap = snapshot(&[("a.md", "x")]);
        let err = write_file(json!({"file_path": "a.md", "content": "y"}), &snap).unwrap_err();
        assert!(matches!(err, AgentError::ArtifactAlreadyExists(_)));

        let out = write_file(json!({"file_path": "b.md", "content": "y"}), &snap).unwrap();
        assert_eq!(out.delta, StateDelta::artifact("b.md", "y"));
    }

    #[test]
    fn test_edit_produces_full_content_delta() {
        let snap = snapshot(&[("a.md", "status: draft")]);
        let out = edit_file(
            json!({"file_path": "a.md", "old_string": "draft", "new_string": "final"}),
            &snap,
        )
        .unwrap();
        assert_eq!(out.delta, StateDelta::artifact("a.md", "status: final"));
    }

    #[test]
    fn test_missing_argument_is_validation_error() {
        let err = write_file(json!({"file_path": "a.md"}), &snapshot(&[])).unwrap_err();
        assert!(matches!(err, AgentError::ArgumentValidation { .. }));
    }
}
