//! 动作调用 JSON Schema 生成（schemars）
//!
//! 把「合法动作调用」的 JSON 结构注入 system prompt，减少推理引擎输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 单个动作调用：`{"tool": "...", "args": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionCallFormat {
    /// 动作名，如 write_todos、read_file、task
    pub tool: String,
    /// 动作参数，结构见动作目录中的 parameters
    pub args: Value,
}

/// 同一步发起多个调用：`{"tool_calls": [...]}`，按数组顺序发起
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionBatchFormat {
    pub tool_calls: Vec<ActionCallFormat>,
}

/// 返回单调用与批量调用两种格式的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let single = schema_for!(ActionCallFormat);
    let batch = schema_for!(ActionBatchFormat);
    let both = serde_json::json!({ "single": single, "batch": batch });
    serde_json::to_string_pretty(&both).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_both_forms() {
        let s = tool_call_schema_json();
        assert!(s.contains("tool_calls"));
        assert!(s.contains("\"tool\""));
        assert!(s.contains("args"));
    }
}
