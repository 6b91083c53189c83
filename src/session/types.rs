//! JSON-RPC 2.0 消息与工具协议结构
//!
//! 线上格式：每行一个 JSON 对象。`tools/call` 的结果是若干内容片段，
//! 由 [`ToolResponse::from_result`] 逐个解析并按顺序聚合，从不截断为第一个。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 协议版本（initialize 握手中上报）
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// 非法内容片段在错误消息中保留的最大字符数
const INVALID_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// 无需响应的通知
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// `tools/list` 返回的工具定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// `tools/call` 结果中的单个内容片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// 聚合后的工具响应：片段按原顺序逐个解析
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub parts: Vec<Value>,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn from_result(result: CallToolResult) -> Self {
        Self {
            parts: result.content.iter().map(parse_part).collect(),
            is_error: result.is_error,
        }
    }

    /// 单片段直接返回其值，多片段返回有序数组
    pub fn into_value(self) -> Value {
        match self.parts.len() {
            0 => Value::Null,
            1 => self.parts.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(self.parts),
        }
    }
}

/// 解析一个内容片段：文本按 JSON 解析，空或非法文本转成错误对象而不是抛错；
/// 非文本片段保留原样
fn parse_part(part: &ContentPart) -> Value {
    let Some(text) = part.text.as_deref() else {
        return json!({ "result": serde_json::to_value(part).unwrap_or(Value::Null) });
    };
    match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => {
            let preview = if text.is_empty() {
                "empty".to_string()
            } else {
                text.chars().take(INVALID_PREVIEW_CHARS).collect()
            };
            json!({ "error": format!("Invalid JSON response: {preview}") })
        }
    }
}

/// initialize 请求参数
pub fn initialize_params(client_name: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": client_name, "version": env!("CARGO_PKG_VERSION") },
    })
}
