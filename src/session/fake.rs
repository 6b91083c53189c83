//! 测试用的进程内假 provider（基于 tokio::io::duplex）

use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use super::client::ExternalSession;

/// 假 provider 支持的工具：
/// - echo：把 arguments 原样作为单个片段返回
/// - split：arguments.parts 中每个字符串作为一个片段
/// - crash：直接断开连接
/// - slow：等待 arguments.ms 毫秒后返回
pub async fn serve(input: DuplexStream, mut output: DuplexStream) {
    let mut lines = BufReader::new(input).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(req) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(id) = req.get("id").cloned() else {
            continue;
        };
        let method = req["method"].as_str().unwrap_or_default();
        let params = &req["params"];
        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0", "id": id,
                "result": {"protocolVersion": "2024-11-05", "capabilities": {}, "serverInfo": {"name": "fake"}}
            }),
            "tools/list" => json!({
                "jsonrpc": "2.0", "id": id,
                "result": {"tools": [
                    {"name": "echo", "description": "Echo the arguments", "inputSchema": {"type": "object"}},
                    {"name": "split", "description": "One part per string", "inputSchema": {"type": "object"}}
                ]}
            }),
            "tools/call" => {
                let args = &params["arguments"];
                match params["name"].as_str().unwrap_or_default() {
                    "echo" => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"content": [{"type": "text", "text": args.to_string()}], "isError": false}
                    }),
                    "split" => {
                        let parts: Vec<Value> = args["parts"]
                            .as_array()
                            .cloned()
                            .unwrap_or_default()
                            .into_iter()
                            .map(|p| json!({"type": "text", "text": p.as_str().unwrap_or_default()}))
                            .collect();
                        json!({"jsonrpc": "2.0", "id": id, "result": {"content": parts, "isError": false}})
                    }
                    "crash" => return,
                    "slow" => {
                        let ms = args["ms"].as_u64().unwrap_or(0);
                        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                        json!({
                            "jsonrpc": "2.0", "id": id,
                            "result": {"content": [{"type": "text", "text": "{\"done\": true}"}], "isError": false}
                        })
                    }
                    other => json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": {"code": -32602, "message": format!("unknown tool {other}")}
                    }),
                }
            }
            other => json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")}
            }),
        };
        if output.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
            return;
        }
    }
}

/// 创建连接到假 provider 的会话（未初始化）
pub fn session(provider: &str) -> ExternalSession {
    let (client_out, server_in) = duplex(64 * 1024);
    let (server_out, client_in) = duplex(64 * 1024);
    tokio::spawn(serve(server_in, server_out));
    ExternalSession::from_streams(provider, Box::new(client_out), Box::new(client_in))
}
