//! 行分隔的 JSON-RPC 传输
//!
//! 一行一个 JSON 对象。请求写入后持续读行，直到遇到 id 匹配的响应；
//! 空行、日志输出、其他 id 的响应一律跳过。读到 EOF 视为通道断开（致命）。

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::error::SessionError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// 单会话传输；调用方负责串行化（同一时刻只有一个在途请求）
pub struct LineTransport {
    provider: String,
    writer: BoxedWriter,
    reader: BufReader<BoxedReader>,
    next_id: AtomicU64,
}

impl LineTransport {
    pub fn new(provider: &str, writer: BoxedWriter, reader: BoxedReader) -> Self {
        Self {
            provider: provider.to_string(),
            writer,
            reader: BufReader::new(reader),
            next_id: AtomicU64::new(1),
        }
    }

    fn transport_err(&self, reason: String) -> SessionError {
        SessionError::Transport {
            provider: self.provider.clone(),
            reason,
        }
    }

    async fn write_line(&mut self, payload: String) -> Result<(), SessionError> {
        let mut line = payload;
        line.push('\n');
        if let Err(e) = self.writer.write_all(line.as_bytes()).await {
            return Err(self.transport_err(format!("write failed: {e}")));
        }
        if let Err(e) = self.writer.flush().await {
            return Err(self.transport_err(format!("flush failed: {e}")));
        }
        Ok(())
    }

    /// 发送请求并等待匹配的结果；JSON-RPC error 转为 SessionError::Server
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| self.transport_err(format!("serialize failed: {e}")))?;
        self.write_line(payload).await?;

        let response = self.read_response(id).await?;
        if let Some(err) = response.error {
            return Err(SessionError::Server {
                code: err.code,
                message: err.message,
            });
        }
        response.result.ok_or(SessionError::Server {
            code: -32603,
            message: "response missing both result and error".into(),
        })
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| self.transport_err(format!("serialize failed: {e}")))?;
        self.write_line(payload).await
    }

    async fn read_response(&mut self, id: u64) -> Result<JsonRpcResponse, SessionError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = match self.reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(e) => return Err(self.transport_err(format!("read failed: {e}"))),
            };
            if read == 0 {
                return Err(self.transport_err("provider stdout closed".into()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(provider = %self.provider, stale_id = resp.id, "skipping unmatched response");
                }
                Err(_) => {
                    tracing::debug!(provider = %self.provider, line = %trimmed, "skipping non-protocol output");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn pair() -> (LineTransport, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (client_out, server_in) = duplex(4096);
        let (server_out, client_in) = duplex(4096);
        let transport = LineTransport::new("fake", Box::new(client_out), Box::new(client_in));
        (transport, server_in, server_out)
    }

    #[tokio::test]
    async fn test_skips_noise_and_matches_id() {
        let (mut transport, server_in, mut server_out) = pair();
        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_in).lines();
            let req: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let id = req["id"].as_u64().unwrap();
            let noise = format!(
                "starting up...\n\n{}\n{}\n",
                json!({"jsonrpc": "2.0", "id": id + 100, "result": {}}),
                json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}})
            );
            server_out.write_all(noise.as_bytes()).await.unwrap();
        });

        let result = transport.request("ping", None).await.unwrap();
        assert_eq!(result["ok"], true);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_error_is_server_error() {
        let (mut transport, server_in, mut server_out) = pair();
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_in).lines();
            let req: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let resp = json!({"jsonrpc": "2.0", "id": req["id"], "error": {"code": -32601, "message": "no such method"}});
            server_out.write_all(format!("{resp}\n").as_bytes()).await.unwrap();
        });

        let err = transport.request("nope", None).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Server {
                code: -32601,
                message: "no such method".into()
            }
        );
    }

    #[tokio::test]
    async fn test_closed_stdout_is_fatal() {
        let (mut transport, _server_in, server_out) = pair();
        drop(server_out);
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
