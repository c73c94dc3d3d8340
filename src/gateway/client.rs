// Keyward — Control socket client
//
// Used by the daemon-bound CLI commands. One connection per command, one
// request line out, one response line back.

use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use super::GatewayError;

pub struct GatewayClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_id: u64,
}

impl GatewayClient {
    pub async fn connect(socket_path: &Path) -> Result<Self, GatewayError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|source| GatewayError::Unreachable {
                path: socket_path.display().to_string(),
                source,
            })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 1,
        })
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let request = JsonRpcRequest::new(self.next_id, method, params);
        self.next_id += 1;

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(GatewayError::Closed);
        }

        let response: JsonRpcResponse = serde_json::from_str(&reply)?;
        match (response.result, response.error) {
            (_, Some(error)) => Err(GatewayError::Rpc {
                code: error.code,
                message: error.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
