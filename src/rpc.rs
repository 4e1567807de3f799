//! Wire framing for the daemon's Unix-socket RPC (C10). One request per
//! connection, UTF-8 JSON, no length prefix; response is a single JSON
//! object followed by connection close — the same contract the original
//! socket daemon used, just typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::error::{RagexError, RagexResult};

pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn ok_stdout(text: impl Into<String>) -> Self {
        Self { success: true, stdout: Some(text.into()), returncode: Some(0), ..Default::default() }
    }

    pub fn ok_data(data: Value) -> Self {
        Self { success: true, data: Some(data), returncode: Some(0), ..Default::default() }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, error: Some(message.into()), returncode: Some(1), ..Default::default() }
    }

    pub fn from_result(result: RagexResult<Self>) -> Self {
        match result {
            Ok(response) => response,
            Err(RagexError::NotFound(msg)) => {
                Self { success: false, error: Some(msg), returncode: Some(2), ..Default::default() }
            }
            Err(e) => Self::err(e.to_string()),
        }
    }
}

/// Reads one framed request off `stream`. `MAX_MESSAGE_SIZE` bounds the read
/// so a misbehaving client can't grow an unbounded buffer.
pub async fn read_request(stream: &mut UnixStream) -> RagexResult<RpcRequest> {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Err(RagexError::invalid_input("empty request"));
    }
    buf.truncate(n);
    serde_json::from_slice(&buf).map_err(|e| RagexError::invalid_input(format!("invalid JSON request: {e}")))
}

/// Writes one framed response and shuts down the write half — the contract
/// is exactly one response per connection.
pub async fn write_response(stream: &mut UnixStream, response: &RpcResponse) -> RagexResult<()> {
    let text = serde_json::to_vec(response)?;
    stream.write_all(&text).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_default_args() {
        let req: RpcRequest = serde_json::from_str(r#"{"command":"status"}"#).unwrap();
        assert_eq!(req.command, "status");
        assert!(req.args.is_empty());
    }

    #[test]
    fn ok_stdout_sets_success_and_returncode_zero() {
        let r = RpcResponse::ok_stdout("done");
        assert!(r.success);
        assert_eq!(r.returncode, Some(0));
        assert_eq!(r.stdout.as_deref(), Some("done"));
    }

    #[test]
    fn not_found_maps_to_exit_code_two() {
        let r = RpcResponse::from_result(Err(RagexError::NotFound("no such project".into())));
        assert_eq!(r.returncode, Some(2));
        assert!(!r.success);
    }

    #[test]
    fn serializes_without_null_optional_fields() {
        let r = RpcResponse::ok_stdout("hi");
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("data").is_none());
    }
}
