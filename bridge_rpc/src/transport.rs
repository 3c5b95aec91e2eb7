//! JSON-RPC transport layer for engine communication.
//!
//! Reads and writes `Content-Length` framed JSON-RPC messages. The halves
//! are generic over tokio's async I/O traits so the client can run them on
//! the engine process's stdio and the tests on in-memory pipes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest message body accepted from the engine. A whole-buffer reply for
/// a very large file still fits; anything bigger is a framing error.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// JSON-RPC message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Wire request ID (can be number or string).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id as i64)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// Async transport over a pair of byte streams.
pub struct AsyncTransport<R, W> {
    input: BufReader<R>,
    output: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> AsyncTransport<R, W> {
    /// Creates a transport that reads from `input` and writes to `output`.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: BufReader::new(input),
            output,
        }
    }

    /// Splits the transport into separate read and write halves.
    pub fn split(self) -> (TransportReader<R>, TransportWriter<W>) {
        (
            TransportReader { input: self.input },
            TransportWriter {
                output: self.output,
            },
        )
    }
}

/// Write half of the transport.
pub struct TransportWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> TransportWriter<W> {
    /// Sends a JSON-RPC request.
    pub async fn send_request(
        &mut self,
        id: impl Into<RequestId>,
        method: &str,
        params: Option<Value>,
    ) -> std::io::Result<()> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        };
        self.send_message(&serde_json::to_value(request)?).await
    }

    /// Sends a JSON-RPC notification.
    pub async fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> std::io::Result<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.send_message(&serde_json::to_value(notification)?).await
    }

    /// Sends a raw JSON-RPC message.
    async fn send_message(&mut self, message: &Value) -> std::io::Result<()> {
        let content = serde_json::to_string(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", content.len());

        self.output.write_all(header.as_bytes()).await?;
        self.output.write_all(content.as_bytes()).await?;
        self.output.flush().await?;

        log::trace!("Sent: {}", content);
        Ok(())
    }
}

/// Read half of the transport.
pub struct TransportReader<R> {
    input: BufReader<R>,
}

impl<R: AsyncRead + Unpin> TransportReader<R> {
    /// Reads the next JSON-RPC message.
    pub async fn read_message(&mut self) -> std::io::Result<Value> {
        // Read headers
        let mut content_length: Option<usize> = None;
        let mut header_line = String::new();

        loop {
            header_line.clear();
            let bytes_read = self.input.read_line(&mut header_line).await?;
            if bytes_read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "Engine closed connection",
                ));
            }

            let line = header_line.trim();
            if line.is_empty() {
                break;
            }

            if let Some(len_str) = line.strip_prefix("Content-Length: ") {
                content_length = Some(len_str.parse().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid Content-Length")
                })?);
            }
        }

        let content_length = content_length.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "Missing Content-Length header")
        })?;
        if content_length > MAX_CONTENT_LENGTH {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Content-Length {} exceeds {}", content_length, MAX_CONTENT_LENGTH),
            ));
        }

        let mut content = vec![0u8; content_length];
        self.input.read_exact(&mut content).await?;

        let content_str = String::from_utf8(content).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid UTF-8 in message")
        })?;

        log::trace!("Received: {}", content_str);

        serde_json::from_str(&content_str).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("Invalid JSON: {}", e))
        })
    }
}

/// Parses a JSON-RPC message to determine its type.
pub fn parse_message(value: &Value) -> Option<JsonRpcMessage> {
    let has_id = value.get("id").is_some();
    let has_method = value.get("method").is_some();

    let parsed = match (has_id, has_method) {
        (true, false) => serde_json::from_value(value.clone()).map(JsonRpcMessage::Response),
        (true, true) => serde_json::from_value(value.clone()).map(JsonRpcMessage::Request),
        (false, true) => serde_json::from_value(value.clone()).map(JsonRpcMessage::Notification),
        (false, false) => return None,
    };
    parsed.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let (_, mut writer) = AsyncTransport::new(client_read, client_write).split();
        let (mut reader, _) = AsyncTransport::new(server_read, server_write).split();

        writer
            .send_request(7u64, "buffer/getLines", Some(json!({ "buffer": 3 })))
            .await
            .unwrap();
        let value = reader.read_message().await.unwrap();

        match parse_message(&value) {
            Some(JsonRpcMessage::Request(request)) => {
                assert_eq!(request.id, RequestId::Number(7));
                assert_eq!(request.method, "buffer/getLines");
                assert_eq!(request.params, Some(json!({ "buffer": 3 })));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reads_consecutive_messages() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let (_, mut writer) = AsyncTransport::new(client_read, client_write).split();
        let (mut reader, _) = AsyncTransport::new(server_read, server_write).split();

        writer
            .send_notification("buffer/close", Some(json!({ "buffer": 1 })))
            .await
            .unwrap();
        // Multi-byte content must be framed by byte length.
        writer
            .send_notification("buffer/lines", Some(json!({ "lines": ["héllo 😀"] })))
            .await
            .unwrap();

        let first = reader.read_message().await.unwrap();
        let second = reader.read_message().await.unwrap();
        assert_eq!(first["method"], "buffer/close");
        assert_eq!(second["params"]["lines"][0], "héllo 😀");
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut reader, _) = AsyncTransport::new(server_read, server_write).split();

        client.write_all(b"X-Other: 1\r\n\r\n{}").await.unwrap();
        let err = reader.read_message().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut reader, _) = AsyncTransport::new(server_read, server_write).split();

        let header = format!("Content-Length: {}\r\n\r\n", MAX_CONTENT_LENGTH + 1);
        client.write_all(header.as_bytes()).await.unwrap();
        let err = reader.read_message().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_eof_is_reported() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut reader, _) = AsyncTransport::new(server_read, server_write).split();

        let err = reader.read_message().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_parse_message_kinds() {
        let response = json!({ "jsonrpc": "2.0", "id": 1, "result": { "buffer": 2 } });
        assert!(matches!(parse_message(&response), Some(JsonRpcMessage::Response(_))));

        let notification = json!({ "jsonrpc": "2.0", "method": "cursor/moved", "params": {} });
        assert!(matches!(
            parse_message(&notification),
            Some(JsonRpcMessage::Notification(_))
        ));

        assert!(parse_message(&json!({ "jsonrpc": "2.0" })).is_none());
    }
}
