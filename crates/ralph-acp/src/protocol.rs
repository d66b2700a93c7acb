//! JSON-RPC 2.0 frame codec for the ACP wire protocol
//!
//! Framing is line-oriented: one JSON object per line, `\n` terminated.
//! Four outbound shapes (request, notification, response, error response)
//! and a tagged parse result covering the same four inbound shapes plus the
//! two failure modes (malformed JSON, wrong/missing `jsonrpc` field).
//!
//! Request ids are assigned monotonically from 1 and are unique per codec
//! instance; since every outbound frame passes through the single writer
//! task, frames land on the wire in id order.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC error codes used on the ACP wire.
///
/// Standard codes occupy `-32700..-32603`; application codes occupy
/// `-32001..-32099` with `-32000` as the generic application failure.
pub mod codes {
    /// Malformed JSON received
    pub const PARSE_ERROR: i64 = -32700;
    /// Frame is not a valid JSON-RPC 2.0 object
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Missing or malformed parameters
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal host error
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Generic application failure (OS errors, wait timeouts)
    pub const AGENT_ERROR: i64 = -32000;
    /// Command or terminal not found
    pub const NOT_FOUND: i64 = -32001;
    /// Path is a directory / not a regular file
    pub const NOT_A_FILE: i64 = -32002;
    /// Permission denied on a file or command
    pub const ACCESS_DENIED: i64 = -32003;
    /// File content is not valid UTF-8
    pub const INVALID_UTF8: i64 = -32004;
}

/// JSON-RPC error object carried by error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }
}

/// Tagged result of parsing one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Agent-initiated request (has `method` and `id`)
    Request {
        id: i64,
        method: String,
        params: Value,
    },
    /// Agent-initiated notification (has `method`, no `id`)
    Notification { method: String, params: Value },
    /// Successful response to one of our requests
    Response { id: i64, result: Value },
    /// Error response to one of our requests
    Error { id: Option<i64>, error: RpcError },
    /// Line was not valid JSON
    ParseError { message: String },
    /// JSON object without a valid `jsonrpc: "2.0"` envelope
    Invalid { message: String, id: Option<i64> },
}

/// Frame builder and parser. One instance per subprocess client; the id
/// counter is the per-client monotonic sequence.
#[derive(Debug, Default)]
pub struct ProtocolCodec {
    next_id: AtomicU64,
}

impl ProtocolCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a request frame, returning the assigned id and the serialized
    /// line (without trailing newline).
    pub fn create_request(&self, method: &str, params: Value) -> (u64, String) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        (id, frame.to_string())
    }

    /// Build a notification frame (no id, no response expected).
    pub fn create_notification(&self, method: &str, params: Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        })
        .to_string()
    }

    /// Build a success response to an agent request.
    pub fn create_response(&self, id: i64, result: Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        })
        .to_string()
    }

    /// Build an error response to an agent request.
    pub fn create_error_response(&self, id: i64, error: &RpcError) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        })
        .to_string()
    }

    /// Parse one inbound line into its tagged shape.
    ///
    /// Never panics on malformed input: bad JSON yields `ParseError`, a
    /// missing or wrong `jsonrpc` field yields `Invalid` (carrying the id if
    /// one was present so the caller can reply with a protocol error).
    pub fn parse_message(&self, line: &str) -> IncomingMessage {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                return IncomingMessage::ParseError {
                    message: format!("invalid JSON: {err}"),
                }
            }
        };

        let id = value.get("id").and_then(Value::as_i64);

        match value.get("jsonrpc").and_then(Value::as_str) {
            Some("2.0") => {}
            Some(other) => {
                return IncomingMessage::Invalid {
                    message: format!("unsupported jsonrpc version: {other}"),
                    id,
                }
            }
            None => {
                return IncomingMessage::Invalid {
                    message: "missing jsonrpc field".to_string(),
                    id,
                }
            }
        }

        let method = value.get("method").and_then(Value::as_str);
        let params = value.get("params").cloned().unwrap_or_else(|| json!({}));

        match (method, id) {
            (Some(method), Some(id)) => IncomingMessage::Request {
                id,
                method: method.to_string(),
                params,
            },
            (Some(method), None) => IncomingMessage::Notification {
                method: method.to_string(),
                params,
            },
            (None, _) => {
                if let Some(error_value) = value.get("error") {
                    let error = serde_json::from_value::<RpcError>(error_value.clone())
                        .unwrap_or_else(|_| {
                            RpcError::new(codes::INTERNAL_ERROR, error_value.to_string())
                        });
                    IncomingMessage::Error { id, error }
                } else if let Some(id) = id {
                    IncomingMessage::Response {
                        id,
                        result: value.get("result").cloned().unwrap_or(Value::Null),
                    }
                } else {
                    IncomingMessage::Invalid {
                        message: "frame has neither method nor id".to_string(),
                        id: None,
                    }
                }
            }
        }
    }
}
