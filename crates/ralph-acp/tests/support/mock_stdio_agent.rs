//! Scriptable mock ACP agent speaking line-delimited JSON-RPC on stdio
//!
//! Runs as a real subprocess in integration tests: answers `initialize`
//! and `session/new`, streams configurable `session/update` notifications
//! for `session/prompt`, and can issue its own permission / filesystem /
//! terminal requests back to the host before finishing the turn.

use std::io::{BufRead, BufReader, Stdin, Write};

use serde_json::{json, Value};

/// Behavior knobs for one mock-agent run.
#[derive(Debug, Clone)]
pub struct MockAgentConfig {
    /// Value advertised in the initialize response; `None` omits the field
    /// entirely (handshake-failure scenarios).
    pub protocol_version: Option<u64>,
    pub session_id: String,
    /// Message chunks streamed per prompt, in order.
    pub chunks: Vec<String>,
    /// Emit nested `{update: {sessionUpdate, content: {text}}}` payloads
    /// instead of the flat shape.
    pub nested_updates: bool,
    /// `stopReason` for the prompt response; `"error"` also attaches an
    /// error object.
    pub stop_reason: String,
    /// Stream a tool_call + completed tool_call_update pair.
    pub emit_tool_call: bool,
    /// Ask the host for permission before answering.
    pub request_permission: bool,
    /// Ask the host to read this file and echo its content as a chunk.
    pub request_read: Option<String>,
    /// Drive a full terminal create/wait/release cycle against the host.
    pub request_terminal: bool,
    /// Delay before answering `session/prompt`, in milliseconds.
    pub response_delay_ms: u64,
}

impl Default for MockAgentConfig {
    fn default() -> Self {
        Self {
            protocol_version: Some(1),
            session_id: "S1".to_string(),
            chunks: vec!["Hello ".to_string(), "World".to_string()],
            nested_updates: false,
            stop_reason: "end_turn".to_string(),
            emit_tool_call: false,
            request_permission: false,
            request_read: None,
            request_terminal: false,
            response_delay_ms: 0,
        }
    }
}

pub struct MockStdioAgent {
    config: MockAgentConfig,
    reader: BufReader<Stdin>,
    next_request_id: i64,
}

impl MockStdioAgent {
    pub fn new(config: MockAgentConfig) -> Self {
        Self {
            config,
            reader: BufReader::new(std::io::stdin()),
            next_request_id: 9000,
        }
    }

    /// Serve requests until stdin closes.
    pub fn run(&mut self) -> std::io::Result<()> {
        loop {
            let Some(message) = self.read_message()? else {
                return Ok(());
            };

            let method = message.get("method").and_then(Value::as_str);
            let id = message.get("id").and_then(Value::as_i64);

            match (method, id) {
                (Some("initialize"), Some(id)) => {
                    let mut result = json!({"capabilities": {}});
                    if let Some(version) = self.config.protocol_version {
                        result["protocolVersion"] = json!(version);
                    }
                    self.send(&json!({"jsonrpc": "2.0", "id": id, "result": result}))?;
                }
                (Some("session/new"), Some(id)) => {
                    self.send(&json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {"sessionId": self.config.session_id},
                    }))?;
                }
                (Some("session/prompt"), Some(id)) => {
                    self.handle_prompt(id)?;
                }
                (Some(method), Some(id)) => {
                    self.send(&json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("Method not found: {method}")},
                    }))?;
                }
                // Notifications and responses without a pending exchange
                // are ignored.
                _ => {}
            }
        }
    }

    fn handle_prompt(&mut self, id: i64) -> std::io::Result<()> {
        if self.config.response_delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.config.response_delay_ms));
        }

        let chunks = self.config.chunks.clone();
        for chunk in &chunks {
            self.send_update(&json!({"kind": "agent_message_chunk", "content": chunk}))?;
        }

        if self.config.emit_tool_call {
            self.send_update(&json!({
                "kind": "tool_call",
                "toolName": "read_file",
                "toolCallId": "call_1",
                "arguments": {"path": "/tmp/example.txt"},
            }))?;
            self.send_update(&json!({
                "kind": "tool_call_update",
                "toolCallId": "call_1",
                "status": "completed",
                "result": {"ok": true},
            }))?;
        }

        if self.config.request_permission {
            let response = self.call_host(
                "session/request_permission",
                json!({
                    "operation": "fs/write_text_file",
                    "options": [
                        {"id": "allow-once", "type": "allow"},
                        {"id": "deny-once", "type": "deny"},
                    ],
                }),
            )?;
            let outcome = response["result"]["outcome"]["outcome"]
                .as_str()
                .unwrap_or("missing")
                .to_string();
            self.send_update(&json!({
                "kind": "agent_message_chunk",
                "content": format!("permission:{outcome}"),
            }))?;
        }

        if let Some(path) = self.config.request_read.clone() {
            let response = self.call_host("fs/read_text_file", json!({"path": path}))?;
            let content = response["result"]["content"]
                .as_str()
                .unwrap_or("<unreadable>")
                .to_string();
            self.send_update(&json!({
                "kind": "agent_message_chunk",
                "content": format!("file:{content}"),
            }))?;
        }

        if self.config.request_terminal {
            let created =
                self.call_host("terminal/create", json!({"command": ["echo", "from-terminal"]}))?;
            let terminal_id = created["result"]["terminalId"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let waited = self.call_host(
                "terminal/wait_for_exit",
                json!({"terminalId": terminal_id, "timeout": 10.0}),
            )?;
            let exit_code = waited["result"]["exitCode"].as_i64().unwrap_or(-1);
            let output = self.call_host("terminal/output", json!({"terminalId": terminal_id}))?;
            let captured = output["result"]["output"]
                .as_str()
                .unwrap_or_default()
                .trim()
                .to_string();
            self.call_host("terminal/release", json!({"terminalId": terminal_id}))?;
            self.send_update(&json!({
                "kind": "agent_message_chunk",
                "content": format!("terminal-exit:{exit_code}:{captured}"),
            }))?;
        }

        let result = if self.config.stop_reason == "error" {
            json!({
                "stopReason": "error",
                "error": {"message": "mock agent failure"},
            })
        } else {
            json!({"stopReason": self.config.stop_reason})
        };
        self.send(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }

    /// Issue a request to the host and block until its response arrives.
    ///
    /// Host requests that arrive while waiting are answered inline so the
    /// exchange cannot deadlock.
    fn call_host(&mut self, method: &str, params: Value) -> std::io::Result<Value> {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method,
            "params": params,
        }))?;

        loop {
            let Some(message) = self.read_message()? else {
                return Ok(json!({}));
            };
            if message.get("id").and_then(Value::as_i64) == Some(request_id)
                && message.get("method").is_none()
            {
                return Ok(message);
            }
        }
    }

    fn send_update(&mut self, payload: &Value) -> std::io::Result<()> {
        let params = if self.config.nested_updates {
            let mut update = json!({
                "sessionUpdate": payload["kind"],
            });
            if let Some(content) = payload.get("content").and_then(Value::as_str) {
                update["content"] = json!({"text": content});
            }
            for key in ["toolName", "toolCallId", "arguments", "status", "result", "error"] {
                if let Some(value) = payload.get(key) {
                    update[key] = value.clone();
                }
            }
            json!({"sessionId": self.config.session_id, "update": update})
        } else {
            payload.clone()
        };

        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": params,
        }))
    }

    fn send(&mut self, frame: &Value) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{frame}")?;
        stdout.flush()
    }

    fn read_message(&mut self) -> std::io::Result<Option<Value>> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(value) => return Ok(Some(value)),
                Err(_) => continue,
            }
        }
    }
}
