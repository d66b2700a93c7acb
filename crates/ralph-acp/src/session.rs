//! Session-state accumulation for streamed agent updates
//!
//! While a `session/prompt` request is in flight the agent streams
//! `session/update` notifications. Two wire shapes exist for the same
//! payload - a flat object and a nested `{update: {sessionUpdate, ...}}`
//! object - so everything is normalized into `UpdatePayload` before it
//! touches session state.
//!
//! Tool calls are kept in arrival order; updates address entries by id, so
//! a late `tool_call_update` can never create a duplicate.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

/// Lifecycle states of an agent tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Pending => "pending",
            ToolCallStatus::Running => "running",
            ToolCallStatus::Completed => "completed",
            ToolCallStatus::Failed => "failed",
        }
    }

    fn from_wire(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ToolCallStatus::Pending),
            "running" | "in_progress" => Some(ToolCallStatus::Running),
            "completed" => Some(ToolCallStatus::Completed),
            "failed" => Some(ToolCallStatus::Failed),
            _ => None,
        }
    }
}

/// One agent-initiated tool call tracked across its updates.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// Normalized `session/update` payload.
#[derive(Debug, Clone, Default)]
pub struct UpdatePayload {
    pub kind: String,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub arguments: Option<Value>,
    pub status: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl UpdatePayload {
    /// Normalize a `session/update` params object.
    ///
    /// Flat shape: `{"kind": "...", "content": "...", "toolName": ...}`.
    /// Nested shape (Gemini): `{"update": {"sessionUpdate": "...",
    /// "content": {"text": "..."}, ...}}`.
    pub fn from_params(params: &Value) -> Self {
        match params.get("update") {
            Some(update) => {
                let kind = update
                    .get("sessionUpdate")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let content = match update.get("content") {
                    Some(Value::Object(obj)) => obj
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    Some(Value::String(text)) => text.clone(),
                    Some(other) if !other.is_null() => other.to_string(),
                    _ => String::new(),
                };
                Self {
                    kind,
                    content,
                    ..Self::from_fields(update)
                }
            }
            None => Self {
                kind: params
                    .get("kind")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                content: params
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                ..Self::from_fields(params)
            },
        }
    }

    /// Extract the tool-call fields shared by both wire shapes.
    fn from_fields(value: &Value) -> Self {
        Self {
            kind: String::new(),
            content: String::new(),
            tool_name: value
                .get("toolName")
                .and_then(Value::as_str)
                .map(str::to_string),
            tool_call_id: value
                .get("toolCallId")
                .and_then(Value::as_str)
                .map(str::to_string),
            arguments: value.get("arguments").cloned(),
            status: value
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            result: value.get("result").cloned(),
            error: value.get("error").map(|e| match e {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        }
    }
}

/// Accumulated state for one ACP session.
///
/// The session id is established once per adapter lifetime; content fields
/// reset per `session/prompt` while the id is preserved.
#[derive(Debug)]
pub struct SessionState {
    session_id: String,
    output: String,
    thoughts: String,
    tool_calls: Vec<ToolCall>,
    tool_call_index: HashMap<String, usize>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            output: String::new(),
            thoughts: String::new(),
            tool_calls: Vec::new(),
            tool_call_index: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn thoughts(&self) -> &str {
        &self.thoughts
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.tool_call_index.get(id).map(|&i| &self.tool_calls[i])
    }

    /// Clear content for a new prompt; the session id survives.
    pub fn reset(&mut self) {
        self.output.clear();
        self.thoughts.clear();
        self.tool_calls.clear();
        self.tool_call_index.clear();
    }

    /// Apply one normalized update in arrival order.
    pub fn process_update(&mut self, payload: &UpdatePayload) {
        match payload.kind.as_str() {
            "agent_message_chunk" => self.output.push_str(&payload.content),
            "agent_thought_chunk" => self.thoughts.push_str(&payload.content),
            "tool_call" => {
                let id = payload
                    .tool_call_id
                    .clone()
                    .unwrap_or_else(|| format!("tool_call_{}", self.tool_calls.len()));
                if self.tool_call_index.contains_key(&id) {
                    debug!(tool_call_id = %id, "duplicate tool_call notification ignored");
                    return;
                }
                let call = ToolCall::new(
                    id.clone(),
                    payload.tool_name.clone().unwrap_or_else(|| "unknown".to_string()),
                    payload.arguments.clone().unwrap_or(Value::Null),
                );
                self.tool_call_index.insert(id, self.tool_calls.len());
                self.tool_calls.push(call);
            }
            "tool_call_update" => {
                let Some(id) = payload.tool_call_id.as_deref() else {
                    debug!("tool_call_update without id dropped");
                    return;
                };
                let Some(&index) = self.tool_call_index.get(id) else {
                    // Late update for a call we never saw; drop by id lookup
                    // rather than creating a duplicate entry.
                    debug!(tool_call_id = %id, "tool_call_update for unknown id dropped");
                    return;
                };
                let call = &mut self.tool_calls[index];
                if let Some(status) = payload.status.as_deref().and_then(ToolCallStatus::from_wire)
                {
                    call.status = status;
                }
                if payload.result.is_some() {
                    call.result = payload.result.clone();
                }
                if payload.error.is_some() {
                    call.error = payload.error.clone();
                }
            }
            other => {
                debug!(kind = %other, "unhandled session update kind");
            }
        }
    }
}
