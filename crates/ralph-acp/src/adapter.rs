//! ACP adapter: agent lifecycle over the subprocess client
//!
//! Drives the one-shot ACP handshake (`initialize`, `session/new`), then
//! serves `aexecute` calls by sending `session/prompt` and accumulating the
//! streamed `session/update` notifications into the session state. Inbound
//! requests (permission, filesystem, terminal) route to the tool handlers.
//!
//! State machine:
//!
//! ```text
//! created -> initializing -> ready <-> prompting
//!                 |            |
//!                 v            v
//!              stopped <- stopping
//! ```
//!
//! Shutdown kills every registered terminal (they outlive individual
//! prompts by design) before stopping the client.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use ralph_config::AcpSettings;
use ralph_core::{RalphError, Result, ToolAdapter, ToolResponse};

use crate::client::AcpClient;
use crate::filesystem;
use crate::permission::{PermissionDecision, PermissionEngine, PermissionRequest};
use crate::protocol::{codes, RpcError};
use crate::session::{SessionState, UpdatePayload};
use crate::terminal::TerminalTable;

/// ACP protocol version this adapter speaks. The wire field is an integer.
pub const ACP_PROTOCOL_VERSION: u64 = 1;

/// Marker separating orchestration instructions from the user prompt.
const ORIGINAL_PROMPT_MARKER: &str = "ORIGINAL PROMPT:";

/// Adapter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Created,
    Initializing,
    Ready,
    Prompting,
    Stopping,
    Stopped,
}

/// Adapter for ACP-compliant agents (Gemini CLI, claude-code-acp, ...).
pub struct AcpAdapter {
    settings: AcpSettings,
    available: bool,
    client: Arc<AcpClient>,
    session: Arc<Mutex<Option<SessionState>>>,
    permissions: Arc<PermissionEngine>,
    terminals: Arc<TerminalTable>,
    state: Mutex<AdapterState>,
    handlers_registered: AtomicBool,
}

impl AcpAdapter {
    /// Build an adapter from settings. Availability is probed immediately;
    /// nothing is spawned until the first `aexecute`.
    pub fn new(settings: AcpSettings) -> Self {
        let args = augment_agent_args(&settings.agent_command, settings.agent_args.clone());
        let client = AcpClient::new(settings.agent_command.clone(), args)
            .with_timeout(Duration::from_secs(settings.timeout_seconds));
        let permissions = PermissionEngine::new(
            settings.permission_mode,
            settings.permission_allowlist.clone(),
        );
        let available = which::which(&settings.agent_command).is_ok();

        Self {
            settings,
            available,
            client: Arc::new(client),
            session: Arc::new(Mutex::new(None)),
            permissions: Arc::new(permissions),
            terminals: Arc::new(TerminalTable::new()),
            state: Mutex::new(AdapterState::Created),
            handlers_registered: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    pub fn agent_command(&self) -> &str {
        &self.settings.agent_command
    }

    /// Session id once the handshake has completed.
    pub fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.session_id().to_string())
    }

    /// Permission decision history `(request, decision)` pairs.
    pub fn permission_history(&self) -> Vec<(PermissionRequest, PermissionDecision)> {
        self.permissions.history()
    }

    /// `(approved, denied)` permission counters.
    pub fn permission_stats(&self) -> (usize, usize) {
        (
            self.permissions.approved_count(),
            self.permissions.denied_count(),
        )
    }

    /// Best-effort synchronous subprocess kill for signal handlers.
    pub fn kill_subprocess_now(&self) {
        self.client.kill_now();
    }

    /// One-shot handshake: start the client, register handlers, negotiate
    /// the protocol, open the session.
    async fn initialize(&self) -> Result<()> {
        if matches!(self.state(), AdapterState::Ready | AdapterState::Prompting) {
            return Ok(());
        }
        *self.state.lock() = AdapterState::Initializing;

        if let Err(err) = self.client.start().await {
            *self.state.lock() = AdapterState::Stopped;
            return Err(err);
        }
        self.register_handlers();

        match self.handshake().await {
            Ok(()) => {
                *self.state.lock() = AdapterState::Ready;
                info!(agent = %self.settings.agent_command, "ACP adapter ready");
                Ok(())
            }
            Err(err) => {
                // A failed handshake leaves nothing worth keeping alive.
                self.client.stop().await;
                *self.state.lock() = AdapterState::Stopped;
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<()> {
        let timeout = self.client.request_timeout();
        let timeout_secs = timeout.as_secs();

        let init_future = self.client.send_request(
            "initialize",
            json!({
                "protocolVersion": ACP_PROTOCOL_VERSION,
                "clientCapabilities": {
                    "fs": {
                        "readTextFile": true,
                        "writeTextFile": true,
                    },
                    "terminal": true,
                },
                "clientInfo": {
                    "name": "ralph",
                    "title": "Ralph Orchestrator",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )?;
        let init_response = tokio::time::timeout(timeout, init_future)
            .await
            .map_err(|_| RalphError::Timeout(timeout_secs))??;

        if init_response.get("protocolVersion").is_none() {
            return Err(RalphError::InvalidResponse(
                "initialize response missing protocolVersion".to_string(),
            ));
        }

        let cwd = std::env::current_dir()?;
        let session_future = self.client.send_request(
            "session/new",
            json!({
                "cwd": cwd.display().to_string(),
                "mcpServers": [],
            }),
        )?;
        let session_response = tokio::time::timeout(timeout, session_future)
            .await
            .map_err(|_| RalphError::Timeout(timeout_secs))??;

        let session_id = session_response
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RalphError::InvalidResponse("session/new response missing sessionId".to_string())
            })?;

        *self.session.lock() = Some(SessionState::new(session_id));
        Ok(())
    }

    /// Wire the notification and request handlers into the client. Runs
    /// once per adapter; handler registrations survive client restarts.
    fn register_handlers(&self) {
        if self.handlers_registered.swap(true, Ordering::SeqCst) {
            return;
        }

        let session = Arc::clone(&self.session);
        self.client.on_notification(move |method, params| {
            if method != "session/update" {
                return;
            }
            let payload = UpdatePayload::from_params(params);
            if let Some(state) = session.lock().as_mut() {
                state.process_update(&payload);
            }
        });

        let permissions = Arc::clone(&self.permissions);
        let terminals = Arc::clone(&self.terminals);
        self.client.on_request(move |method, params| {
            let permissions = Arc::clone(&permissions);
            let terminals = Arc::clone(&terminals);
            Box::pin(async move { route_request(&method, params, permissions, terminals).await })
        });
    }

    /// Metadata block attached to every response from this adapter.
    fn response_metadata(&self, stop_reason: &str) -> serde_json::Map<String, Value> {
        let session = self.session.lock();
        let mut metadata = serde_json::Map::new();
        metadata.insert("tool".into(), Value::from("acp"));
        metadata.insert(
            "agent".into(),
            Value::from(self.settings.agent_command.clone()),
        );
        metadata.insert(
            "session_id".into(),
            session
                .as_ref()
                .map(|s| Value::from(s.session_id()))
                .unwrap_or(Value::Null),
        );
        metadata.insert("stop_reason".into(), Value::from(stop_reason));
        metadata.insert(
            "tool_calls_count".into(),
            Value::from(session.as_ref().map(|s| s.tool_calls().len()).unwrap_or(0)),
        );
        metadata.insert(
            "has_thoughts".into(),
            Value::from(
                session
                    .as_ref()
                    .map(|s| !s.thoughts().is_empty())
                    .unwrap_or(false),
            ),
        );
        metadata
    }

    fn session_output(&self) -> String {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.output().to_string())
            .unwrap_or_default()
    }

    /// Execute one enhanced prompt through `session/prompt`.
    async fn execute_prompt(&self, prompt: &str) -> ToolResponse {
        if let Some(state) = self.session.lock().as_mut() {
            state.reset();
        }
        *self.state.lock() = AdapterState::Prompting;

        let session_id = self.session_id().unwrap_or_default();
        let timeout = self.client.request_timeout();
        let timeout_secs = timeout.as_secs();

        let future = match self.client.send_request(
            "session/prompt",
            json!({
                "sessionId": session_id,
                "prompt": [{"type": "text", "text": prompt}],
            }),
        ) {
            Ok(future) => future,
            Err(err) => {
                *self.state.lock() = AdapterState::Ready;
                let mut response = ToolResponse::failure(format!("ACP error: {err}"));
                response.metadata = self.response_metadata("error");
                return response;
            }
        };

        let outcome = tokio::time::timeout(timeout, future).await;
        *self.state.lock() = AdapterState::Ready;

        match outcome {
            // Deadline expired; the pending entry stays behind for stop()
            // to drain.
            Err(_) => {
                let mut response = ToolResponse::failure(format!(
                    "Prompt execution timed out after {timeout_secs} seconds"
                ));
                response.output = self.session_output();
                response.metadata = self.response_metadata("timeout");
                response
            }
            Ok(Err(err)) => {
                let mut response = ToolResponse::failure(format!("ACP error: {err}"));
                response.output = self.session_output();
                response.metadata = self.response_metadata("error");
                response
            }
            Ok(Ok(result)) => {
                let stop_reason = result
                    .get("stopReason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();

                if stop_reason == "error" {
                    let message = result
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error from agent")
                        .to_string();
                    let mut response = ToolResponse::failure(message);
                    response.output = self.session_output();
                    response.metadata = self.response_metadata(&stop_reason);
                    response
                } else {
                    let mut response = ToolResponse::ok(self.session_output());
                    response.metadata = self.response_metadata(&stop_reason);
                    response
                }
            }
        }
    }

    /// Orderly teardown: terminals first, then the client.
    pub async fn shutdown(&self) {
        *self.state.lock() = AdapterState::Stopping;
        self.terminals.kill_all().await;
        self.client.stop().await;
        *self.session.lock() = None;
        *self.state.lock() = AdapterState::Stopped;
        debug!(agent = %self.settings.agent_command, "ACP adapter stopped");
    }
}

#[async_trait]
impl ToolAdapter for AcpAdapter {
    fn name(&self) -> &str {
        "acp"
    }

    fn available(&self) -> bool {
        self.available
    }

    async fn aexecute(
        &self,
        prompt: &str,
        _prompt_file: Option<&Path>,
        _verbose: bool,
    ) -> ToolResponse {
        if !self.available {
            return ToolResponse::failure(format!(
                "ACP adapter not available: {} not found",
                self.settings.agent_command
            ));
        }

        if let Err(err) = self.initialize().await {
            return ToolResponse::failure(format!("ACP error: {err}"));
        }

        let enhanced = enhance_prompt(prompt);
        self.execute_prompt(&enhanced).await
    }

    /// ACP backends report no billing data.
    fn estimate_cost(&self, _prompt: &str) -> f64 {
        0.0
    }

    fn kill_subprocess_sync(&self) {
        self.kill_subprocess_now();
    }

    async fn shutdown(&self) {
        AcpAdapter::shutdown(self).await;
    }
}

/// Route one inbound agent request to its tool handler.
async fn route_request(
    method: &str,
    params: Value,
    permissions: Arc<PermissionEngine>,
    terminals: Arc<TerminalTable>,
) -> std::result::Result<Value, RpcError> {
    debug!(method, "inbound agent request");
    match method {
        // Interactive mode reads the TTY, so the decision runs on the
        // blocking pool.
        "session/request_permission" => {
            tokio::task::spawn_blocking(move || permissions.handle_request(&params))
                .await
                .map_err(|_| RpcError::new(codes::INTERNAL_ERROR, "permission handler panicked"))
        }
        "fs/read_text_file" => filesystem::handle_read_text_file(&params).await,
        "fs/write_text_file" => filesystem::handle_write_text_file(&params).await,
        "terminal/create" => terminals.create(&params).await,
        "terminal/output" => terminals.output(&params).await,
        "terminal/wait_for_exit" => terminals.wait_for_exit(&params).await,
        "terminal/kill" => terminals.kill(&params).await,
        "terminal/release" => terminals.release(&params).await,
        other => {
            warn!(method = other, "unknown agent request method");
            Err(RpcError::method_not_found(other))
        }
    }
}

/// Auto-inject the flags Gemini CLI needs to enter ACP mode.
///
/// Applies only when the command basename is exactly `gemini`; other agent
/// commands pass through untouched. The allowed-tools list is limited to
/// read-only FS and search tools - write_file and run_shell_command fall
/// back to the ACP host handlers.
fn augment_agent_args(command: &str, mut args: Vec<String>) -> Vec<String> {
    let basename = Path::new(command)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(command);
    if basename != "gemini" {
        return args;
    }

    if !args.iter().any(|a| a == "--experimental-acp") {
        args.push("--experimental-acp".to_string());
    }
    if !args.iter().any(|a| a == "--yolo") {
        args.push("--yolo".to_string());
    }
    if !args.iter().any(|a| a == "--allowed-tools") {
        args.extend(
            [
                "--allowed-tools",
                "list_directory",
                "read_many_files",
                "read_file",
                "web_fetch",
                "google_web_search",
            ]
            .map(String::from),
        );
    }
    args
}

/// Prepend the orchestration header and scratchpad instructions.
///
/// Idempotent: a prompt that already carries the original-prompt marker is
/// returned unchanged, so repeated enhancement across fallback attempts
/// cannot stack headers.
fn enhance_prompt(prompt: &str) -> String {
    if prompt.contains(ORIGINAL_PROMPT_MARKER) || prompt.contains("Agent Scratchpad") {
        return prompt.to_string();
    }

    format!(
        "You are running inside an automated orchestration loop. The same \
prompt is sent repeatedly until the task is complete. Work incrementally: \
finish one concrete step per iteration, and when every task is done, mark \
the TASK_COMPLETE checkbox in the prompt file.

## Agent Scratchpad
Before starting your work, check if .agent/scratchpad.md exists in the \
current working directory. If it does, read it to understand what was \
accomplished in previous iterations and continue from there.

At the end of your iteration, update .agent/scratchpad.md with:
- What you accomplished this iteration
- What remains to be done
- Any important context or decisions made
- Current blockers or issues (if any)

Do NOT restart from scratch if the scratchpad shows previous progress. \
Continue where the previous iteration left off.

Create the .agent/ directory if it doesn't exist.

---
{ORIGINAL_PROMPT_MARKER}

{prompt}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_config::PermissionMode;

    fn settings(command: &str) -> AcpSettings {
        AcpSettings {
            agent_command: command.to_string(),
            agent_args: Vec::new(),
            timeout_seconds: 5,
            permission_mode: PermissionMode::AutoApprove,
            permission_allowlist: Vec::new(),
        }
    }

    #[test]
    fn test_gemini_args_injected() {
        let args = augment_agent_args("gemini", vec![]);
        assert!(args.contains(&"--experimental-acp".to_string()));
        assert!(args.contains(&"--yolo".to_string()));
        assert!(args.contains(&"--allowed-tools".to_string()));
        assert!(args.contains(&"google_web_search".to_string()));
    }

    #[test]
    fn test_gemini_args_injected_for_full_path() {
        let args = augment_agent_args("/usr/local/bin/gemini", vec![]);
        assert!(args.contains(&"--experimental-acp".to_string()));
    }

    #[test]
    fn test_gemini_args_not_duplicated() {
        let args = augment_agent_args(
            "gemini",
            vec!["--experimental-acp".to_string(), "--yolo".to_string()],
        );
        assert_eq!(
            args.iter().filter(|a| *a == "--experimental-acp").count(),
            1
        );
        assert_eq!(args.iter().filter(|a| *a == "--yolo").count(), 1);
    }

    #[test]
    fn test_non_gemini_args_untouched() {
        let args = augment_agent_args("claude-code-acp", vec!["--flag".to_string()]);
        assert_eq!(args, vec!["--flag".to_string()]);
    }

    #[test]
    fn test_enhance_prompt_adds_header_and_scratchpad() {
        let enhanced = enhance_prompt("Build the widget.");
        assert!(enhanced.contains("Agent Scratchpad"));
        assert!(enhanced.contains(".agent/scratchpad.md"));
        assert!(enhanced.contains(ORIGINAL_PROMPT_MARKER));
        assert!(enhanced.ends_with("Build the widget."));
    }

    #[test]
    fn test_enhance_prompt_is_idempotent() {
        let once = enhance_prompt("Build the widget.");
        let twice = enhance_prompt(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_new_adapter_starts_in_created_state() {
        let adapter = AcpAdapter::new(settings("definitely-not-on-path-xyz"));
        assert_eq!(adapter.state(), AdapterState::Created);
        assert!(!adapter.available());
        assert!(adapter.session_id().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_adapter_fails_fast() {
        let adapter = AcpAdapter::new(settings("definitely-not-on-path-xyz"));
        let response = adapter.aexecute("do things", None, false).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn test_shutdown_from_created_state_is_safe() {
        let adapter = AcpAdapter::new(settings("definitely-not-on-path-xyz"));
        adapter.shutdown().await;
        assert_eq!(adapter.state(), AdapterState::Stopped);
    }

    #[test]
    fn test_estimate_cost_is_always_zero() {
        let adapter = AcpAdapter::new(settings("gemini"));
        assert_eq!(adapter.estimate_cost("any prompt at all"), 0.0);
    }

    #[test]
    fn test_metadata_carries_required_keys() {
        let adapter = AcpAdapter::new(settings("gemini"));
        let metadata = adapter.response_metadata("end_turn");
        for key in [
            "tool",
            "agent",
            "session_id",
            "stop_reason",
            "tool_calls_count",
            "has_thoughts",
        ] {
            assert!(metadata.contains_key(key), "missing metadata key {key}");
        }
        assert_eq!(metadata["tool"], "acp");
        assert_eq!(metadata["stop_reason"], "end_turn");
    }
}
