//! Permission handling for agent tool-call requests
//!
//! Resolves `session/request_permission` against the configured mode:
//!
//! | Mode | Decision |
//! |---|---|
//! | `auto_approve` | always allow |
//! | `deny_all` | always deny |
//! | `allowlist` | allow iff the operation matches a configured pattern |
//! | `interactive` | ask on the controlling TTY; no TTY or EOF means deny |
//!
//! Allowlist patterns are exact strings, globs (`*`, `?`), or regexes
//! delimited by `/.../`. Every decision is appended to history with its
//! reason and mode.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};

use ralph_config::PermissionMode;

/// Answer from an interactive prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Yes,
    No,
    /// EOF or interrupt on the input stream
    Interrupted,
}

/// Seam for interactive mode so tests can script the operator.
pub trait UserPrompter: Send + Sync {
    fn confirm(&self, prompt: &str) -> PromptAnswer;
}

/// Real-terminal prompter: denies without asking when stdin is not a TTY.
pub struct TtyPrompter;

impl UserPrompter for TtyPrompter {
    fn confirm(&self, prompt: &str) -> PromptAnswer {
        if !std::io::stdin().is_terminal() {
            return PromptAnswer::Interrupted;
        }
        eprintln!("{prompt}");
        eprint!("[y/N]: ");
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => PromptAnswer::Interrupted,
            Ok(_) => match line.trim().to_lowercase().as_str() {
                "y" | "yes" => PromptAnswer::Yes,
                _ => PromptAnswer::No,
            },
            Err(_) => PromptAnswer::Interrupted,
        }
    }
}

/// Parsed permission request fields the engine cares about.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub operation: String,
    pub path: Option<String>,
    pub command: Option<String>,
    pub arguments: Value,
}

impl PermissionRequest {
    pub fn from_params(params: &Value) -> Self {
        Self {
            operation: params
                .get("operation")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            path: params.get("path").and_then(Value::as_str).map(str::to_string),
            command: params
                .get("command")
                .and_then(Value::as_str)
                .map(str::to_string),
            arguments: params.clone(),
        }
    }
}

/// Outcome of one permission evaluation.
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub approved: bool,
    pub reason: String,
    pub mode: PermissionMode,
}

/// Mode-driven decision engine with history.
pub struct PermissionEngine {
    mode: PermissionMode,
    allowlist: Vec<String>,
    prompter: Box<dyn UserPrompter>,
    history: Mutex<Vec<(PermissionRequest, PermissionDecision)>>,
    approved_count: AtomicUsize,
    denied_count: AtomicUsize,
}

impl PermissionEngine {
    pub fn new(mode: PermissionMode, allowlist: Vec<String>) -> Self {
        Self {
            mode,
            allowlist,
            prompter: Box::new(TtyPrompter),
            history: Mutex::new(Vec::new()),
            approved_count: AtomicUsize::new(0),
            denied_count: AtomicUsize::new(0),
        }
    }

    /// Replace the interactive prompter (tests inject a scripted one).
    pub fn with_prompter(mut self, prompter: Box<dyn UserPrompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Handle a `session/request_permission` request end-to-end.
    ///
    /// On allow, responds `{outcome: {outcome: "selected", optionId: ...}}`
    /// picking the first allow-typed option (falling back to the first
    /// option, then `"proceed_once"`). On deny, responds
    /// `{outcome: {outcome: "cancelled"}}`.
    pub fn handle_request(&self, params: &Value) -> Value {
        let request = PermissionRequest::from_params(params);
        let decision = self.evaluate(&request);

        info!(
            operation = %request.operation,
            approved = decision.approved,
            mode = %decision.mode,
            reason = %decision.reason,
            "permission decision"
        );

        let response = if decision.approved {
            let options = params
                .get("options")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let option_id = options
                .iter()
                .find(|option| option.get("type").and_then(Value::as_str) == Some("allow"))
                .or_else(|| options.first())
                .and_then(|option| option.get("id").and_then(Value::as_str))
                .unwrap_or("proceed_once")
                .to_string();
            json!({"outcome": {"outcome": "selected", "optionId": option_id}})
        } else {
            json!({"outcome": {"outcome": "cancelled"}})
        };

        if decision.approved {
            self.approved_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied_count.fetch_add(1, Ordering::Relaxed);
        }
        self.history.lock().push((request, decision));

        response
    }

    /// Evaluate a request without recording it.
    pub fn evaluate(&self, request: &PermissionRequest) -> PermissionDecision {
        match self.mode {
            PermissionMode::AutoApprove => PermissionDecision {
                approved: true,
                reason: "auto_approve mode".to_string(),
                mode: self.mode,
            },
            PermissionMode::DenyAll => PermissionDecision {
                approved: false,
                reason: "deny_all mode".to_string(),
                mode: self.mode,
            },
            PermissionMode::Allowlist => self.evaluate_allowlist(request),
            PermissionMode::Interactive => self.evaluate_interactive(request),
        }
    }

    fn evaluate_allowlist(&self, request: &PermissionRequest) -> PermissionDecision {
        for pattern in &self.allowlist {
            if matches_pattern(&request.operation, pattern) {
                return PermissionDecision {
                    approved: true,
                    reason: format!("matches allowlist pattern: {pattern}"),
                    mode: self.mode,
                };
            }
        }
        PermissionDecision {
            approved: false,
            reason: "no matching allowlist pattern".to_string(),
            mode: self.mode,
        }
    }

    fn evaluate_interactive(&self, request: &PermissionRequest) -> PermissionDecision {
        let mut prompt = format!(
            "\n{sep}\nPermission Request: {}\n{sep}",
            request.operation,
            sep = "=".repeat(60)
        );
        if let Some(path) = &request.path {
            prompt.push_str(&format!("\n  Path: {path}"));
        }
        if let Some(command) = &request.command {
            prompt.push_str(&format!("\n  Command: {command}"));
        }
        prompt.push_str(&format!("\n{}\nApprove this operation?", "=".repeat(60)));

        match self.prompter.confirm(&prompt) {
            PromptAnswer::Yes => PermissionDecision {
                approved: true,
                reason: "user approved".to_string(),
                mode: self.mode,
            },
            PromptAnswer::No => PermissionDecision {
                approved: false,
                reason: "user denied".to_string(),
                mode: self.mode,
            },
            PromptAnswer::Interrupted => PermissionDecision {
                approved: false,
                reason: "no terminal available or input interrupted".to_string(),
                mode: self.mode,
            },
        }
    }

    pub fn history(&self) -> Vec<(PermissionRequest, PermissionDecision)> {
        self.history.lock().clone()
    }

    pub fn approved_count(&self) -> usize {
        self.approved_count.load(Ordering::Relaxed)
    }

    pub fn denied_count(&self) -> usize {
        self.denied_count.load(Ordering::Relaxed)
    }
}

/// Match an operation name against an allowlist pattern.
///
/// `/.../` delimits a regex; `*` or `?` makes a glob; anything else is an
/// exact comparison. Invalid regexes never match.
fn matches_pattern(operation: &str, pattern: &str) -> bool {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        let body = &pattern[1..pattern.len() - 1];
        return match regex::Regex::new(body) {
            Ok(re) => re.is_match(operation),
            Err(err) => {
                warn!(pattern, %err, "invalid regex in permission allowlist");
                false
            }
        };
    }

    if pattern.contains('*') || pattern.contains('?') {
        return glob::Pattern::new(pattern)
            .map(|p| p.matches(operation))
            .unwrap_or(false);
    }

    operation == pattern
}
