//! Adapter contract for agent backends
//!
//! Every agent backend (ACP subprocess, CLI tools, SDK integrations) is
//! driven through the same `ToolAdapter` trait. The orchestrator owns at
//! most one active adapter at a time and falls back through the remaining
//! registered adapters when the primary reports failure.
//!
//! ## Design Principles
//!
//! - **Dependency Inversion**: the driver never sees a concrete backend,
//!   only this trait
//! - **Open/Closed**: new backends are added without modifying the loop

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

/// Result of a single adapter invocation
///
/// `output` is the accumulated agent text for the call; `metadata` carries
/// backend-specific details (session id, stop reason, tool-call counts).
#[derive(Debug, Clone, Default)]
pub struct ToolResponse {
    /// Whether the agent completed the prompt without error
    pub success: bool,

    /// Accumulated agent output text (may be partial on failure)
    pub output: String,

    /// Error description when `success` is false
    pub error: Option<String>,

    /// Backend-specific response metadata
    pub metadata: serde_json::Map<String, Value>,

    /// Token usage reported by the backend, if any
    pub tokens_used: Option<u64>,
}

impl ToolResponse {
    /// Build a successful response carrying the agent output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    /// Build a failed response with an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Attach a metadata entry, consuming and returning the response.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Contract implemented by every agent backend
///
/// Implementations must be safe to share behind an `Arc`: `aexecute` takes
/// `&self` and any mutable session state lives behind interior locks.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Stable backend name used for cost accounting and logging
    fn name(&self) -> &str;

    /// Whether the backend can currently execute (binary on PATH, SDK
    /// importable). Unavailable adapters are skipped during registration.
    fn available(&self) -> bool;

    /// Execute one prompt against the backend.
    ///
    /// `prompt_file` is the on-disk prompt source, when one exists, so the
    /// backend can point the agent at it. `verbose` enables streaming of
    /// intermediate output.
    ///
    /// This never returns `Err`: backend failures are reported through
    /// `ToolResponse::success == false` so the driver can apply its own
    /// failure handling (backoff, fallback chain).
    async fn aexecute(&self, prompt: &str, prompt_file: Option<&Path>, verbose: bool)
        -> ToolResponse;

    /// Estimate the cost of executing the prompt, in dollars.
    ///
    /// Backends without billing data return 0.0.
    fn estimate_cost(&self, prompt: &str) -> f64 {
        let _ = prompt;
        0.0
    }

    /// Synchronous, signal-safe best-effort kill of any owned subprocess.
    ///
    /// Called first in the shutdown sequence to unblock I/O waiting on the
    /// child. Backends without a subprocess keep the no-op default.
    fn kill_subprocess_sync(&self) {}

    /// Orderly asynchronous teardown (sessions, terminals, transport).
    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response() {
        let resp = ToolResponse::ok("agent output");
        assert!(resp.success);
        assert_eq!(resp.output, "agent output");
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_failure_response() {
        let resp = ToolResponse::failure("spawn failed");
        assert!(!resp.success);
        assert!(resp.output.is_empty());
        assert_eq!(resp.error.as_deref(), Some("spawn failed"));
    }

    #[test]
    fn test_with_metadata_chains() {
        let resp = ToolResponse::ok("out")
            .with_metadata("tool", Value::from("acp"))
            .with_metadata("stop_reason", Value::from("end_turn"));
        assert_eq!(resp.metadata["tool"], "acp");
        assert_eq!(resp.metadata["stop_reason"], "end_turn");
    }
}
