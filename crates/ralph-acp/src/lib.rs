//! # Ralph ACP - Agent Client Protocol Integration
//!
//! Thin protocol layer for spawning and communicating with ACP-compatible
//! AI agents over line-delimited JSON-RPC 2.0. Orchestration (the iteration
//! loop, telemetry, checkpoints) lives in `ralph-orchestrator`; this crate
//! handles only the wire protocol, the agent subprocess, and the tool
//! requests the agent sends back to the host.
//!
//! ## Architecture
//!
//! ```text
//! RalphOrchestrator
//!   ↓ aexecute(prompt)
//! AcpAdapter (this crate)  - handshake, session, prompt, stop-reason mapping
//!   ↓
//! AcpClient                - child process, frame routing, pending requests
//!   ↕ stdin/stdout (JSON-RPC lines)
//! Agent process            - streams session/update, calls back for:
//!   - session/request_permission → PermissionEngine
//!   - fs/read_text_file, fs/write_text_file → filesystem handlers
//!   - terminal/*              → TerminalTable
//! ```

pub mod adapter;
pub mod client;
pub mod filesystem;
pub mod permission;
pub mod protocol;
pub mod session;
pub mod terminal;

pub use adapter::{AcpAdapter, AdapterState, ACP_PROTOCOL_VERSION};
pub use client::{AcpClient, ResponseFuture};
pub use permission::{
    PermissionDecision, PermissionEngine, PermissionRequest, PromptAnswer, TtyPrompter,
    UserPrompter,
};
pub use protocol::{codes, IncomingMessage, ProtocolCodec, RpcError};
pub use session::{SessionState, ToolCall, ToolCallStatus, UpdatePayload};
pub use terminal::TerminalTable;

// Error types come from ralph-core so every layer shares one taxonomy.
pub use ralph_core::{RalphError, Result};
