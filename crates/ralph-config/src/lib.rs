//! # Ralph Config - Orchestrator Configuration
//!
//! Config schema, YAML loading, environment overrides, and startup
//! validation. The rest of the workspace only ever sees the validated
//! `RalphConfig` value; parsing concerns stay in this crate.

mod loader;
mod schema;

pub use loader::{apply_env_overrides, load, ConfigError};
pub use schema::{AcpSettings, AgentKind, PermissionMode, RalphConfig};
