//! # Ralph Core - Shared Types and Traits
//!
//! Foundation crate for the Ralph orchestrator workspace. Holds the adapter
//! contract every agent backend implements, the workspace-wide error
//! taxonomy, trigger-reason tagging for telemetry, shutdown signal plumbing,
//! and the masking/rotating verbose logger.
//!
//! Higher layers (`ralph-acp`, `ralph-orchestrator`) depend on this crate
//! only through the types re-exported below.

pub mod adapter;
pub mod error;
pub mod logging;
pub mod shutdown;
pub mod trigger;

pub use adapter::{ToolAdapter, ToolResponse};
pub use error::{RalphError, Result};
pub use logging::{mask_sensitive_data, VerboseLogger};
pub use shutdown::Shutdown;
pub use trigger::TriggerReason;
