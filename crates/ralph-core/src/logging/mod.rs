//! Verbose logging with sensitive-data masking
//!
//! Two pieces: `mask_sensitive_data` scrubs secrets out of any line headed
//! for persistence, and `VerboseLogger` is the append-only rotating file
//! sink the orchestrator writes its verbose stream through.
//!
//! ## Responsibilities
//!
//! - Redact API keys, bearer tokens, passwords, and credential paths
//! - Size-based rotation (10 MiB, 3 backups)
//! - Emergency-shutdown latch safe to flip from signal context
//! - Never block producers: actual file I/O happens on a dedicated writer
//!   thread, outside every caller-visible lock

mod mask;
mod verbose;

pub use mask::mask_sensitive_data;
pub use verbose::VerboseLogger;
