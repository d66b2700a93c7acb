//! # Ralph Orchestrator - The Iteration Driver
//!
//! The bounded loop that runs a prompt through an agent backend until the
//! completion marker appears or a safety limit fires, plus the supporting
//! cores it consumes: cost/metrics accounting, the safety guard, the
//! context assembler, and the git checkpoint/archive surface.
//!
//! The agent transport itself lives in `ralph-acp`; anything implementing
//! `ralph_core::ToolAdapter` can be registered here.

pub mod checkpoint;
pub mod console;
pub mod context;
pub mod metrics;
pub mod orchestrator;
pub mod safety;

pub use checkpoint::CheckpointManager;
pub use console::{Console, NullConsole, StdoutConsole};
pub use context::ContextManager;
pub use metrics::{CostTracker, IterationEntry, IterationStats, Metrics, UsageRecord};
pub use orchestrator::RalphOrchestrator;
pub use safety::{SafetyCheck, SafetyGuard};
