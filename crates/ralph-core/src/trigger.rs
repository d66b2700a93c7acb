//! Trigger-reason tagging for per-iteration telemetry

use serde::{Deserialize, Serialize};

/// Why a new iteration is starting.
///
/// Classified by the driver before each iteration and written into the
/// telemetry record; `LoopDetected`, `SafetyLimit`, and `UserStop` tag
/// terminal iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// First iteration of the run
    Initial,
    /// Task not complete, continuing normally
    TaskIncomplete,
    /// Previous iteration succeeded
    PreviousSuccess,
    /// More than half of the iterations so far have failed
    Recovery,
    /// Repetitive agent output detected
    LoopDetected,
    /// An iteration/runtime/cost/failure ceiling fired
    SafetyLimit,
    /// Operator requested stop
    UserStop,
}

impl TriggerReason {
    /// Wire string written into telemetry records.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Initial => "initial",
            TriggerReason::TaskIncomplete => "task_incomplete",
            TriggerReason::PreviousSuccess => "previous_success",
            TriggerReason::Recovery => "recovery",
            TriggerReason::LoopDetected => "loop_detected",
            TriggerReason::SafetyLimit => "safety_limit",
            TriggerReason::UserStop => "user_stop",
        }
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
