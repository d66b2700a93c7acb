//! Safety guard: run ceilings and output-loop detection
//!
//! Checked before every iteration with the current counters. A ceiling of
//! zero disables that dimension. Loop detection watches the last three
//! successful outputs; a near-identical repeat means the agent is spinning
//! and the run should stop.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

/// How many recent outputs the loop detector remembers.
const LOOP_WINDOW: usize = 3;
/// Normalized-output prefix length fed into the loop hash.
const LOOP_PREFIX_CHARS: usize = 1000;

/// Result of one safety evaluation.
#[derive(Debug, Clone)]
pub struct SafetyCheck {
    pub passed: bool,
    pub reason: Option<String>,
}

impl SafetyCheck {
    fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    fn fail(reason: String) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
        }
    }
}

/// Evaluates run ceilings and detects repetitive output.
#[derive(Debug)]
pub struct SafetyGuard {
    max_iterations: u64,
    max_runtime_seconds: u64,
    max_cost: f64,
    consecutive_failure_limit: u32,
    consecutive_failures: u32,
    recent_output_hashes: VecDeque<u64>,
}

impl SafetyGuard {
    pub fn new(
        max_iterations: u64,
        max_runtime_seconds: u64,
        max_cost: f64,
        consecutive_failure_limit: u32,
    ) -> Self {
        Self {
            max_iterations,
            max_runtime_seconds,
            max_cost,
            consecutive_failure_limit,
            consecutive_failures: 0,
            recent_output_hashes: VecDeque::new(),
        }
    }

    /// Evaluate every ceiling; the first violated one names the reason.
    pub fn check(&self, iterations: u64, elapsed_seconds: f64, total_cost: f64) -> SafetyCheck {
        if self.max_iterations > 0 && iterations >= self.max_iterations {
            return SafetyCheck::fail(format!(
                "Maximum iterations reached ({iterations}/{})",
                self.max_iterations
            ));
        }
        if self.max_runtime_seconds > 0 && elapsed_seconds >= self.max_runtime_seconds as f64 {
            return SafetyCheck::fail(format!(
                "Maximum runtime reached ({elapsed_seconds:.0}s/{}s)",
                self.max_runtime_seconds
            ));
        }
        if self.max_cost > 0.0 && total_cost >= self.max_cost {
            return SafetyCheck::fail(format!(
                "Maximum cost reached (${total_cost:.4}/${:.2})",
                self.max_cost
            ));
        }
        if self.consecutive_failure_limit > 0
            && self.consecutive_failures >= self.consecutive_failure_limit
        {
            return SafetyCheck::fail(format!(
                "Too many consecutive failures ({}/{})",
                self.consecutive_failures, self.consecutive_failure_limit
            ));
        }
        SafetyCheck::pass()
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Track a successful output; true when it repeats one of the last
    /// few, meaning the agent is producing the same thing over and over.
    pub fn detect_loop(&mut self, output: &str) -> bool {
        let hash = normalized_hash(output);
        let looped = self.recent_output_hashes.contains(&hash);

        self.recent_output_hashes.push_back(hash);
        while self.recent_output_hashes.len() > LOOP_WINDOW {
            self.recent_output_hashes.pop_front();
        }

        looped
    }

    /// Forget tracked outputs (used when the driver resets state).
    pub fn reset_loop_detection(&mut self) {
        self.recent_output_hashes.clear();
    }
}

/// Hash of the trimmed, case-folded output prefix. Prefix-based so small
/// trailing variations (timestamps, counters) still count as a repeat.
fn normalized_hash(output: &str) -> u64 {
    let normalized: String = output
        .trim()
        .to_lowercase()
        .chars()
        .take(LOOP_PREFIX_CHARS)
        .collect();
    let digest = Sha256::digest(normalized.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_limits_pass_when_under() {
        let guard = SafetyGuard::new(100, 3600, 10.0, 5);
        let check = guard.check(5, 60.0, 0.5);
        assert!(check.passed);
        assert!(check.reason.is_none());
    }

    #[test]
    fn test_iteration_limit_trips() {
        let guard = SafetyGuard::new(10, 0, 0.0, 0);
        let check = guard.check(10, 0.0, 0.0);
        assert!(!check.passed);
        assert!(check.reason.unwrap().contains("iterations"));
    }

    #[test]
    fn test_max_iterations_one_allows_exactly_one() {
        let guard = SafetyGuard::new(1, 0, 0.0, 0);
        assert!(guard.check(0, 0.0, 0.0).passed);
        assert!(!guard.check(1, 0.0, 0.0).passed);
    }

    #[test]
    fn test_runtime_limit_trips() {
        let guard = SafetyGuard::new(0, 60, 0.0, 0);
        assert!(guard.check(0, 59.0, 0.0).passed);
        assert!(!guard.check(0, 60.0, 0.0).passed);
    }

    #[test]
    fn test_cost_limit_trips() {
        let guard = SafetyGuard::new(0, 0, 1.0, 0);
        assert!(guard.check(0, 0.0, 0.99).passed);
        assert!(!guard.check(0, 0.0, 1.0).passed);
    }

    #[test]
    fn test_zero_limits_are_unbounded() {
        let guard = SafetyGuard::new(0, 0, 0.0, 0);
        let check = guard.check(1_000_000, 1e9, 1e6);
        assert!(check.passed);
    }

    #[test]
    fn test_consecutive_failures_trip_and_reset() {
        let mut guard = SafetyGuard::new(0, 0, 0.0, 3);
        guard.record_failure();
        guard.record_failure();
        assert!(guard.check(0, 0.0, 0.0).passed);

        guard.record_failure();
        assert!(!guard.check(0, 0.0, 0.0).passed);

        guard.record_success();
        assert_eq!(guard.consecutive_failures(), 0);
        assert!(guard.check(0, 0.0, 0.0).passed);
    }

    #[test]
    fn test_loop_detected_on_repeat() {
        let mut guard = SafetyGuard::new(0, 0, 0.0, 0);
        assert!(!guard.detect_loop("Working on the task"));
        assert!(!guard.detect_loop("Something different"));
        assert!(guard.detect_loop("Working on the task"));
    }

    #[test]
    fn test_loop_normalization_ignores_case_and_whitespace() {
        let mut guard = SafetyGuard::new(0, 0, 0.0, 0);
        assert!(!guard.detect_loop("  Retrying the build  "));
        assert!(guard.detect_loop("retrying the build"));
    }

    #[test]
    fn test_distinct_outputs_never_loop() {
        let mut guard = SafetyGuard::new(0, 0, 0.0, 0);
        for i in 0..10 {
            assert!(!guard.detect_loop(&format!("step {i} done")));
        }
    }

    #[test]
    fn test_old_outputs_age_out_of_the_window() {
        let mut guard = SafetyGuard::new(0, 0, 0.0, 0);
        guard.detect_loop("first");
        guard.detect_loop("second");
        guard.detect_loop("third");
        guard.detect_loop("fourth");
        // "first" fell out of the 3-entry window.
        assert!(!guard.detect_loop("first"));
    }

    #[test]
    fn test_empty_output_does_not_crash() {
        let mut guard = SafetyGuard::new(0, 0, 0.0, 0);
        assert!(!guard.detect_loop(""));
        assert!(guard.detect_loop(""));
    }
}
