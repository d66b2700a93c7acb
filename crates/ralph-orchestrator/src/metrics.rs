//! Metrics, cost accounting, and per-iteration telemetry

use std::collections::{HashMap, VecDeque};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};

use ralph_core::TriggerReason;

/// Running counters for one orchestration run.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub iterations: u64,
    pub successful_iterations: u64,
    pub failed_iterations: u64,
    pub errors: u64,
    pub checkpoints: u64,
    pub rollbacks: u64,
    pub start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            iterations: 0,
            successful_iterations: 0,
            failed_iterations: 0,
            errors: 0,
            checkpoints: 0,
            rollbacks: 0,
            start_time: Instant::now(),
        }
    }

    /// Fraction of completed iterations that succeeded (0.0 when none ran).
    pub fn success_rate(&self) -> f64 {
        let attempts = self.successful_iterations + self.failed_iterations;
        if attempts == 0 {
            return 0.0;
        }
        self.successful_iterations as f64 / attempts as f64
    }

    pub fn elapsed_hours(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() / 3600.0
    }

    pub fn to_json(&self) -> Value {
        json!({
            "iterations": self.iterations,
            "successful_iterations": self.successful_iterations,
            "failed_iterations": self.failed_iterations,
            "errors": self.errors,
            "checkpoints": self.checkpoints,
            "rollbacks": self.rollbacks,
            "success_rate": self.success_rate(),
            "elapsed_hours": self.elapsed_hours(),
        })
    }
}

/// One priced backend: dollars per million tokens in each direction.
#[derive(Debug, Clone, Copy)]
pub struct PriceRow {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// One recorded usage event.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub tool: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

/// Token-usage cost accounting across backends.
///
/// Unknown tools fall back to the free `qchat` row: ACP backends report no
/// billing data, and a missing price row should degrade telemetry, not
/// fail the iteration.
#[derive(Debug)]
pub struct CostTracker {
    prices: HashMap<String, PriceRow>,
    total_cost: f64,
    costs_by_tool: HashMap<String, f64>,
    usage_history: Vec<UsageRecord>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CostTracker {
    pub fn new() -> Self {
        let mut prices = HashMap::new();
        prices.insert(
            "claude".to_string(),
            PriceRow {
                input_per_million: 3.0,
                output_per_million: 15.0,
            },
        );
        prices.insert(
            "gemini".to_string(),
            PriceRow {
                input_per_million: 0.075,
                output_per_million: 0.30,
            },
        );
        prices.insert(
            "qchat".to_string(),
            PriceRow {
                input_per_million: 0.0,
                output_per_million: 0.0,
            },
        );
        prices.insert(
            "acp".to_string(),
            PriceRow {
                input_per_million: 0.0,
                output_per_million: 0.0,
            },
        );

        Self {
            prices,
            total_cost: 0.0,
            costs_by_tool: HashMap::new(),
            usage_history: Vec::new(),
        }
    }

    /// Record usage and return the cost increment for this event.
    pub fn add_usage(&mut self, tool: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let row = self
            .prices
            .get(tool)
            .or_else(|| self.prices.get("qchat"))
            .copied()
            .unwrap_or(PriceRow {
                input_per_million: 0.0,
                output_per_million: 0.0,
            });

        let cost = input_tokens as f64 * row.input_per_million / 1_000_000.0
            + output_tokens as f64 * row.output_per_million / 1_000_000.0;

        self.total_cost += cost;
        *self.costs_by_tool.entry(tool.to_string()).or_insert(0.0) += cost;
        self.usage_history.push(UsageRecord {
            tool: tool.to_string(),
            input_tokens,
            output_tokens,
            cost,
            timestamp: epoch_seconds(),
        });

        cost
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn costs_by_tool(&self) -> &HashMap<String, f64> {
        &self.costs_by_tool
    }

    pub fn usage_history(&self) -> &[UsageRecord] {
        &self.usage_history
    }

    pub fn last_usage(&self) -> Option<&UsageRecord> {
        self.usage_history.last()
    }
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Input for one telemetry record; fields default so call sites only fill
/// what they know.
#[derive(Debug, Clone, Default)]
pub struct IterationEntry {
    pub iteration: u64,
    pub duration_seconds: f64,
    pub success: bool,
    pub error: String,
    pub trigger_reason: Option<TriggerReason>,
    pub output_preview: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub tools_used: Vec<String>,
}

/// One stored telemetry record.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: u64,
    pub duration_seconds: f64,
    pub success: bool,
    pub error: String,
    pub timestamp: String,
    pub trigger_reason: String,
    pub output_preview: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub tools_used: Vec<String>,
}

/// Memory-bounded per-iteration telemetry.
///
/// Keeps at most `max_iterations_stored` records (default 1000), evicting
/// the oldest. Output previews are truncated to `max_preview_length`
/// characters with a `...` suffix when cut.
#[derive(Debug)]
pub struct IterationStats {
    max_iterations_stored: usize,
    max_preview_length: usize,
    iterations: VecDeque<IterationRecord>,
    successes: u64,
    failures: u64,
}

impl Default for IterationStats {
    fn default() -> Self {
        Self::new(1000, 500)
    }
}

impl IterationStats {
    pub fn new(max_iterations_stored: usize, max_preview_length: usize) -> Self {
        Self {
            max_iterations_stored,
            max_preview_length,
            iterations: VecDeque::new(),
            successes: 0,
            failures: 0,
        }
    }

    pub fn with_preview_length(max_preview_length: usize) -> Self {
        Self::new(1000, max_preview_length)
    }

    pub fn record_iteration(&mut self, entry: IterationEntry) {
        if entry.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }

        let record = IterationRecord {
            iteration: entry.iteration,
            duration_seconds: entry.duration_seconds,
            success: entry.success,
            error: entry.error,
            timestamp: chrono::Local::now().to_rfc3339(),
            trigger_reason: entry
                .trigger_reason
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            output_preview: truncate_preview(&entry.output_preview, self.max_preview_length),
            tokens_used: entry.tokens_used,
            cost: entry.cost,
            tools_used: entry.tools_used,
        };

        self.iterations.push_back(record);
        while self.iterations.len() > self.max_iterations_stored {
            self.iterations.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn records(&self) -> Vec<IterationRecord> {
        self.iterations.iter().cloned().collect()
    }

    /// Success percentage across all recorded iterations (0.0-100.0).
    pub fn success_rate(&self) -> f64 {
        let attempts = self.successes + self.failures;
        if attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / attempts as f64 * 100.0
    }

    pub fn average_duration(&self) -> f64 {
        if self.iterations.is_empty() {
            return 0.0;
        }
        let total: f64 = self.iterations.iter().map(|r| r.duration_seconds).sum();
        total / self.iterations.len() as f64
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.iterations
            .iter()
            .filter(|r| !r.success && !r.error.is_empty())
            .map(|r| r.error.clone())
            .collect()
    }

    pub fn recent_iterations(&self, count: usize) -> Vec<IterationRecord> {
        let skip = self.iterations.len().saturating_sub(count);
        self.iterations.iter().skip(skip).cloned().collect()
    }
}

/// Character-safe preview truncation with `...` suffix.
fn truncate_preview(preview: &str, max_length: usize) -> String {
    let char_count = preview.chars().count();
    if char_count <= max_length {
        return preview.to_string();
    }
    let mut truncated: String = preview.chars().take(max_length).collect();
    truncated.push_str("...");
    truncated
}
