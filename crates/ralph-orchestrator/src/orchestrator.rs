//! The bounded iteration loop
//!
//! Per tick: safety check, completion-marker check, trigger
//! classification, adapter invocation (with the fallback chain), telemetry
//! recording, periodic git checkpoints, and failure/error handling with
//! exponential backoff and rollback. The loop exits on the completion
//! marker, a safety trip, detected output loops, or operator shutdown.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};

use ralph_config::{AgentKind, RalphConfig};
use ralph_core::{RalphError, Shutdown, ToolAdapter, TriggerReason, VerboseLogger};

use crate::checkpoint::CheckpointManager;
use crate::console::{Console, StdoutConsole};
use crate::context::ContextManager;
use crate::metrics::{CostTracker, IterationEntry, IterationStats, Metrics};
use crate::safety::SafetyGuard;

/// Lines that mark the task complete (exact match after trim).
const COMPLETION_MARKERS: [&str; 2] = ["- [x] TASK_COMPLETE", "[x] TASK_COMPLETE"];
/// Fixed pacing between iterations.
const DEFAULT_ITERATION_PAUSE: Duration = Duration::from_secs(2);
/// Exponential backoff ceiling.
const MAX_BACKOFF_SECONDS: u64 = 60;
/// Cumulative failures after which a rollback is attempted.
const ROLLBACK_FAILURE_THRESHOLD: u64 = 3;
/// Errors after which orchestrator state is rebuilt.
const RESET_ERROR_THRESHOLD: u64 = 5;

/// One task extracted from the prompt.
#[derive(Debug, Clone)]
struct TaskItem {
    id: u64,
    description: String,
    status: String,
    created_at: String,
    completed_at: Option<String>,
    iteration: Option<u64>,
}

impl TaskItem {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "description": self.description,
            "status": self.status,
            "created_at": self.created_at,
            "completed_at": self.completed_at,
            "iteration": self.iteration,
        })
    }
}

#[derive(Debug, Default)]
struct TaskQueue {
    queue: VecDeque<TaskItem>,
    current: Option<TaskItem>,
    completed: Vec<TaskItem>,
    started_at: Option<Instant>,
}

struct IterationOutcome {
    success: bool,
    output: Option<String>,
    error: Option<String>,
    tokens_used: u64,
    cost: f64,
}

/// The orchestration driver.
///
/// Owns the config, metrics, safety guard, context assembler, and the
/// registered adapters. Shared mutable state sits behind mutexes so the
/// state-snapshot accessors can serve external monitors mid-run; the loop
/// itself is single-threaded.
pub struct RalphOrchestrator {
    config: RalphConfig,
    adapters: Vec<Arc<dyn ToolAdapter>>,
    current_adapter: usize,
    metrics: Mutex<Metrics>,
    iteration_stats: Mutex<Option<IterationStats>>,
    cost_tracker: Mutex<Option<CostTracker>>,
    safety: Mutex<SafetyGuard>,
    context: Mutex<ContextManager>,
    checkpoints: CheckpointManager,
    console: Box<dyn Console>,
    shutdown: Shutdown,
    verbose_logger: Mutex<Option<VerboseLogger>>,
    tasks: Mutex<TaskQueue>,
    last_output: Mutex<Option<String>>,
    last_iteration_success: Mutex<Option<bool>>,
    start_time: Mutex<Option<Instant>>,
    agent_dir: PathBuf,
    iteration_pause: Duration,
}

impl RalphOrchestrator {
    /// Build a driver over the registered adapters.
    ///
    /// Unavailable adapters are dropped at registration. The primary tool
    /// must resolve to one of the remaining adapters (`Auto` picks the
    /// first); anything else is a configuration error.
    pub fn new(
        config: RalphConfig,
        adapters: Vec<Arc<dyn ToolAdapter>>,
    ) -> ralph_core::Result<Self> {
        config.validate().map_err(RalphError::Config)?;

        let adapters: Vec<_> = adapters
            .into_iter()
            .filter(|adapter| {
                let available = adapter.available();
                if !available {
                    warn!(adapter = adapter.name(), "adapter unavailable, skipping");
                }
                available
            })
            .collect();
        if adapters.is_empty() {
            return Err(RalphError::Config(
                "no available agent adapters".to_string(),
            ));
        }

        let current_adapter = match config.primary_tool {
            AgentKind::Auto => 0,
            kind => adapters
                .iter()
                .position(|adapter| adapter.name() == kind.as_str())
                .ok_or_else(|| RalphError::Config(format!("Unknown tool: {kind}")))?,
        };

        let agent_dir = PathBuf::from(".agent");
        let safety = SafetyGuard::new(
            config.max_iterations,
            config.max_runtime_seconds,
            config.max_cost,
            config.consecutive_failure_limit,
        );
        let context = ContextManager::new(
            config.prompt_file.clone(),
            config.prompt_text.clone(),
            config.max_context_size,
            agent_dir.join("cache"),
        );
        let iteration_stats = config
            .iteration_telemetry
            .then(|| IterationStats::with_preview_length(config.output_preview_length));
        let cost_tracker = config.track_costs.then(CostTracker::new);
        let checkpoints = CheckpointManager::new(config.archive_dir.clone());

        info!(
            primary = adapters[current_adapter].name(),
            adapters = adapters.len(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            adapters,
            current_adapter,
            metrics: Mutex::new(Metrics::new()),
            iteration_stats: Mutex::new(iteration_stats),
            cost_tracker: Mutex::new(cost_tracker),
            safety: Mutex::new(safety),
            context: Mutex::new(context),
            checkpoints,
            console: Box::new(StdoutConsole),
            shutdown: Shutdown::new(),
            verbose_logger: Mutex::new(None),
            tasks: Mutex::new(TaskQueue::default()),
            last_output: Mutex::new(None),
            last_iteration_success: Mutex::new(None),
            start_time: Mutex::new(None),
            agent_dir,
            iteration_pause: DEFAULT_ITERATION_PAUSE,
        })
    }

    /// Replace the console sink.
    pub fn with_console(mut self, console: Box<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Share an externally created shutdown handle (the CLI's signal
    /// handlers hold the other end).
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Relocate `.agent/` (cache, metrics, scratchpad) for tests.
    pub fn with_agent_dir(mut self, agent_dir: impl Into<PathBuf>) -> Self {
        self.agent_dir = agent_dir.into();
        let context = ContextManager::new(
            self.config.prompt_file.clone(),
            self.config.prompt_text.clone(),
            self.config.max_context_size,
            self.agent_dir.join("cache"),
        );
        self.context = Mutex::new(context);
        self
    }

    /// Override the fixed inter-iteration pause (tests use zero).
    pub fn with_iteration_pause(mut self, pause: Duration) -> Self {
        self.iteration_pause = pause;
        self
    }

    /// Attach the verbose logger used for emergency shutdown from signal
    /// context.
    pub fn set_verbose_logger(&self, logger: VerboseLogger) {
        *self.verbose_logger.lock() = Some(logger);
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Signal-path shutdown sequence: kill the agent subprocess first
    /// (unblocks pending I/O), latch the logger, then flip the stop flag
    /// and cancel suspended awaits.
    pub fn handle_signal(&self) {
        if let Some(adapter) = self.adapters.get(self.current_adapter) {
            adapter.kill_subprocess_sync();
        }
        if let Some(logger) = self.verbose_logger.lock().as_ref() {
            logger.emergency_shutdown();
        }
        self.shutdown.request();
    }

    /// Run the orchestration loop to completion.
    pub async fn arun(&self) -> ralph_core::Result<()> {
        info!("starting orchestration loop");
        let _ = std::fs::create_dir_all(&self.config.archive_dir);
        let _ = std::fs::create_dir_all(&self.agent_dir);

        let start = Instant::now();
        *self.start_time.lock() = Some(start);

        while !self.shutdown.is_requested() {
            let iterations = self.metrics.lock().iterations;
            let total_cost = self
                .cost_tracker
                .lock()
                .as_ref()
                .map(|t| t.total_cost())
                .unwrap_or(0.0);
            let check =
                self.safety
                    .lock()
                    .check(iterations, start.elapsed().as_secs_f64(), total_cost);
            if !check.passed {
                let reason = check.reason.unwrap_or_default();
                self.console
                    .warning(&format!("Safety limit reached: {reason}"));
                self.log_verbose("WARNING", &format!("Safety limit reached: {reason}"));
                self.record_telemetry(IterationEntry {
                    iteration: iterations,
                    success: false,
                    error: reason,
                    trigger_reason: Some(TriggerReason::SafetyLimit),
                    ..Default::default()
                });
                break;
            }

            if self.completion_marker_present() {
                info!("completion marker found");
                self.console
                    .success("Task completion marker detected - stopping orchestration");
                break;
            }

            let trigger = self.classify_trigger();

            let iteration = {
                let mut metrics = self.metrics.lock();
                metrics.iterations += 1;
                metrics.iterations
            };
            self.console.iteration_header(iteration);
            self.log_verbose("INFO", &format!("Starting iteration {iteration}"));

            let iteration_start = Instant::now();
            let mut iteration_success = false;
            let mut iteration_error = String::new();
            let mut loop_detected = false;
            let mut tokens_used = 0;
            let mut iteration_cost = 0.0;

            match self.execute_iteration().await {
                Ok(outcome) => {
                    tokens_used = outcome.tokens_used;
                    iteration_cost = outcome.cost;

                    if outcome.success {
                        iteration_success = true;
                        self.metrics.lock().successful_iterations += 1;
                        self.safety.lock().record_success();
                        self.console
                            .success(&format!("Iteration {iteration} completed successfully"));

                        if let Some(output) = &outcome.output {
                            self.console.message(output);
                            if self.safety.lock().detect_loop(output) {
                                loop_detected = true;
                                self.console.warning(
                                    "Loop detected - agent producing repetitive outputs",
                                );
                                warn!("breaking loop due to repetitive agent outputs");
                            }
                        }
                    } else {
                        self.metrics.lock().failed_iterations += 1;
                        self.safety.lock().record_failure();
                        iteration_error = outcome
                            .error
                            .unwrap_or_else(|| "Iteration failed".to_string());
                        self.console
                            .warning(&format!("Iteration {iteration} failed"));
                        self.handle_failure().await;
                    }

                    if iteration % self.config.checkpoint_interval == 0 {
                        self.create_checkpoint(iteration).await;
                    }
                }
                Err(err) => {
                    self.metrics.lock().errors += 1;
                    iteration_error = err.to_string();
                    self.console.error(&format!("Error in iteration: {err}"));
                    self.handle_error().await;
                }
            }

            *self.last_iteration_success.lock() = Some(iteration_success);

            let output_preview = self.last_output.lock().clone().unwrap_or_default();
            self.record_telemetry(IterationEntry {
                iteration,
                duration_seconds: iteration_start.elapsed().as_secs_f64(),
                success: iteration_success,
                error: iteration_error,
                trigger_reason: Some(if loop_detected {
                    TriggerReason::LoopDetected
                } else {
                    trigger
                }),
                output_preview,
                tokens_used,
                cost: iteration_cost,
                tools_used: Vec::new(),
            });

            if loop_detected {
                break;
            }

            if !self.shutdown.sleep(self.iteration_pause).await {
                break;
            }
        }

        self.print_summary();
        if let Some(adapter) = self.adapters.get(self.current_adapter) {
            if self.shutdown.is_requested() {
                // Signal path: the subprocess is already dead, so cap the
                // remaining transport teardown instead of risking a hang.
                let _ =
                    tokio::time::timeout(Duration::from_millis(500), adapter.shutdown()).await;
            } else {
                adapter.shutdown().await;
            }
        }
        Ok(())
    }

    /// One adapter invocation, including the fallback chain and the
    /// cost/context bookkeeping around it.
    async fn execute_iteration(&self) -> ralph_core::Result<IterationOutcome> {
        let prompt = self.context.lock().get_prompt();

        {
            let mut tasks = self.tasks.lock();
            if tasks.queue.is_empty() && tasks.current.is_none() && tasks.completed.is_empty() {
                extract_tasks(&mut tasks, &prompt);
            }
            let iteration = self.metrics.lock().iterations;
            start_next_task(&mut tasks, iteration);
        }

        let primary = Arc::clone(&self.adapters[self.current_adapter]);
        let mut response = primary
            .aexecute(&prompt, Some(&self.config.prompt_file), self.config.verbose)
            .await;
        let mut responding_tool = primary.name().to_string();

        // Fallback chain in registration order; never attempted once
        // shutdown is requested.
        if !response.success && self.adapters.len() > 1 && !self.shutdown.is_requested() {
            for (index, adapter) in self.adapters.iter().enumerate() {
                if index == self.current_adapter {
                    continue;
                }
                if self.shutdown.is_requested() {
                    break;
                }
                info!(fallback = adapter.name(), "primary failed, trying fallback");
                self.console
                    .info(&format!("Falling back to {}", adapter.name()));
                response = adapter
                    .aexecute(&prompt, Some(&self.config.prompt_file), self.config.verbose)
                    .await;
                if response.success {
                    responding_tool = adapter.name().to_string();
                    break;
                }
            }
        }

        if response.success && !response.output.is_empty() {
            *self.last_output.lock() = Some(response.output.clone());
            self.log_verbose("DEBUG", &format!("Agent response: {}", response.output));
        }

        let mut tokens_used = 0;
        let mut cost = 0.0;
        if response.success {
            if let Some(tracker) = self.cost_tracker.lock().as_mut() {
                let input_tokens = response
                    .tokens_used
                    .unwrap_or_else(|| estimate_tokens(&response.output));
                let output_tokens = input_tokens / 4;
                cost = tracker.add_usage(&responding_tool, input_tokens, output_tokens);
                tokens_used = input_tokens + output_tokens;
                info!(cost, total = tracker.total_cost(), "usage recorded");
            }
        }

        if response.success && response.output.chars().count() > 1000 {
            self.context.lock().update_context(&response.output);
        }
        if !response.success {
            if let Some(error) = &response.error {
                self.context.lock().add_error_feedback(error);
            }
        }

        if response.success {
            let lower = response.output.to_lowercase();
            if ["completed", "finished", "done", "committed"]
                .iter()
                .any(|word| lower.contains(word))
            {
                complete_current_task(&mut self.tasks.lock());
            }
        }

        Ok(IterationOutcome {
            success: response.success,
            output: (!response.output.is_empty()).then(|| response.output.clone()),
            error: response.error,
            tokens_used,
            cost,
        })
    }

    /// Backoff after a failed iteration; rollback once failures pile up.
    async fn handle_failure(&self) {
        warn!("iteration failed, attempting recovery");
        let failed = self.metrics.lock().failed_iterations;

        if self.config.retry_delay_seconds > 0 {
            let backoff = 2u64
                .saturating_pow(failed.min(32) as u32)
                .min(MAX_BACKOFF_SECONDS);
            self.log_verbose("DEBUG", &format!("Backing off for {backoff} seconds"));
            self.shutdown.sleep(Duration::from_secs(backoff)).await;
        }

        if failed > ROLLBACK_FAILURE_THRESHOLD {
            match self.checkpoints.rollback().await {
                Ok(()) => {
                    self.metrics.lock().rollbacks += 1;
                    self.console.info("Rolled back to previous checkpoint");
                }
                Err(err) => warn!(%err, "rollback failed"),
            }
        }
    }

    /// Exceptional iteration error: archive the prompt, and rebuild state
    /// once errors pile past the threshold.
    async fn handle_error(&self) {
        match self.checkpoints.archive_prompt(&self.config.prompt_file).await {
            Ok(path) => info!(path = %path.display(), "archived prompt"),
            Err(err) => warn!(%err, "failed to archive prompt"),
        }

        if self.metrics.lock().errors > RESET_ERROR_THRESHOLD {
            info!("too many errors, resetting state");
            self.reset_state();
        }
    }

    /// Rebuild metrics, telemetry, and cost tracking; clear context
    /// rollups. The stable prefix and session survive.
    fn reset_state(&self) {
        *self.metrics.lock() = Metrics::new();
        *self.iteration_stats.lock() = self
            .config
            .iteration_telemetry
            .then(|| IterationStats::with_preview_length(self.config.output_preview_length));
        *self.cost_tracker.lock() = self.config.track_costs.then(CostTracker::new);
        self.context.lock().reset();
        *self.last_iteration_success.lock() = None;
    }

    async fn create_checkpoint(&self, iteration: u64) {
        match self.checkpoints.create_checkpoint(iteration).await {
            Ok(()) => {
                let checkpoints = {
                    let mut metrics = self.metrics.lock();
                    metrics.checkpoints += 1;
                    metrics.checkpoints
                };
                self.console
                    .info(&format!("Checkpoint {checkpoints} created"));
            }
            Err(err) => warn!(%err, "failed to create checkpoint"),
        }
    }

    /// Whether the prompt file currently carries the completion marker.
    ///
    /// Case-sensitive exact match after trim; a present marker prevents
    /// any further agent invocation this run.
    fn completion_marker_present(&self) -> bool {
        let Ok(content) = std::fs::read_to_string(&self.config.prompt_file) else {
            return false;
        };
        content
            .lines()
            .any(|line| COMPLETION_MARKERS.contains(&line.trim()))
    }

    /// Why the next iteration is starting. Evaluated before the iteration
    /// counter increments.
    fn classify_trigger(&self) -> TriggerReason {
        let (iterations, failed) = {
            let metrics = self.metrics.lock();
            (metrics.iterations, metrics.failed_iterations)
        };

        if iterations == 0 {
            return TriggerReason::Initial;
        }

        if failed > 0 && failed as f64 / iterations.max(1) as f64 > 0.5 {
            return TriggerReason::Recovery;
        }

        if *self.last_iteration_success.lock() == Some(true) {
            return TriggerReason::PreviousSuccess;
        }

        TriggerReason::TaskIncomplete
    }

    fn record_telemetry(&self, entry: IterationEntry) {
        if let Some(stats) = self.iteration_stats.lock().as_mut() {
            stats.record_iteration(entry);
        }
    }

    fn log_verbose(&self, level: &str, message: &str) {
        if let Some(logger) = self.verbose_logger.lock().as_ref() {
            logger.log(level, message);
        }
    }

    fn print_summary(&self) {
        self.console.header("Ralph Orchestration Summary");

        if let Some(output) = self.last_output.lock().as_ref() {
            self.console.header("Final Agent Output");
            self.console.message(output);
        }

        let metrics = self.metrics.lock().clone();
        self.console.info(&format!(
            "Iterations: {} (successful: {}, failed: {})",
            metrics.iterations, metrics.successful_iterations, metrics.failed_iterations
        ));
        self.console.info(&format!(
            "Checkpoints: {}, Rollbacks: {}, Errors: {}",
            metrics.checkpoints, metrics.rollbacks, metrics.errors
        ));

        if let Some(tracker) = self.cost_tracker.lock().as_ref() {
            self.console
                .info(&format!("Total cost: ${:.4}", tracker.total_cost()));
            for (tool, cost) in tracker.costs_by_tool() {
                self.console.info(&format!("  {tool}: ${cost:.4}"));
            }
        }

        match self.dump_metrics() {
            Ok(path) => self
                .console
                .success(&format!("Metrics saved to {}", path.display())),
            Err(err) => warn!(%err, "failed to save metrics"),
        }
    }

    /// Write the final metrics JSON under `<agent_dir>/metrics/`.
    pub fn dump_metrics(&self) -> std::io::Result<PathBuf> {
        let metrics_dir = self.agent_dir.join("metrics");
        std::fs::create_dir_all(&metrics_dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = metrics_dir.join(format!("metrics_{timestamp}.json"));
        let data = serde_json::to_string_pretty(&self.metrics_json())?;
        std::fs::write(&path, data)?;
        Ok(path)
    }

    /// The final metrics document: summary counters, per-iteration
    /// records, cost breakdown, and derived analysis.
    pub fn metrics_json(&self) -> Value {
        let metrics = self.metrics.lock();
        let stats = self.iteration_stats.lock();
        let tracker = self.cost_tracker.lock();

        json!({
            "summary": {
                "iterations": metrics.iterations,
                "successful": metrics.successful_iterations,
                "failed": metrics.failed_iterations,
                "errors": metrics.errors,
                "checkpoints": metrics.checkpoints,
                "rollbacks": metrics.rollbacks,
            },
            "iterations": stats
                .as_ref()
                .map(|s| serde_json::to_value(s.records()).unwrap_or_else(|_| json!([])))
                .unwrap_or_else(|| json!([])),
            "cost": {
                "total": tracker.as_ref().map(|t| t.total_cost()).unwrap_or(0.0),
                "by_tool": tracker
                    .as_ref()
                    .map(|t| json!(t.costs_by_tool()))
                    .unwrap_or_else(|| json!({})),
                "history": tracker
                    .as_ref()
                    .map(|t| serde_json::to_value(t.usage_history()).unwrap_or_else(|_| json!([])))
                    .unwrap_or_else(|| json!([])),
            },
            "analysis": {
                "avg_iteration_duration": stats.as_ref().map(|s| s.average_duration()).unwrap_or(0.0),
                "success_rate": stats.as_ref().map(|s| s.success_rate()).unwrap_or(0.0),
            },
        })
    }

    /// Current task-queue snapshot for external monitors.
    pub fn task_status(&self) -> Value {
        let tasks = self.tasks.lock();
        json!({
            "current_task": tasks.current.as_ref().map(|t| t.to_json()),
            "task_queue": tasks.queue.iter().map(|t| t.to_json()).collect::<Vec<_>>(),
            "completed_tasks": tasks
                .completed
                .iter()
                .rev()
                .take(10)
                .map(|t| t.to_json())
                .collect::<Vec<_>>(),
            "queue_length": tasks.queue.len(),
            "completed_count": tasks.completed.len(),
            "current_iteration": self.metrics.lock().iterations,
            "task_duration": tasks.started_at.map(|t| t.elapsed().as_secs_f64()),
        })
    }

    /// Full orchestrator state snapshot for external monitors.
    pub fn orchestrator_state(&self) -> Value {
        let metrics = self.metrics.lock().clone();
        let runtime = self
            .start_time
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        json!({
            "status": if self.shutdown.is_requested() { "stopping" } else { "running" },
            "primary_tool": self.adapters[self.current_adapter].name(),
            "prompt_file": self.config.prompt_file.display().to_string(),
            "iteration": metrics.iterations,
            "max_iterations": self.config.max_iterations,
            "runtime": runtime,
            "max_runtime": self.config.max_runtime_seconds,
            "tasks": self.task_status(),
            "metrics": {
                "successful": metrics.successful_iterations,
                "failed": metrics.failed_iterations,
                "errors": metrics.errors,
                "checkpoints": metrics.checkpoints,
                "rollbacks": metrics.rollbacks,
            },
            "cost": {
                "total": self
                    .cost_tracker
                    .lock()
                    .as_ref()
                    .map(|t| t.total_cost())
                    .unwrap_or(0.0),
                "limit": self.config.track_costs.then_some(self.config.max_cost),
            },
        })
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Pull pending tasks out of the prompt: checkbox items, numbered lists,
/// and `Task:`/`TODO:` lines. A prompt with none yields a single general
/// task so progress tracking always has something to point at.
fn extract_tasks(tasks: &mut TaskQueue, prompt: &str) {
    let patterns = [
        regex::Regex::new(r"^\s*-\s*\[\s\]\s*(.+)$").expect("valid regex"),
        regex::Regex::new(r"^\s*\d+\.\s*(.+)$").expect("valid regex"),
        regex::Regex::new(r"^Task:\s*(.+)$").expect("valid regex"),
        regex::Regex::new(r"^TODO:\s*(.+)$").expect("valid regex"),
    ];

    let mut next_id = (tasks.queue.len() + tasks.completed.len()) as u64 + 1;
    for line in prompt.lines() {
        for pattern in &patterns {
            if let Some(captures) = pattern.captures(line) {
                tasks.queue.push_back(TaskItem {
                    id: next_id,
                    description: captures[1].trim().to_string(),
                    status: "pending".to_string(),
                    created_at: chrono::Local::now().to_rfc3339(),
                    completed_at: None,
                    iteration: None,
                });
                next_id += 1;
                break;
            }
        }
    }

    if tasks.queue.is_empty() && tasks.completed.is_empty() {
        tasks.queue.push_back(TaskItem {
            id: 1,
            description: "Execute orchestrator instructions".to_string(),
            status: "pending".to_string(),
            created_at: chrono::Local::now().to_rfc3339(),
            completed_at: None,
            iteration: None,
        });
    }
}

fn start_next_task(tasks: &mut TaskQueue, iteration: u64) {
    if tasks.current.is_none() {
        if let Some(mut task) = tasks.queue.pop_front() {
            task.status = "in_progress".to_string();
            task.iteration = Some(iteration);
            tasks.current = Some(task);
            tasks.started_at = Some(Instant::now());
        }
    }
}

fn complete_current_task(tasks: &mut TaskQueue) {
    if let Some(mut task) = tasks.current.take() {
        task.status = "completed".to_string();
        task.completed_at = Some(chrono::Local::now().to_rfc3339());
        tasks.completed.push(task);
        tasks.started_at = None;
    }
}
