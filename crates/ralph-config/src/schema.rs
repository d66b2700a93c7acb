//! Configuration schema for the orchestrator

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Serde default helper, returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u64 {
    100
}

fn default_max_runtime_seconds() -> u64 {
    14_400
}

fn default_max_cost() -> f64 {
    10.0
}

fn default_checkpoint_interval() -> u64 {
    5
}

fn default_retry_delay_seconds() -> u64 {
    2
}

fn default_consecutive_failure_limit() -> u32 {
    5
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./prompts/archive")
}

fn default_prompt_file() -> PathBuf {
    PathBuf::from("PROMPT.md")
}

fn default_output_preview_length() -> usize {
    500
}

fn default_max_context_size() -> usize {
    8_000
}

fn default_context_threshold() -> f64 {
    0.8
}

fn default_agent_command() -> String {
    "gemini".to_string()
}

fn default_acp_timeout_seconds() -> u64 {
    300
}

/// Which agent backend the orchestrator prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Qchat,
    Gemini,
    Acp,
    /// Resolve to the first available backend at registration time
    Auto,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Qchat => "qchat",
            AgentKind::Gemini => "gemini",
            AgentKind::Acp => "acp",
            AgentKind::Auto => "auto",
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(AgentKind::Claude),
            "q" | "qchat" => Ok(AgentKind::Qchat),
            "gemini" => Ok(AgentKind::Gemini),
            "acp" => Ok(AgentKind::Acp),
            "auto" => Ok(AgentKind::Auto),
            other => Err(format!("unknown agent: {other}")),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How agent permission requests are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Approve every request
    #[default]
    AutoApprove,
    /// Deny every request
    DenyAll,
    /// Approve only operations matching configured patterns
    Allowlist,
    /// Prompt the operator on the controlling TTY
    Interactive,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::AutoApprove => "auto_approve",
            PermissionMode::DenyAll => "deny_all",
            PermissionMode::Allowlist => "allowlist",
            PermissionMode::Interactive => "interactive",
        }
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_approve" => Ok(PermissionMode::AutoApprove),
            "deny_all" => Ok(PermissionMode::DenyAll),
            "allowlist" => Ok(PermissionMode::Allowlist),
            "interactive" => Ok(PermissionMode::Interactive),
            other => Err(format!("unknown permission mode: {other}")),
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ACP adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpSettings {
    /// Command used to spawn the agent (basename drives flag injection)
    #[serde(default = "default_agent_command")]
    pub agent_command: String,

    /// Extra arguments passed to the agent command
    #[serde(default)]
    pub agent_args: Vec<String>,

    /// Per-request deadline in seconds
    #[serde(default = "default_acp_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Permission handling mode
    #[serde(default)]
    pub permission_mode: PermissionMode,

    /// Patterns for allowlist mode: exact, glob, or `/regex/`
    #[serde(default)]
    pub permission_allowlist: Vec<String>,
}

impl Default for AcpSettings {
    fn default() -> Self {
        Self {
            agent_command: default_agent_command(),
            agent_args: Vec::new(),
            timeout_seconds: default_acp_timeout_seconds(),
            permission_mode: PermissionMode::default(),
            permission_allowlist: Vec::new(),
        }
    }
}

/// Top-level orchestrator configuration.
///
/// All ceilings treat `0` as unbounded for their dimension; the validator
/// additionally caps absolute magnitudes so a typo cannot configure a
/// multi-year run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RalphConfig {
    /// Preferred agent backend
    #[serde(default = "default_primary_tool")]
    pub primary_tool: AgentKind,

    /// Maximum loop iterations (0 = unbounded)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// Maximum wall-clock runtime in seconds (0 = unbounded)
    #[serde(default = "default_max_runtime_seconds")]
    pub max_runtime_seconds: u64,

    /// Maximum accumulated cost in dollars (0 = unbounded)
    #[serde(default = "default_max_cost")]
    pub max_cost: f64,

    /// Commit a git checkpoint every N iterations
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Base delay before retrying after a failed iteration
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// Consecutive failures tolerated before the safety guard trips
    #[serde(default = "default_consecutive_failure_limit")]
    pub consecutive_failure_limit: u32,

    /// Enable the cost tracker
    #[serde(default)]
    pub track_costs: bool,

    /// Directory receiving archived prompt snapshots
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// On-disk prompt source
    #[serde(default = "default_prompt_file")]
    pub prompt_file: PathBuf,

    /// Inline prompt override; takes precedence over `prompt_file`
    #[serde(default)]
    pub prompt_text: Option<String>,

    /// Stream verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Capture per-iteration telemetry
    #[serde(default = "default_true")]
    pub iteration_telemetry: bool,

    /// Maximum characters kept in telemetry output previews
    #[serde(default = "default_output_preview_length")]
    pub output_preview_length: usize,

    /// Maximum assembled prompt size in characters
    #[serde(default = "default_max_context_size")]
    pub max_context_size: usize,

    /// Context usage fraction that triggers optimization (0.0..=1.0)
    #[serde(default = "default_context_threshold")]
    pub context_threshold: f64,

    /// ACP adapter settings
    #[serde(default)]
    pub acp: AcpSettings,
}

fn default_primary_tool() -> AgentKind {
    AgentKind::Acp
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            primary_tool: default_primary_tool(),
            max_iterations: default_max_iterations(),
            max_runtime_seconds: default_max_runtime_seconds(),
            max_cost: default_max_cost(),
            checkpoint_interval: default_checkpoint_interval(),
            retry_delay_seconds: default_retry_delay_seconds(),
            consecutive_failure_limit: default_consecutive_failure_limit(),
            track_costs: false,
            archive_dir: default_archive_dir(),
            prompt_file: default_prompt_file(),
            prompt_text: None,
            verbose: false,
            iteration_telemetry: true,
            output_preview_length: default_output_preview_length(),
            max_context_size: default_max_context_size(),
            context_threshold: default_context_threshold(),
            acp: AcpSettings::default(),
        }
    }
}

impl RalphConfig {
    /// Validate field bounds. Called once at startup; violations are
    /// unrecoverable and exit non-zero.
    pub fn validate(&self) -> Result<(), String> {
        const MAX_ITERATIONS_CEILING: u64 = 1_000_000;
        const MAX_RUNTIME_CEILING: u64 = 30 * 24 * 3600;
        const MAX_COST_CEILING: f64 = 10_000.0;

        if self.max_iterations > MAX_ITERATIONS_CEILING {
            return Err(format!(
                "max_iterations {} exceeds ceiling {MAX_ITERATIONS_CEILING}",
                self.max_iterations
            ));
        }
        if self.max_runtime_seconds > MAX_RUNTIME_CEILING {
            return Err(format!(
                "max_runtime_seconds {} exceeds ceiling {MAX_RUNTIME_CEILING}",
                self.max_runtime_seconds
            ));
        }
        if self.max_cost < 0.0 {
            return Err(format!("max_cost must be non-negative, got {}", self.max_cost));
        }
        if self.max_cost > MAX_COST_CEILING {
            return Err(format!(
                "max_cost {} exceeds ceiling {MAX_COST_CEILING}",
                self.max_cost
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err("checkpoint_interval must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.context_threshold) {
            return Err(format!(
                "context_threshold must be within [0.0, 1.0], got {}",
                self.context_threshold
            ));
        }
        if self.output_preview_length == 0 {
            return Err("output_preview_length must be at least 1".to_string());
        }
        if self.acp.agent_command.trim().is_empty() {
            return Err("acp.agent_command must not be empty".to_string());
        }
        if self.acp.timeout_seconds == 0 {
            return Err("acp.timeout_seconds must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        RalphConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn test_zero_ceilings_mean_unbounded_and_validate() {
        let config = RalphConfig {
            max_iterations: 0,
            max_runtime_seconds: 0,
            max_cost: 0.0,
            ..Default::default()
        };
        config.validate().expect("zero ceilings are unbounded, not invalid");
    }

    #[test]
    fn test_negative_cost_rejected() {
        let config = RalphConfig {
            max_cost: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_context_threshold_limits_accepted() {
        for threshold in [0.0, 1.0] {
            let config = RalphConfig {
                context_threshold: threshold,
                ..Default::default()
            };
            config.validate().expect("threshold limits are inclusive");
        }
    }

    #[test]
    fn test_context_threshold_out_of_range_rejected() {
        let config = RalphConfig {
            context_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_checkpoint_interval_rejected() {
        let config = RalphConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_kind_parsing() {
        assert_eq!("claude".parse::<AgentKind>().unwrap(), AgentKind::Claude);
        assert_eq!("q".parse::<AgentKind>().unwrap(), AgentKind::Qchat);
        assert_eq!("qchat".parse::<AgentKind>().unwrap(), AgentKind::Qchat);
        assert_eq!("acp".parse::<AgentKind>().unwrap(), AgentKind::Acp);
        assert_eq!("auto".parse::<AgentKind>().unwrap(), AgentKind::Auto);
        assert!("cursor".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_permission_mode_parsing() {
        assert_eq!(
            "auto_approve".parse::<PermissionMode>().unwrap(),
            PermissionMode::AutoApprove
        );
        assert_eq!(
            "deny_all".parse::<PermissionMode>().unwrap(),
            PermissionMode::DenyAll
        );
        assert_eq!(
            "allowlist".parse::<PermissionMode>().unwrap(),
            PermissionMode::Allowlist
        );
        assert_eq!(
            "interactive".parse::<PermissionMode>().unwrap(),
            PermissionMode::Interactive
        );
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = RalphConfig {
            primary_tool: AgentKind::Acp,
            max_iterations: 7,
            track_costs: true,
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: RalphConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.primary_tool, AgentKind::Acp);
        assert_eq!(parsed.max_iterations, 7);
        assert!(parsed.track_costs);
    }
}
