//! Command-line argument parsing and config assembly
//!
//! Precedence, lowest to highest: config file, `RALPH_*` environment
//! overrides (applied by the loader), CLI flags.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use ralph_config::{AgentKind, PermissionMode, RalphConfig};

#[derive(Debug, Parser)]
#[command(
    name = "ralph",
    version,
    about = "Iterative AI-agent orchestrator for ACP-compatible coding agents",
    long_about = "Runs a prompt through a coding agent in a bounded loop until the \
agent checks the TASK_COMPLETE marker or a safety limit fires."
)]
pub struct Cli {
    /// Agent backend: claude, q, qchat, gemini, acp, or auto
    #[arg(short = 'a', long = "agent")]
    pub agent: Option<String>,

    /// ACP agent command (e.g. "claude-code-acp" or "gemini --flag")
    #[arg(long = "acp-agent")]
    pub acp_agent: Option<String>,

    /// ACP permission mode: auto_approve, deny_all, allowlist, interactive
    #[arg(long = "acp-permission-mode")]
    pub acp_permission_mode: Option<String>,

    /// Maximum loop iterations (0 = unbounded)
    #[arg(long = "max-iterations")]
    pub max_iterations: Option<u64>,

    /// Maximum runtime in seconds (0 = unbounded)
    #[arg(long = "max-runtime")]
    pub max_runtime: Option<u64>,

    /// Maximum accumulated cost in dollars (0 = unbounded)
    #[arg(long = "max-cost", allow_negative_numbers = true)]
    pub max_cost: Option<f64>,

    /// Commit a git checkpoint every N successful iterations
    #[arg(long = "checkpoint-interval")]
    pub checkpoint_interval: Option<u64>,

    /// Directory for archived prompt snapshots
    #[arg(long = "archive-dir")]
    pub archive_dir: Option<PathBuf>,

    /// Prompt file to orchestrate
    #[arg(long = "prompt-file")]
    pub prompt_file: Option<PathBuf>,

    /// Inline prompt text (overrides the prompt file)
    #[arg(long = "prompt-text")]
    pub prompt_text: Option<String>,

    /// Stream verbose output and write the verbose log
    #[arg(long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Explicit config file (YAML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Load the layered configuration and fold the CLI flags on top.
    pub fn build_config(&self) -> anyhow::Result<RalphConfig> {
        let mut config =
            ralph_config::load(self.config.as_deref()).context("failed to load configuration")?;
        self.apply(&mut config)?;
        config
            .validate()
            .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;
        Ok(config)
    }

    fn apply(&self, config: &mut RalphConfig) -> anyhow::Result<()> {
        if let Some(agent) = &self.agent {
            config.primary_tool = agent
                .parse::<AgentKind>()
                .map_err(|err| anyhow::anyhow!(err))?;
        }

        if let Some(acp_agent) = &self.acp_agent {
            let Some(parts) = shlex::split(acp_agent) else {
                bail!("invalid --acp-agent command: {acp_agent}");
            };
            let mut parts = parts.into_iter();
            match parts.next() {
                Some(command) => {
                    config.acp.agent_command = command;
                    config.acp.agent_args = parts.collect();
                }
                None => bail!("--acp-agent command is empty"),
            }
        }

        if let Some(mode) = &self.acp_permission_mode {
            config.acp.permission_mode = mode
                .parse::<PermissionMode>()
                .map_err(|err| anyhow::anyhow!(err))?;
        }

        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(max_runtime) = self.max_runtime {
            config.max_runtime_seconds = max_runtime;
        }
        if let Some(max_cost) = self.max_cost {
            config.max_cost = max_cost;
            config.track_costs = max_cost > 0.0;
        }
        if let Some(interval) = self.checkpoint_interval {
            config.checkpoint_interval = interval;
        }
        if let Some(archive_dir) = &self.archive_dir {
            config.archive_dir = archive_dir.clone();
        }
        if let Some(prompt_file) = &self.prompt_file {
            config.prompt_file = prompt_file.clone();
        }
        if let Some(prompt_text) = &self.prompt_text {
            config.prompt_text = Some(prompt_text.clone());
        }
        if self.verbose {
            config.verbose = true;
        }

        Ok(())
    }
}
