//! Config loading: YAML files, environment overrides, validation

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{PermissionMode, RalphConfig};

/// Errors surfaced while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Workspace-local config file locations, first match wins.
fn config_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("ralph.yaml"),
        PathBuf::from("ralph.yml"),
        PathBuf::from(".ralph.yaml"),
        PathBuf::from(".ralph.yml"),
    ]
}

/// Load configuration from disk, apply `RALPH_*` env overrides, validate.
///
/// `explicit` is the `--config` CLI flag; when set, that file must exist and
/// parse. Without it the workspace-local search paths are probed and a
/// missing file just yields defaults.
pub fn load(explicit: Option<&Path>) -> Result<RalphConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) => read_config_file(path)?,
        None => {
            let mut found = None;
            for path in config_search_paths() {
                if path.is_file() {
                    debug!(path = %path.display(), "loading config file");
                    found = Some(read_config_file(&path)?);
                    break;
                }
            }
            found.unwrap_or_default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate().map_err(ConfigError::Validation)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<RalphConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `RALPH_ACP_AGENT`, `RALPH_ACP_PERMISSION_MODE`, and
/// `RALPH_ACP_TIMEOUT` overrides.
///
/// Invalid values (unparseable mode or non-numeric timeout) are logged and
/// ignored so a stray shell export cannot break a configured run. The env
/// lookup is injected for testability.
pub fn apply_env_overrides<F>(config: &mut RalphConfig, get: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(agent) = get("RALPH_ACP_AGENT") {
        if !agent.trim().is_empty() {
            config.acp.agent_command = agent;
        }
    }

    if let Some(mode) = get("RALPH_ACP_PERMISSION_MODE") {
        match mode.parse::<PermissionMode>() {
            Ok(parsed) => config.acp.permission_mode = parsed,
            Err(err) => {
                warn!("Ignoring RALPH_ACP_PERMISSION_MODE: {err}");
            }
        }
    }

    if let Some(timeout) = get("RALPH_ACP_TIMEOUT") {
        match timeout.parse::<u64>() {
            Ok(parsed) if parsed > 0 => config.acp.timeout_seconds = parsed,
            _ => {
                warn!("Ignoring invalid RALPH_ACP_TIMEOUT value: {timeout}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ralph.yaml");
        std::fs::write(
            &path,
            "max_iterations: 3\nacp:\n  agent_command: claude-code-acp\n  timeout_seconds: 60\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.acp.agent_command, "claude-code-acp");
        assert_eq!(config.acp.timeout_seconds, 60);
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let result = load(Some(Path::new("/nonexistent/ralph.yaml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_malformed_yaml_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ralph.yaml");
        std::fs::write(&path, "max_iterations: [not a number\n").unwrap();
        assert!(matches!(load(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_config_rejected_at_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ralph.yaml");
        std::fs::write(&path, "max_cost: -5.0\n").unwrap();
        assert!(matches!(
            load(Some(&path)),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = RalphConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("RALPH_ACP_AGENT", "claude-code-acp"),
                ("RALPH_ACP_PERMISSION_MODE", "deny_all"),
                ("RALPH_ACP_TIMEOUT", "42"),
            ]),
        );
        assert_eq!(config.acp.agent_command, "claude-code-acp");
        assert_eq!(config.acp.permission_mode, PermissionMode::DenyAll);
        assert_eq!(config.acp.timeout_seconds, 42);
    }

    #[test]
    fn test_invalid_numeric_env_falls_back() {
        let mut config = RalphConfig::default();
        config.acp.timeout_seconds = 120;
        apply_env_overrides(&mut config, env(&[("RALPH_ACP_TIMEOUT", "not-a-number")]));
        assert_eq!(config.acp.timeout_seconds, 120);
    }

    #[test]
    fn test_invalid_mode_env_falls_back() {
        let mut config = RalphConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[("RALPH_ACP_PERMISSION_MODE", "ask-nicely")]),
        );
        assert_eq!(config.acp.permission_mode, PermissionMode::AutoApprove);
    }

    #[test]
    fn test_no_env_no_change() {
        let mut config = RalphConfig::default();
        let before = config.acp.agent_command.clone();
        apply_env_overrides(&mut config, env(&[]));
        assert_eq!(config.acp.agent_command, before);
    }
}
