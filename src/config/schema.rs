//! Configuration schema for Kiln
//!
//! Configuration is stored at `~/.config/kiln/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Solver settings
    pub solver: SolverConfig,

    /// Local worker settings
    pub worker: WorkerConfig,

    /// Progress display
    pub progress: ProgressConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Solver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum concurrent process executions (0 = available parallelism)
    pub max_parallelism: usize,

    /// Deadline for a whole solve in seconds
    pub timeout_secs: Option<u64>,
}

/// Local worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Parent directory for sandboxes (default: system temp dir)
    pub scratch_dir: Option<PathBuf>,

    /// Pass the host PATH when a vertex declares none
    pub inherit_path: bool,

    /// Keep sandbox directories after the process exits
    pub keep_sandbox: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            inherit_path: true,
            keep_sandbox: false,
        }
    }
}

/// Progress display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// "auto", "plain" or "json"
    pub mode: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[worker]"));
        assert!(toml.contains("inherit_path = true"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.progress.mode, "auto");
        assert_eq!(config.solver.max_parallelism, 0);
        assert!(config.solver.timeout_secs.is_none());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [solver]
            timeout_secs = 600
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.solver.timeout_secs, Some(600));
        assert!(config.worker.inherit_path); // default preserved
    }
}
