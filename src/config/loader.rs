use crate::config::types::{ResourceBudget, Result, SandboxError};
/// Configuration loading from scriptbox.json
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default file name searched for in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "scriptbox.json";

/// Controller and worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Worker executable; the current executable when unset
    pub worker_path: Option<PathBuf>,
    /// Directory holding the policy documents; embedded copies when unset
    pub policy_dir: Option<PathBuf>,
    /// Budget applied to every request
    pub budget: ResourceBudget,
    /// How long past the wall deadline the controller waits before killing
    pub kill_grace_seconds: f64,
    /// Cap on worker stderr kept for diagnostics (bytes)
    pub max_stderr_bytes: usize,
    /// Fail start-up on validation errors instead of logging them
    pub strict: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            policy_dir: None,
            budget: ResourceBudget::default(),
            kill_grace_seconds: 2.0,
            max_stderr_bytes: 4096,
            strict: true,
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SandboxError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load ./scriptbox.json, falling back to defaults when it is absent
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| SandboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if !config_path.exists() {
            log::debug!("{} not found, using built-in defaults", DEFAULT_CONFIG_FILE);
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs_f64(self.kill_grace_seconds.max(0.0))
    }

    /// Controller-side deadline for one worker: wall budget plus grace.
    pub fn deadline(&self) -> Duration {
        self.budget.wall_limit() + self.kill_grace()
    }

    pub fn worker_executable(&self) -> Result<PathBuf> {
        match &self.worker_path {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                SandboxError::Config(format!("Failed to locate worker executable: {}", e))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"budget": {{"max_wall_seconds": 1.5}}, "kill_grace_seconds": 0.5}}"#)
            .unwrap();

        let config = SandboxConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.budget.max_wall_seconds, 1.5);
        assert_eq!(config.budget.max_cpu_seconds, ResourceBudget::default().max_cpu_seconds);
        assert_eq!(config.deadline(), Duration::from_secs(2));
        assert!(config.policy_dir.is_none());
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = SandboxConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }
}
