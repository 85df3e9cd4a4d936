// Start-up validation of the sandbox configuration.
// Strict mode fails fast with every problem listed; permissive mode logs them.

use crate::config::loader::SandboxConfig;
use crate::config::policy::{PolicyConfig, PolicyStore};
use crate::config::types::{ResourceBudget, Result, SandboxError};

/// Ceiling past which a budget is treated as a typo rather than a choice.
const MAX_SANE_SECONDS: f64 = 3600.0;

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup
pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_budget(&config.budget, &mut result);
    validate_paths(config, &mut result);

    if config.kill_grace_seconds <= 0.0 {
        result.add_error("kill_grace_seconds must be positive".to_string());
    }

    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }

    if config.strict && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(SandboxError::Config(error_msg));
    }

    Ok(result)
}

/// Validate resource limits
pub fn validate_budget(budget: &ResourceBudget, result: &mut ValidationResult) {
    for (name, seconds) in [
        ("max_wall_seconds", budget.max_wall_seconds),
        ("max_cpu_seconds", budget.max_cpu_seconds),
    ] {
        if !seconds.is_finite() || seconds <= 0.0 {
            result.add_error(format!("{} must be a positive number of seconds", name));
        } else if seconds > MAX_SANE_SECONDS {
            result.add_error(format!("{} {} exceeds one hour", name, seconds));
        } else if seconds < 0.1 {
            result.add_warning(format!("{} {} is very low, most scripts will time out", name, seconds));
        }
    }

    if budget.max_memory_bytes == 0 {
        result.add_error("max_memory_bytes cannot be zero".to_string());
    } else if budget.max_memory_bytes < 1024 * 1024 {
        result.add_warning(format!(
            "max_memory_bytes {} is very low (< 1MB), may cause spurious MemoryError",
            budget.max_memory_bytes
        ));
    }

    if budget.max_output_bytes == 0 {
        result.add_error("max_output_bytes cannot be zero".to_string());
    }

    if budget.max_cpu_seconds > budget.max_wall_seconds {
        result.add_warning(format!(
            "max_cpu_seconds ({}) exceeds max_wall_seconds ({}), the wall clock always fires first",
            budget.max_cpu_seconds, budget.max_wall_seconds
        ));
    }
}

/// Validate paths and that the configured policy actually loads
fn validate_paths(config: &SandboxConfig, result: &mut ValidationResult) {
    if let Some(worker) = &config.worker_path {
        if !worker.is_file() {
            result.add_error(format!("worker_path does not exist: {:?}", worker));
        }
    }

    if let Some(dir) = &config.policy_dir {
        if !dir.is_dir() {
            result.add_error(format!("policy_dir is not a directory: {:?}", dir));
            return;
        }
    }

    let store = PolicyStore::from_optional_dir(config.policy_dir.as_deref());
    if let Err(e) = PolicyConfig::load(&store) {
        result.add_error(format!("policy from {} does not load: {}", store.describe(), e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissive() -> SandboxConfig {
        SandboxConfig {
            strict: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_default_config() {
        let result = validate_config(&SandboxConfig::default()).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_zero_memory_limit() {
        let mut config = permissive();
        config.budget.max_memory_bytes = 0;

        let result = validate_config(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("max_memory_bytes cannot be zero")));
    }

    #[test]
    fn test_absurd_wall_time() {
        let mut config = permissive();
        config.budget.max_wall_seconds = 86400.0;

        let result = validate_config(&config).unwrap();
        assert!(result.errors.iter().any(|e| e.contains("max_wall_seconds")));
    }

    #[test]
    fn test_low_limits_only_warn() {
        let mut config = permissive();
        config.budget.max_memory_bytes = 4096;
        config.budget.max_cpu_seconds = 0.05;

        let result = validate_config(&config).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_strict_mode_fails_fast() {
        let mut config = SandboxConfig::default();
        config.policy_dir = Some("/nonexistent/scriptbox/policy".into());

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("policy_dir"));
    }
}
