/// Security event logging for scriptbox
/// Structured, one-line JSON events emitted through the `log` facade under the
/// `scriptbox::audit` target, so operators can route them separately.
///
/// Guest code never appears in an event; a SHA-256 digest identifies it instead.
use crate::config::types::{ExecutionMode, ExecutionResult, ResourceKind, ResourceViolation};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::SystemTime;
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "scriptbox::audit";

/// Security event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of security events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    // Lifecycle events
    ExecutionStart,
    ExecutionEnd,

    // Policy events
    CapabilityDenied,
    PolicyReload,

    // Limit violation events
    MemoryLimitViolation,
    CpuLimitViolation,
    WallTimeLimitViolation,
    OutputLimitViolation,

    // Controller-side events
    ForcedKill,
    ProcessFailure,
}

impl SecurityEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::ExecutionStart => SecuritySeverity::Low,
            SecurityEventType::ExecutionEnd => SecuritySeverity::Low,
            SecurityEventType::PolicyReload => SecuritySeverity::Low,

            SecurityEventType::CapabilityDenied => SecuritySeverity::Medium,
            SecurityEventType::OutputLimitViolation => SecuritySeverity::Medium,

            SecurityEventType::MemoryLimitViolation => SecuritySeverity::High,
            SecurityEventType::CpuLimitViolation => SecuritySeverity::High,
            SecurityEventType::WallTimeLimitViolation => SecuritySeverity::High,
            SecurityEventType::ForcedKill => SecuritySeverity::High,

            SecurityEventType::ProcessFailure => SecuritySeverity::Critical,
        }
    }

    pub fn for_violation(violation: &ResourceViolation) -> Self {
        match violation.kind {
            ResourceKind::CpuTime => SecurityEventType::CpuLimitViolation,
            ResourceKind::WallClock => SecurityEventType::WallTimeLimitViolation,
            ResourceKind::Memory => SecurityEventType::MemoryLimitViolation,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    /// Unique run identifier, shared by every event of one execution
    pub run_id: String,
    /// Hex SHA-256 of the guest code
    pub code_digest: String,
    /// Worker process id once spawned
    pub worker_pid: Option<u32>,
}

impl CorrelationIds {
    pub fn new(code: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            code_digest: code_digest(code),
            worker_pid: None,
        }
    }

    pub fn with_worker_pid(mut self, pid: u32) -> Self {
        self.worker_pid = Some(pid);
        self
    }
}

/// Hex-encoded SHA-256 of guest source.
pub fn code_digest(code: &str) -> String {
    Sha256::digest(code.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Individual security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: SystemTime,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub mode: Option<ExecutionMode>,
    pub restricted: Option<bool>,
}

impl SecurityEvent {
    /// Create a new security event with default severity
    pub fn new(event_type: SecurityEventType, details: String) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: SystemTime::now(),
            details,
            correlation: None,
            mode: None,
            restricted: None,
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_request(mut self, mode: ExecutionMode, restricted: bool) -> Self {
        self.mode = Some(mode);
        self.restricted = Some(restricted);
        self
    }

    /// One-line JSON rendering of the event
    pub fn to_json(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "timestamp": self.timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });

        if let Some(correlation) = &self.correlation {
            entry["correlation"] = serde_json::json!({
                "run_id": correlation.run_id,
                "code_digest": correlation.code_digest,
                "worker_pid": correlation.worker_pid,
            });
        }
        if let Some(mode) = self.mode {
            entry["mode"] = serde_json::json!(mode);
        }
        if let Some(restricted) = self.restricted {
            entry["restricted"] = serde_json::json!(restricted);
        }
        entry
    }
}

/// Log a security event at the level its severity maps to
pub fn log_security_event(event: SecurityEvent) {
    let entry = event.to_json();
    match event.severity {
        SecuritySeverity::Critical | SecuritySeverity::High => {
            error!(target: AUDIT_TARGET, "{}", entry)
        }
        SecuritySeverity::Medium => warn!(target: AUDIT_TARGET, "{}", entry),
        SecuritySeverity::Low => info!(target: AUDIT_TARGET, "{}", entry),
    }
}

/// Convenience functions for common security events
pub mod events {
    use super::*;

    pub fn execution_start(ids: &CorrelationIds, mode: ExecutionMode, restricted: bool) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::ExecutionStart, "execution started".into())
                .with_correlation(ids)
                .with_request(mode, restricted),
        );
    }

    pub fn execution_end(ids: &CorrelationIds, result: &ExecutionResult) {
        let details = if result.exception.is_empty() {
            format!("completed, exit_code={}", result.exit_code)
        } else {
            let headline = result.exception.lines().last().unwrap_or_default();
            format!("completed with exception: {}", headline)
        };
        log_security_event(
            SecurityEvent::new(SecurityEventType::ExecutionEnd, details).with_correlation(ids),
        );
    }

    pub fn capability_denied(ids: &CorrelationIds, what: &str) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::CapabilityDenied,
                format!("guest denied: {}", what),
            )
            .with_correlation(ids),
        );
    }

    pub fn limit_violation(ids: &CorrelationIds, violation: &ResourceViolation) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::for_violation(violation), violation.to_string())
                .with_correlation(ids),
        );
    }

    pub fn output_truncated(ids: &CorrelationIds, limit: usize) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::OutputLimitViolation,
                format!("guest output truncated at {} bytes", limit),
            )
            .with_correlation(ids),
        );
    }

    pub fn forced_kill(ids: &CorrelationIds, after_ms: u128) {
        log_security_event(
            SecurityEvent::new(
                SecurityEventType::ForcedKill,
                format!("worker killed {}ms after spawn", after_ms),
            )
            .with_correlation(ids),
        );
    }

    pub fn process_failure(ids: &CorrelationIds, reason: &str) {
        log_security_event(
            SecurityEvent::new(SecurityEventType::ProcessFailure, reason.to_string())
                .with_correlation(ids),
        );
    }

    pub fn policy_reload(document: &str) {
        log_security_event(SecurityEvent::new(
            SecurityEventType::PolicyReload,
            format!("policy document '{}' reloaded", document),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_replaces_code() {
        let ids = CorrelationIds::new("import os\nos.system('id')");
        assert_eq!(ids.code_digest.len(), 64);
        let event = SecurityEvent::new(SecurityEventType::CapabilityDenied, "module disabled: os".into())
            .with_correlation(&ids);
        let text = event.to_json().to_string();
        assert!(!text.contains("os.system"));
        assert!(text.contains(&ids.run_id));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            code_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_violation_maps_to_event_type() {
        let v = ResourceViolation::new(ResourceKind::Memory, "x");
        assert_eq!(SecurityEventType::for_violation(&v), SecurityEventType::MemoryLimitViolation);
        assert_eq!(
            SecurityEventType::ForcedKill.default_severity(),
            SecuritySeverity::High
        );
    }
}
