/// Core types shared by the scanner, executor and isolation channel
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// How the guest source is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// A block of statements; output is whatever the guest prints.
    #[serde(rename = "exec")]
    StatementBlock,
    /// A single expression; its value is appended to the output.
    #[serde(rename = "eval")]
    SingleExpression,
}

impl ExecutionMode {
    /// The argument the worker process is launched with.
    pub fn as_arg(self) -> &'static str {
        match self {
            ExecutionMode::StatementBlock => "exec",
            ExecutionMode::SingleExpression => "eval",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for ExecutionMode {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exec" | "statement-block" => Ok(ExecutionMode::StatementBlock),
            "eval" | "single-expression" => Ok(ExecutionMode::SingleExpression),
            other => Err(SandboxError::Config(format!(
                "unknown execution mode '{}' (expected exec or eval)",
                other
            ))),
        }
    }
}

/// One guest submission. Immutable once built; consumed by exactly one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRequest {
    code: String,
    mode: ExecutionMode,
    input: String,
    restricted: bool,
}

impl ExecutionRequest {
    /// Restricted request with empty simulated stdin.
    pub fn new(code: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            code: code.into(),
            mode,
            input: String::new(),
            restricted: true,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn restricted(&self) -> bool {
        self.restricted
    }
}

/// Resource budget attached to a single execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    /// Wall clock limit (seconds)
    pub max_wall_seconds: f64,
    /// CPU time limit (seconds)
    pub max_cpu_seconds: f64,
    /// Memory growth limit (bytes)
    pub max_memory_bytes: u64,
    /// Captured output limit (bytes)
    pub max_output_bytes: usize,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        ResourceBudget {
            max_wall_seconds: 5.0,
            max_cpu_seconds: 3.0,
            max_memory_bytes: 256 * 1024 * 1024, // 256 MB
            max_output_bytes: 16 * 1024,         // 16 KB
        }
    }
}

impl ResourceBudget {
    pub fn wall_limit(&self) -> Duration {
        Duration::from_secs_f64(self.max_wall_seconds.max(0.0))
    }

    pub fn cpu_limit(&self) -> Duration {
        Duration::from_secs_f64(self.max_cpu_seconds.max(0.0))
    }
}

/// Outcome of one execution as handed back across the isolation channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured guest output (size-bounded)
    pub output: String,
    /// Exception text, empty when the run finished normally
    pub exception: String,
    /// Guest-requested exit status, 0 unless the guest asked otherwise
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        ExecutionResult {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(output: impl Into<String>, exception: impl Into<String>) -> Self {
        ExecutionResult {
            output: output.into(),
            exception: exception.into(),
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exception.is_empty() && self.exit_code == 0
    }
}

/// Source text that does not parse.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// A capability the policy refused. Carries the qualified name that was blocked.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{reason}: {target}")]
pub struct CapabilityDenied {
    pub reason: String,
    pub target: String,
}

impl CapabilityDenied {
    pub fn module(name: &str) -> Self {
        Self {
            reason: "module disabled".to_string(),
            target: name.to_string(),
        }
    }

    pub fn attribute(qualified: &str) -> Self {
        Self {
            reason: "attribute disabled".to_string(),
            target: qualified.to_string(),
        }
    }

    pub fn reserved(names: &[String]) -> Self {
        Self {
            reason: "reserved attribute(s) disabled".to_string(),
            target: names.join(", "),
        }
    }
}

/// Which budget dimension was breached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "cpu")]
    CpuTime,
    #[serde(rename = "wall")]
    WallClock,
    #[serde(rename = "memory")]
    Memory,
}

/// A breached resource limit, rendered as `<KindName>: <explanation>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceViolation {
    pub kind: ResourceKind,
    pub explanation: String,
}

impl ResourceViolation {
    pub fn new(kind: ResourceKind, explanation: impl Into<String>) -> Self {
        Self {
            kind,
            explanation: explanation.into(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ResourceKind::CpuTime | ResourceKind::WallClock => "TimeoutError",
            ResourceKind::Memory => "MemoryError",
        }
    }
}

impl fmt::Display for ResourceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind_name(), self.explanation)
    }
}

impl std::error::Error for ResourceViolation {}

/// An exception raised (or caused) by the guest script itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestException {
    pub kind: String,
    pub message: String,
    pub line: Option<u32>,
}

impl GuestException {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// Short traceback: innermost location plus the message, never host frames.
    pub fn short_traceback(&self) -> String {
        let headline = if self.message.is_empty() {
            self.kind.clone()
        } else {
            format!("{}: {}", self.kind, self.message)
        };
        match self.line {
            Some(line) => format!(
                "Traceback (most recent call last):\n  File \"<guest>\", line {}\n{}",
                line, headline
            ),
            None => headline,
        }
    }
}

/// Every condition the worker turns into `ExecutionResult.exception` text
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    Parse(ParseError),
    Denied(CapabilityDenied),
    Exceeded(ResourceViolation),
    Guest(GuestException),
    Exit(i32),
}

impl Fault {
    /// Text for the exception field; `None` for a clean guest exit.
    pub fn render(&self) -> Option<String> {
        match self {
            Fault::Parse(err) => Some(format!("SyntaxError: {}", err)),
            Fault::Denied(denied) => Some(format!("CapabilityDenied: {}", denied)),
            Fault::Exceeded(violation) => Some(violation.to_string()),
            Fault::Guest(exc) => Some(exc.short_traceback()),
            Fault::Exit(0) => None,
            Fault::Exit(code) => Some(format!("{}: {}", EXIT_SENTINEL, code)),
        }
    }
}

/// Marker heading the exception segment that carries a guest exit status.
pub const EXIT_SENTINEL: &str = "SystemExit";

/// Crate-level errors. Only `ProcessFailure` crosses the isolation channel.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration document not found: {0}")]
    ConfigNotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Worker process failure: {0}")]
    ProcessFailure(String),

    #[error("Resource limit error: {0}")]
    ResourceLimit(String),
}

/// Result type for scriptbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trips_through_arg() {
        for mode in [ExecutionMode::StatementBlock, ExecutionMode::SingleExpression] {
            assert_eq!(mode.as_arg().parse::<ExecutionMode>().unwrap(), mode);
        }
        assert!("repl".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_request_defaults_to_restricted() {
        let req = ExecutionRequest::new("1", ExecutionMode::SingleExpression);
        assert!(req.restricted());
        assert_eq!(req.input(), "");
        let req = req.with_restricted(false).with_input("abc");
        assert!(!req.restricted());
        assert_eq!(req.input(), "abc");
    }

    #[test]
    fn test_fault_rendering() {
        let parse = Fault::Parse(ParseError::new(2, 5, "invalid syntax"));
        assert_eq!(
            parse.render().unwrap(),
            "SyntaxError: invalid syntax (line 2, column 5)"
        );

        let denied = Fault::Denied(CapabilityDenied::module("os"));
        assert_eq!(
            denied.render().unwrap(),
            "CapabilityDenied: module disabled: os"
        );

        let mem = Fault::Exceeded(ResourceViolation::new(ResourceKind::Memory, "too much"));
        assert_eq!(mem.render().unwrap(), "MemoryError: too much");

        assert_eq!(Fault::Exit(0).render(), None);
        assert_eq!(Fault::Exit(7).render().unwrap(), "SystemExit: 7");
    }

    #[test]
    fn test_short_traceback_hides_host_frames() {
        let exc = GuestException::new("ZeroDivisionError", "division by zero").at_line(3);
        let text = exc.short_traceback();
        assert!(text.contains("line 3"));
        assert!(text.ends_with("ZeroDivisionError: division by zero"));
        assert!(!text.contains(".rs"));
    }
}
