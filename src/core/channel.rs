//! Controller side of the isolation boundary.
//!
//! Every submission spawns a fresh worker process, streams the request line
//! into it and decodes its framed response. The controller never trusts the
//! worker to stop on its own: past `wall + grace` the process is killed and
//! the submission fails.

use crate::config::loader::SandboxConfig;
use crate::config::types::{ExecutionRequest, ExecutionResult, Result, SandboxError};
use crate::core::protocol::{decode_response, encode_request};
use crate::observability::audit::{events, CorrelationIds};
use crate::utils::output::{collect_bounded, OutputIntegrity};
use log::{debug, warn};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time;

/// Framing overhead allowed on top of the output budget: base64 expansion
/// plus room for exception segments.
const RESPONSE_SLACK_BYTES: usize = 64 * 1024;

pub struct IsolationChannel {
    worker: PathBuf,
    config: SandboxConfig,
}

impl IsolationChannel {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        Ok(Self {
            worker: config.worker_executable()?,
            config,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn command(&self, request: &ExecutionRequest) -> Command {
        let budget = &self.config.budget;
        let mut command = Command::new(&self.worker);
        command
            .arg(request.mode().as_arg())
            .arg("--wall")
            .arg(budget.max_wall_seconds.to_string())
            .arg("--cpu")
            .arg(budget.max_cpu_seconds.to_string())
            .arg("--memory")
            .arg(budget.max_memory_bytes.to_string())
            .arg("--output")
            .arg(budget.max_output_bytes.to_string());
        if let Some(dir) = &self.config.policy_dir {
            command.arg("--policy-dir").arg(dir);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn response_limit(&self) -> usize {
        self.config.budget.max_output_bytes / 3 * 4 + RESPONSE_SLACK_BYTES
    }

    /// Run one request in a new worker. Only `ProcessFailure` (and host I/O
    /// errors while spawning) come back as `Err`; everything the guest did
    /// is inside the result.
    pub async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let mut ids = CorrelationIds::new(request.code());
        let line = encode_request(request)?;

        let started = Instant::now();
        let mut child = self.command(request).spawn().map_err(|e| {
            SandboxError::ProcessFailure(format!(
                "cannot spawn worker {}: {}",
                self.worker.display(),
                e
            ))
        })?;
        if let Some(pid) = child.id() {
            ids = ids.with_worker_pid(pid);
        }
        debug!("spawned worker {:?} for run {}", child.id(), ids.run_id);

        let failure = |reason: String| {
            events::process_failure(&ids, &reason);
            SandboxError::ProcessFailure(reason)
        };

        let (mut stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => return Err(failure("worker pipes unavailable".to_string())),
            };

        let response_limit = self.response_limit();
        let stderr_limit = self.config.max_stderr_bytes;
        let exchange = async {
            // a worker that dies before reading shows up in its exit status
            if let Err(e) = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await
            }
            .await
            {
                warn!("could not deliver request to worker: {}", e);
            }
            drop(stdin);
            tokio::join!(
                collect_bounded(stdout, response_limit),
                collect_bounded(stderr, stderr_limit),
                child.wait()
            )
        };

        let deadline = self.config.deadline();
        let outcome = time::timeout(deadline, exchange).await;
        let (stdout, stderr, status) = match outcome {
            Ok(done) => done,
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!("failed to kill worker: {}", e);
                }
                let _ = child.wait().await;
                events::forced_kill(&ids, started.elapsed().as_millis());
                return Err(failure(format!(
                    "worker did not finish within {:?}",
                    deadline
                )));
            }
        };

        let stderr = stderr.map(|(bytes, _)| bytes).unwrap_or_default();
        let diagnostics = String::from_utf8_lossy(&stderr);
        if let Some(reason) = exit_failure(status, &diagnostics) {
            return Err(failure(reason));
        }

        let (stdout, integrity) = stdout?;
        if integrity == OutputIntegrity::Truncated {
            return Err(failure(format!(
                "worker response exceeded {} bytes",
                response_limit
            )));
        }
        let text = String::from_utf8_lossy(&stdout);
        decode_response(&text).map_err(|e| failure(format!("{} (stderr: {})", e, diagnostics.trim())))
    }
}

/// Why a finished worker's response cannot be used, if it cannot.
fn exit_failure(status: std::io::Result<ExitStatus>, diagnostics: &str) -> Option<String> {
    match status {
        Err(e) => Some(format!("cannot wait for worker: {}", e)),
        Ok(status) if !status.success() => Some(format!(
            "worker exited with {}: {}",
            status,
            diagnostics.trim()
        )),
        Ok(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ExecutionMode;
    use std::os::unix::process::ExitStatusExt;

    fn channel_to(worker: &str) -> IsolationChannel {
        let config = SandboxConfig {
            worker_path: Some(PathBuf::from(worker)),
            kill_grace_seconds: 0.5,
            ..SandboxConfig::default()
        };
        IsolationChannel::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_missing_worker_is_process_failure() {
        let channel = channel_to("/nonexistent/scriptbox-worker");
        let request = ExecutionRequest::new("1", ExecutionMode::SingleExpression);
        let err = channel.submit(&request).await.unwrap_err();
        assert!(matches!(err, SandboxError::ProcessFailure(_)));
    }

    #[tokio::test]
    async fn test_silent_worker_is_process_failure() {
        // `true` accepts any arguments, reads nothing and prints nothing
        let channel = channel_to("/bin/true");
        let request = ExecutionRequest::new("1", ExecutionMode::SingleExpression);
        match channel.submit(&request).await {
            Err(SandboxError::ProcessFailure(reason)) => {
                assert!(reason.contains("no response"), "{}", reason)
            }
            other => panic!("expected process failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_worker_reports_status() {
        let channel = channel_to("/bin/false");
        let request = ExecutionRequest::new("1", ExecutionMode::SingleExpression);
        match channel.submit(&request).await {
            Err(SandboxError::ProcessFailure(reason)) => assert!(reason.contains("exited")),
            other => panic!("expected process failure, got {:?}", other),
        }
    }

    #[test]
    fn test_wait_error_is_a_worker_failure() {
        let lost = std::io::Error::new(std::io::ErrorKind::Other, "child already reaped");
        let reason = exit_failure(Err(lost), "").unwrap();
        assert!(reason.starts_with("cannot wait for worker"), "{}", reason);
        assert!(reason.contains("child already reaped"));
    }

    #[test]
    fn test_exit_status_decides_failure() {
        assert_eq!(exit_failure(Ok(ExitStatus::from_raw(0)), "noise"), None);
        // wait status 256 is exit code 1
        let reason = exit_failure(Ok(ExitStatus::from_raw(256)), " boom\n").unwrap();
        assert!(reason.contains("exited"), "{}", reason);
        assert!(reason.ends_with("boom"), "{}", reason);
    }
}
