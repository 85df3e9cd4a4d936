//! Worker role: one request in on stdin, one framed response out on stdout.

use crate::config::types::{ExecutionMode, Result, SandboxError};
use crate::core::protocol::{decode_request, encode_response};
use crate::exec::executor::Executor;
use log::info;
use std::io::{BufRead, Write};

/// Serve exactly one request. Errors here mean no response was written; the
/// controller sees that as a process failure.
pub fn serve<R: BufRead, W: Write>(
    executor: &Executor,
    mode: ExecutionMode,
    mut reader: R,
    mut writer: W,
) -> Result<()> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
        return Err(SandboxError::Protocol("no request on stdin".to_string()));
    }
    let request = decode_request(&line, mode)?;
    info!(
        "worker {} serving {} request",
        std::process::id(),
        mode.as_arg()
    );

    let result = executor.run(&request)?;
    writer.write_all(encode_response(&result).as_bytes())?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy::PolicyConfig;
    use crate::config::types::{ExecutionRequest, ResourceBudget};
    use crate::core::protocol::{decode_response, encode_request};
    use crate::kernel::Enforcement;
    use std::sync::Arc;

    fn executor() -> Executor {
        Executor::new(
            Arc::new(PolicyConfig::embedded().unwrap()),
            ResourceBudget::default(),
            Enforcement::InProcess,
        )
    }

    #[test]
    fn test_serves_one_request() {
        let request = ExecutionRequest::new("print(input())", ExecutionMode::StatementBlock)
            .with_input("echo\n");
        let line = format!("{}\n", encode_request(&request).unwrap());
        let mut out = Vec::new();
        serve(&executor(), ExecutionMode::StatementBlock, line.as_bytes(), &mut out).unwrap();

        let result = decode_response(std::str::from_utf8(&out).unwrap()).unwrap();
        assert_eq!(result.output, "echo\n");
        assert!(result.is_success());
    }

    #[test]
    fn test_empty_stdin_writes_nothing() {
        let mut out = Vec::new();
        let err = serve(&executor(), ExecutionMode::StatementBlock, &b""[..], &mut out).unwrap_err();
        assert!(matches!(err, SandboxError::Protocol(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_guest_exit_is_data() {
        let request = ExecutionRequest::new("exit(4)", ExecutionMode::StatementBlock);
        let line = encode_request(&request).unwrap();
        let mut out = Vec::new();
        serve(&executor(), ExecutionMode::StatementBlock, line.as_bytes(), &mut out).unwrap();
        let result = decode_response(std::str::from_utf8(&out).unwrap()).unwrap();
        assert_eq!(result.exit_code, 4);
        assert_eq!(result.exception, "SystemExit: 4");
    }
}
