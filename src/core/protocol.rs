//! Line-framed wire format between controller and worker.
//!
//! Request: one base64 line holding the JSON form of an [`ExecutionRequest`]
//! (the mode travels as the worker's command-line argument).
//! Response: newline-separated base64 segments. Segment 0 is the captured
//! output, every later segment is exception text.

use crate::config::types::{
    ExecutionMode, ExecutionRequest, ExecutionResult, Result, SandboxError, EXIT_SENTINEL,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    code: String,
    #[serde(default)]
    input: String,
    #[serde(default = "restricted_by_default")]
    restricted: bool,
}

fn restricted_by_default() -> bool {
    true
}

fn protocol_error(what: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Protocol(format!("{}: {}", what, err))
}

pub fn encode_segment(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_segment(line: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(line.trim_end_matches('\r'))
        .map_err(|e| protocol_error("invalid base64 segment", e))
}

fn decode_text(line: &str) -> Result<String> {
    String::from_utf8(decode_segment(line)?).map_err(|e| protocol_error("segment is not UTF-8", e))
}

/// The request line, without its terminating newline.
pub fn encode_request(request: &ExecutionRequest) -> Result<String> {
    let wire = WireRequest {
        code: request.code().to_string(),
        input: request.input().to_string(),
        restricted: request.restricted(),
    };
    let json = serde_json::to_vec(&wire).map_err(|e| protocol_error("cannot encode request", e))?;
    Ok(encode_segment(&json))
}

pub fn decode_request(line: &str, mode: ExecutionMode) -> Result<ExecutionRequest> {
    let json = decode_segment(line.trim())?;
    let wire: WireRequest =
        serde_json::from_slice(&json).map_err(|e| protocol_error("malformed request", e))?;
    Ok(ExecutionRequest::new(wire.code, mode)
        .with_input(wire.input)
        .with_restricted(wire.restricted))
}

/// Output segment, then the exception segment when there is one. Always
/// newline-terminated.
pub fn encode_response(result: &ExecutionResult) -> String {
    let mut framed = encode_segment(result.output.as_bytes());
    framed.push('\n');
    if !result.exception.is_empty() {
        framed.push_str(&encode_segment(result.exception.as_bytes()));
        framed.push('\n');
    }
    framed
}

/// Blank lines are ignored; a response with no segments at all is an error,
/// not an empty output.
pub fn decode_response(text: &str) -> Result<ExecutionResult> {
    let mut segments = text.lines().filter(|line| !line.trim().is_empty());
    let output = match segments.next() {
        Some(line) => decode_text(line)?,
        None => return Err(SandboxError::Protocol("worker produced no response".to_string())),
    };
    let exceptions = segments.map(decode_text).collect::<Result<Vec<_>>>()?;
    let exit_code = exceptions.iter().find_map(|e| exit_code_of(e)).unwrap_or(0);
    Ok(ExecutionResult {
        output,
        exception: exceptions.join("\n"),
        exit_code,
    })
}

/// Status carried by a `SystemExit: N` segment.
pub fn exit_code_of(segment: &str) -> Option<i32> {
    segment
        .strip_prefix(EXIT_SENTINEL)?
        .strip_prefix(": ")?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_has_no_newline() {
        let request = ExecutionRequest::new("print('a')\nprint('b')", ExecutionMode::StatementBlock)
            .with_input("x\ny\n");
        let line = encode_request(&request).unwrap();
        assert!(!line.contains('\n'));

        let decoded = decode_request(&format!("{}\n", line), ExecutionMode::StatementBlock).unwrap();
        assert_eq!(decoded.code(), request.code());
        assert_eq!(decoded.input(), "x\ny\n");
        assert!(decoded.restricted());
    }

    #[test]
    fn test_missing_fields_default() {
        let line = encode_segment(br#"{"code":"1"}"#);
        let decoded = decode_request(&line, ExecutionMode::SingleExpression).unwrap();
        assert_eq!(decoded.input(), "");
        assert!(decoded.restricted());
        assert_eq!(decoded.mode(), ExecutionMode::SingleExpression);
    }

    #[test]
    fn test_malformed_request_is_protocol_error() {
        assert!(matches!(
            decode_request("not base64!", ExecutionMode::StatementBlock),
            Err(SandboxError::Protocol(_))
        ));
        let not_json = encode_segment(b"code=1");
        assert!(matches!(
            decode_request(&not_json, ExecutionMode::StatementBlock),
            Err(SandboxError::Protocol(_))
        ));
    }

    #[test]
    fn test_response_segments() {
        let result = ExecutionResult::failure("partial\n", "ValueError: bad");
        let framed = encode_response(&result);
        assert_eq!(framed.lines().count(), 2);
        assert_eq!(decode_response(&framed).unwrap(), result);

        let clean = ExecutionResult::success("");
        assert_eq!(encode_response(&clean).lines().count(), 1);
        assert_eq!(decode_response(&encode_response(&clean)).unwrap(), clean);
    }

    #[test]
    fn test_several_exception_segments_are_joined() {
        let framed = format!(
            "{}\n{}\n{}\n",
            encode_segment(b"out"),
            encode_segment(b"first"),
            encode_segment(b"second")
        );
        let result = decode_response(&framed).unwrap();
        assert_eq!(result.output, "out");
        assert_eq!(result.exception, "first\nsecond");
    }

    #[test]
    fn test_exit_sentinel_recovers_code() {
        let framed = format!("{}\n{}\n", encode_segment(b""), encode_segment(b"SystemExit: 3"));
        let result = decode_response(&framed).unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(exit_code_of("SystemExit: -1"), Some(-1));
        assert_eq!(exit_code_of("SystemExitx: 1"), None);
        assert_eq!(exit_code_of("ValueError: 2"), None);
    }

    #[test]
    fn test_empty_response_is_an_error() {
        assert!(matches!(decode_response(""), Err(SandboxError::Protocol(_))));
        assert!(matches!(decode_response("\n\n"), Err(SandboxError::Protocol(_))));
    }

    #[test]
    fn test_arbitrary_bytes_survive_framing() {
        let bytes: Vec<u8> = (0u8..=255).chain(b"\n\r\n\0".iter().copied()).collect();
        let line = encode_segment(&bytes);
        assert!(!line.contains('\n'));
        assert_eq!(decode_segment(&line).unwrap(), bytes);
    }
}
