//! Wire framing between controller and worker.

use scriptbox::core::protocol::{
    decode_request, decode_response, decode_segment, encode_request, encode_response,
    encode_segment,
};
use scriptbox::{ExecutionMode, ExecutionRequest, ExecutionResult};

#[test]
fn test_control_bytes_and_newlines_round_trip() {
    let samples: &[&[u8]] = &[b"", b"\n", b"a\nb\r\nc", b"\0\x01\x7f\xff", "h\u{e9}llo \u{1f600}".as_bytes()];
    for sample in samples {
        let line = encode_segment(sample);
        assert!(!line.contains('\n'));
        assert_eq!(&decode_segment(&line).unwrap()[..], *sample);
    }
}

#[test]
fn test_request_preserves_everything_but_mode() {
    let request = ExecutionRequest::new("x = 1\nprint(x)\n", ExecutionMode::StatementBlock)
        .with_input("line one\nline two")
        .with_restricted(false);
    let line = encode_request(&request).unwrap();
    let decoded = decode_request(&line, ExecutionMode::StatementBlock).unwrap();
    assert_eq!(decoded, request);
}

#[test]
fn test_multiline_output_stays_in_segment_zero() {
    let result = ExecutionResult::failure(
        "one\ntwo\n\nfour\n",
        "Traceback (most recent call last):\n  File \"<guest>\", line 4\nKeyError: 'k'",
    );
    let framed = encode_response(&result);
    assert_eq!(framed.lines().count(), 2);
    assert_eq!(decode_response(&framed).unwrap(), result);
}

#[test]
fn test_exit_status_travels_as_sentinel() {
    let result = ExecutionResult {
        output: "partial".to_string(),
        exception: "SystemExit: 9".to_string(),
        exit_code: 9,
    };
    assert_eq!(decode_response(&encode_response(&result)).unwrap(), result);
}
