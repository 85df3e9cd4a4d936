//! Controller and worker talking through the built binary.

use scriptbox::{
    ExecutionMode, ExecutionRequest, IsolationChannel, ResourceBudget, SandboxConfig, SandboxError,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn channel(budget: ResourceBudget) -> IsolationChannel {
    let config = SandboxConfig {
        worker_path: Some(PathBuf::from(env!("CARGO_BIN_EXE_scriptbox"))),
        budget,
        kill_grace_seconds: 2.0,
        ..SandboxConfig::default()
    };
    IsolationChannel::new(config).unwrap()
}

#[tokio::test]
async fn test_statement_block_round_trip() {
    let request = ExecutionRequest::new(
        "name = input()\nprint('hello', name)",
        ExecutionMode::StatementBlock,
    )
    .with_input("guest\n");
    let result = channel(ResourceBudget::default()).submit(&request).await.unwrap();
    assert_eq!(result.output, "hello guest\n");
    assert!(result.is_success(), "{:?}", result);
}

#[tokio::test]
async fn test_expression_round_trip() {
    let request = ExecutionRequest::new("'ab' * 3", ExecutionMode::SingleExpression);
    let result = channel(ResourceBudget::default()).submit(&request).await.unwrap();
    assert_eq!(result.output, "'ababab'");
}

#[tokio::test]
async fn test_denied_import_reported_as_data() {
    let request = ExecutionRequest::new("import os", ExecutionMode::StatementBlock);
    let result = channel(ResourceBudget::default()).submit(&request).await.unwrap();
    assert_eq!(result.output, "");
    assert!(result.exception.starts_with("CapabilityDenied:"), "{}", result.exception);
}

#[tokio::test]
async fn test_runaway_worker_returns_within_grace() {
    let budget = ResourceBudget {
        max_wall_seconds: 1.0,
        max_cpu_seconds: 1.0,
        ..ResourceBudget::default()
    };
    let request = ExecutionRequest::new("while True:\n    pass", ExecutionMode::StatementBlock);
    let started = Instant::now();
    let result = channel(budget).submit(&request).await.unwrap();
    assert!(result.exception.starts_with("TimeoutError:"), "{}", result.exception);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_memory_hog_exits_cleanly() {
    let budget = ResourceBudget {
        max_memory_bytes: 64 * 1024 * 1024,
        ..ResourceBudget::default()
    };
    let request = ExecutionRequest::new(
        "chunks = []\nwhile True:\n    chunks.append('x' * 1000000)",
        ExecutionMode::StatementBlock,
    );
    let result = channel(budget).submit(&request).await.unwrap();
    assert!(result.exception.starts_with("MemoryError:"), "{}", result.exception);
}

#[tokio::test]
async fn test_guest_exit_code_crosses_the_channel() {
    let request = ExecutionRequest::new("exit(5)", ExecutionMode::StatementBlock);
    let result = channel(ResourceBudget::default()).submit(&request).await.unwrap();
    assert_eq!(result.exit_code, 5);
}

#[tokio::test]
async fn test_bad_policy_dir_is_process_failure() {
    let config = SandboxConfig {
        worker_path: Some(PathBuf::from(env!("CARGO_BIN_EXE_scriptbox"))),
        policy_dir: Some(PathBuf::from("/nonexistent/policy")),
        ..SandboxConfig::default()
    };
    let channel = IsolationChannel::new(config).unwrap();
    let request = ExecutionRequest::new("1", ExecutionMode::SingleExpression);
    let err = channel.submit(&request).await.unwrap_err();
    assert!(matches!(err, SandboxError::ProcessFailure(_)));
}

/// Builds `x` (and `y`, independently) by doubling: 2**40 leaves on 41 lists.
const DOUBLED: &str = "x = [0]\ny = [0]\nfor i in range(40):\n    x = [x, x]\n    y = [y, y]\n";

#[tokio::test]
async fn test_rendering_shared_structure_exits_cleanly() {
    let budget = ResourceBudget {
        max_memory_bytes: 64 * 1024 * 1024,
        max_wall_seconds: 10.0,
        max_cpu_seconds: 10.0,
        ..ResourceBudget::default()
    };
    let code = format!("{}s = str(x)", DOUBLED);
    let request = ExecutionRequest::new(code, ExecutionMode::StatementBlock);
    let result = channel(budget).submit(&request).await.unwrap();
    assert!(result.exception.starts_with("MemoryError:"), "{}", result.exception);
}

#[tokio::test]
async fn test_cyclic_print_crosses_the_channel() {
    let request = ExecutionRequest::new(
        "a = []\na.append(a)\na.append(a)\nprint(a)",
        ExecutionMode::StatementBlock,
    );
    let result = channel(ResourceBudget::default()).submit(&request).await.unwrap();
    assert_eq!(result.output, "[[...], [...]]\n");
    assert!(result.is_success(), "{:?}", result);
}

#[tokio::test]
async fn test_comparing_shared_structures_is_not_killed() {
    let budget = ResourceBudget {
        max_wall_seconds: 1.0,
        max_cpu_seconds: 1.0,
        ..ResourceBudget::default()
    };
    let code = format!("{}print(x == y)\nprint(sorted([y, x])[0] == x)", DOUBLED);
    let request = ExecutionRequest::new(code, ExecutionMode::StatementBlock);
    let started = Instant::now();
    let result = channel(budget).submit(&request).await.unwrap();
    assert_eq!(result.output, "True\nTrue\n");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_cpu_budget_below_wall_is_a_cpu_timeout() {
    let budget = ResourceBudget {
        max_wall_seconds: 10.0,
        max_cpu_seconds: 1.0,
        ..ResourceBudget::default()
    };
    let request = ExecutionRequest::new(
        "n = 0\nwhile True:\n    n = n + 1",
        ExecutionMode::StatementBlock,
    );
    let started = Instant::now();
    let result = channel(budget).submit(&request).await.unwrap();
    assert_eq!(
        result.exception, "TimeoutError: CPU time limit of 1s exceeded",
        "{:?}",
        result
    );
    assert!(started.elapsed() < Duration::from_secs(8));
}

