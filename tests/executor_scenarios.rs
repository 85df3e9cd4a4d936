//! End-to-end executor behaviour, in process.
//!
//! These run with watchdog-only enforcement so the test harness's own
//! rlimits and signal handlers are never touched.

use scriptbox::config::policy::PolicyConfig;
use scriptbox::{Enforcement, ExecutionMode, ExecutionRequest, ExecutionResult, Executor, ResourceBudget};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn executor_with(budget: ResourceBudget) -> Executor {
    let policy = PolicyConfig::embedded().expect("embedded policy parses");
    Executor::new(Arc::new(policy), budget, Enforcement::InProcess)
}

fn run(code: &str, mode: ExecutionMode) -> ExecutionResult {
    executor_with(ResourceBudget::default())
        .run(&ExecutionRequest::new(code, mode))
        .expect("executor never fails on guest errors")
}

#[test]
fn test_plain_print() {
    let result = run("print('hi')", ExecutionMode::StatementBlock);
    assert_eq!(result.output, "hi\n");
    assert_eq!(result.exception, "");
    assert_eq!(result.exit_code, 0);
}

#[test]
fn test_denied_import_never_runs() {
    let result = run("print('before')\nimport os\nos.system('true')", ExecutionMode::StatementBlock);
    assert_eq!(result.output, "");
    assert!(result.exception.starts_with("CapabilityDenied:"), "{}", result.exception);
    assert!(result.exception.contains("os"));
}

#[test]
fn test_memory_budget_is_reported() {
    let budget = ResourceBudget {
        max_memory_bytes: 32 * 1024 * 1024,
        ..ResourceBudget::default()
    };
    let result = executor_with(budget)
        .run(&ExecutionRequest::new(
            "print('start')\nx = [0] * 100000000",
            ExecutionMode::StatementBlock,
        ))
        .unwrap();
    assert_eq!(result.output, "start\n");
    assert!(result.exception.starts_with("MemoryError:"), "{}", result.exception);
}

#[test]
fn test_expression_mode_prints_repr() {
    let result = run("2 ** 10", ExecutionMode::SingleExpression);
    assert_eq!(result.output, "1024");
    assert!(result.is_success());
}

#[test]
fn test_infinite_loop_hits_wall_clock() {
    let budget = ResourceBudget {
        max_wall_seconds: 0.5,
        max_cpu_seconds: 10.0,
        ..ResourceBudget::default()
    };
    let started = Instant::now();
    let result = executor_with(budget)
        .run(&ExecutionRequest::new("while True:\n    pass", ExecutionMode::StatementBlock))
        .unwrap();
    assert!(result.exception.starts_with("TimeoutError:"), "{}", result.exception);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_sleep_past_deadline_is_interrupted() {
    let budget = ResourceBudget {
        max_wall_seconds: 0.3,
        ..ResourceBudget::default()
    };
    let started = Instant::now();
    let result = executor_with(budget)
        .run(&ExecutionRequest::new(
            "import time\ntime.sleep(30)",
            ExecutionMode::StatementBlock,
        ))
        .unwrap();
    assert!(result.exception.starts_with("TimeoutError:"), "{}", result.exception);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_partial_output_survives_a_guest_exception() {
    let result = run(
        "for i in range(3):\n    print(i)\nprint(1 / 0)",
        ExecutionMode::StatementBlock,
    );
    assert_eq!(result.output, "0\n1\n2\n");
    assert!(result.exception.contains("ZeroDivisionError"));
}

#[test]
fn test_reserved_attributes_are_all_listed() {
    let result = run("a = len.__class__\nb = print.__dict__", ExecutionMode::StatementBlock);
    assert!(result.exception.contains("__class__"));
    assert!(result.exception.contains("__dict__"));
}

#[test]
fn test_module_attribute_allow_list() {
    let result = run("import math\nprint(math.floor(2.5))", ExecutionMode::StatementBlock);
    assert_eq!(result.output, "2\n");
    assert!(result.is_success());
}

#[test]
fn test_recursion_is_bounded() {
    let result = run(
        "def f(n):\n    return f(n + 1)\nf(0)",
        ExecutionMode::StatementBlock,
    );
    assert!(result.exception.contains("RecursionError"), "{}", result.exception);
}

#[test]
fn test_output_is_truncated_not_unbounded() {
    let budget = ResourceBudget {
        max_output_bytes: 64,
        ..ResourceBudget::default()
    };
    let result = executor_with(budget)
        .run(&ExecutionRequest::new(
            "for i in range(1000):\n    print('line', i)",
            ExecutionMode::StatementBlock,
        ))
        .unwrap();
    assert!(result.output.len() <= 64 + "\n[output truncated]".len());
    assert!(result.output.ends_with("[output truncated]"));
}

#[test]
fn test_guest_exit_code_is_data() {
    let result = run("print('bye')\nexit(7)", ExecutionMode::StatementBlock);
    assert_eq!(result.output, "bye\n");
    assert_eq!(result.exit_code, 7);
    assert_eq!(result.exception, "SystemExit: 7");

    let clean = run("exit()", ExecutionMode::StatementBlock);
    assert_eq!(clean.exit_code, 0);
    assert_eq!(clean.exception, "");
}

#[test]
fn test_restricted_pickle_hands_out_tokens() {
    let result = run(
        "import pickle\nt = pickle.dumps([1, 2])\nprint(pickle.loads(t))",
        ExecutionMode::StatementBlock,
    );
    assert_eq!(result.output, "[1, 2]\n");
}

/// Builds `x` (and `y`, independently) by doubling: 2**40 leaves on 41 lists.
const DOUBLED: &str = "x = [0]\ny = [0]\nfor i in range(40):\n    x = [x, x]\n    y = [y, y]\n";

#[test]
fn test_rendering_shared_structure_is_a_memory_error() {
    let budget = ResourceBudget {
        max_memory_bytes: 32 * 1024 * 1024,
        max_wall_seconds: 10.0,
        max_cpu_seconds: 10.0,
        ..ResourceBudget::default()
    };
    let code = format!("{}print('built')\ns = str(x)\nprint('rendered')", DOUBLED);
    let result = executor_with(budget)
        .run(&ExecutionRequest::new(code, ExecutionMode::StatementBlock))
        .unwrap();
    assert_eq!(result.output, "built\n");
    assert!(result.exception.starts_with("MemoryError:"), "{}", result.exception);
}

#[test]
fn test_cyclic_list_prints_placeholders() {
    let result = run(
        "a = []\na.append(a)\na.append(a)\nprint(a)\nprint(repr(a) == str(a))",
        ExecutionMode::StatementBlock,
    );
    assert_eq!(result.output, "[[...], [...]]\nTrue\n");
    assert!(result.is_success(), "{}", result.exception);
}

#[test]
fn test_comparing_shared_structures_finishes() {
    let budget = ResourceBudget {
        max_wall_seconds: 1.0,
        max_cpu_seconds: 1.0,
        ..ResourceBudget::default()
    };
    let code = format!(
        "{}print(x == y)\nprint(y in [1, 'a', x])\nprint(len(sorted([x, y, x])))\nprint(max([x, y]) == x)",
        DOUBLED
    );
    let started = Instant::now();
    let result = executor_with(budget)
        .run(&ExecutionRequest::new(code, ExecutionMode::StatementBlock))
        .unwrap();
    assert_eq!(result.output, "True\nTrue\n3\nTrue\n");
    assert!(result.is_success(), "{}", result.exception);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_cyclic_lists_compare_equal() {
    let result = run(
        "a = []\na.append(a)\nb = []\nb.append(b)\nprint(a == b, a in [b], a != [])",
        ExecutionMode::StatementBlock,
    );
    assert_eq!(result.output, "True True True\n");
}

#[test]
fn test_deeply_nested_comparison_is_a_recursion_error() {
    let result = run(
        "x = 0\ny = 0\nfor i in range(500):\n    x = [x]\n    y = [y]\nprint(x == y)",
        ExecutionMode::StatementBlock,
    );
    assert_eq!(result.output, "");
    assert!(result.exception.contains("RecursionError"), "{}", result.exception);
}

