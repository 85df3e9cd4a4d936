//! One guest run, start to finish, inside the worker.
//!
//! Each step is a hard stop: parse, static policy check, best-effort module
//! preload, compile, then execution with the capability proxies installed and
//! the resource limits armed. Every guest-side failure becomes
//! `ExecutionResult.exception` text; only host failures escape as `Err`.

use crate::capability::{BuiltinsProxy, GuestIo, ModuleRegistry};
use crate::config::policy::PolicyConfig;
use crate::config::types::{
    ExecutionMode, ExecutionRequest, ExecutionResult, Fault, ParseError, ResourceBudget, Result,
};
use crate::kernel::{Enforcement, ResourceLimiter};
use crate::lang::ast::{Expr, Program};
use crate::lang::{
    compile, compile_expression, parse_expression, parse_program, EvalResult, Interpreter, Unwind,
    Value,
};
use crate::observability::audit::{events, CorrelationIds};
use crate::scanner::ScanResult;
use crate::utils::output::OutputIntegrity;
use log::debug;
use std::rc::Rc;
use std::sync::Arc;

/// Stack of the thread that runs the guest. Parsing and evaluation are
/// recursive; their depth limits are sized against this.
const GUEST_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Parsed guest source.
enum Unit {
    Block(Program),
    Expression(Expr),
}

impl Unit {
    fn parse(request: &ExecutionRequest) -> std::result::Result<Self, ParseError> {
        match request.mode() {
            ExecutionMode::StatementBlock => parse_program(request.code()).map(Unit::Block),
            ExecutionMode::SingleExpression => {
                parse_expression(request.code()).map(Unit::Expression)
            }
        }
    }

    fn scan(&self) -> ScanResult {
        match self {
            Unit::Block(program) => ScanResult::from_program(program),
            Unit::Expression(expr) => ScanResult::from_expression(expr),
        }
    }

    fn compile(&self) -> std::result::Result<(), ParseError> {
        match self {
            Unit::Block(program) => compile(program),
            Unit::Expression(expr) => compile_expression(expr),
        }
    }

    /// The text an expression unit shows for its value, rendered while the
    /// limits are still armed; `None` for statement blocks and `None` values.
    fn execute(&self, interp: &mut Interpreter) -> EvalResult<Option<String>> {
        match self {
            Unit::Block(program) => interp.run_program(program).map(|_| None),
            Unit::Expression(expr) => match interp.eval_expression(expr)? {
                Value::None => Ok(None),
                value => interp.repr(&value).map(Some),
            },
        }
    }
}

fn fault(unwind: Unwind) -> Fault {
    match unwind {
        Unwind::Raise(exc) => Fault::Guest(exc),
        Unwind::Exit(code) => Fault::Exit(code),
        Unwind::Denied(denied) => Fault::Denied(denied),
        Unwind::Exceeded(violation) => Fault::Exceeded(violation),
    }
}

pub struct Executor {
    policy: Arc<PolicyConfig>,
    budget: ResourceBudget,
    enforcement: Enforcement,
}

impl Executor {
    pub fn new(policy: Arc<PolicyConfig>, budget: ResourceBudget, enforcement: Enforcement) -> Self {
        Self {
            policy,
            budget,
            enforcement,
        }
    }

    pub fn policy(&self) -> &Arc<PolicyConfig> {
        &self.policy
    }

    pub fn budget(&self) -> &ResourceBudget {
        &self.budget
    }

    /// Run one request on a dedicated large-stack thread.
    ///
    /// A panic on that thread is an executor defect and is re-raised here.
    pub fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let ids = CorrelationIds::new(request.code());
        events::execution_start(&ids, request.mode(), request.restricted());

        let result = std::thread::scope(|scope| -> Result<ExecutionResult> {
            let handle = std::thread::Builder::new()
                .name("guest".to_string())
                .stack_size(GUEST_STACK_BYTES)
                .spawn_scoped(scope, || self.run_here(request, &ids))?;
            match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })?;

        events::execution_end(&ids, &result);
        Ok(result)
    }

    fn run_here(&self, request: &ExecutionRequest, ids: &CorrelationIds) -> Result<ExecutionResult> {
        let limit = self.budget.max_output_bytes;
        let io = GuestIo::new(request.input(), limit);
        let outcome = self.execute(request, &io)?;

        if io.integrity() == OutputIntegrity::Truncated {
            events::output_truncated(ids, limit);
        }
        let output = io.take_output(limit);

        let fault = match outcome {
            Ok(()) => return Ok(ExecutionResult::success(output)),
            Err(fault) => fault,
        };
        match &fault {
            Fault::Denied(denied) => events::capability_denied(ids, &denied.to_string()),
            Fault::Exceeded(violation) => events::limit_violation(ids, violation),
            Fault::Parse(err) => debug!("guest source rejected: {}", err),
            Fault::Guest(exc) => debug!("guest raised {}", exc.kind),
            Fault::Exit(code) => debug!("guest exited with status {}", code),
        }
        Ok(ExecutionResult {
            output,
            exception: fault.render().unwrap_or_default(),
            exit_code: match fault {
                Fault::Exit(code) => code,
                _ => 0,
            },
        })
    }

    /// Outer `Err` is a host failure; inner `Err` is the guest's.
    fn execute(
        &self,
        request: &ExecutionRequest,
        io: &Rc<GuestIo>,
    ) -> Result<std::result::Result<(), Fault>> {
        let unit = match Unit::parse(request) {
            Ok(unit) => unit,
            Err(err) => return Ok(Err(Fault::Parse(err))),
        };

        let scan = unit.scan();
        if request.restricted() {
            if let Err(denied) = scan.check(&self.policy) {
                return Ok(Err(Fault::Denied(denied)));
            }
        }

        let registry = ModuleRegistry::new(request.restricted());
        let preloaded = registry.preload(scan.imported_modules.iter().map(String::as_str));
        debug!(
            "preloaded {}/{} imported modules",
            preloaded,
            scan.imported_modules.len()
        );

        if let Err(err) = unit.compile() {
            return Ok(Err(Fault::Parse(err)));
        }

        let builtins = if request.restricted() {
            BuiltinsProxy::restricted(self.policy.clone(), registry, io.clone())
        } else {
            BuiltinsProxy::unrestricted(registry, io.clone())
        }
        .build();

        let limits = ResourceLimiter::arm(&self.budget, self.enforcement)?;
        let mut interp = Interpreter::new(builtins, Box::new(limits.watchdog()));
        let outcome = unit.execute(&mut interp);
        // values reachable from the interpreter are released under the limits
        drop(interp);
        debug!("guest finished after {:?}", limits.elapsed());
        drop(limits);

        Ok(match outcome {
            Ok(Some(text)) => {
                io.write(&text);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(unwind) => Err(fault(unwind)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> Executor {
        let budget = ResourceBudget {
            max_wall_seconds: 2.0,
            max_cpu_seconds: 2.0,
            ..ResourceBudget::default()
        };
        Executor::new(
            Arc::new(PolicyConfig::embedded().unwrap()),
            budget,
            Enforcement::InProcess,
        )
    }

    fn eval(code: &str) -> ExecutionResult {
        executor()
            .run(&ExecutionRequest::new(code, ExecutionMode::SingleExpression))
            .unwrap()
    }

    fn exec(code: &str) -> ExecutionResult {
        executor()
            .run(&ExecutionRequest::new(code, ExecutionMode::StatementBlock))
            .unwrap()
    }

    #[test]
    fn test_expression_value_is_the_output() {
        let result = eval("1 + 1");
        assert_eq!(result.output, "2");
        assert_eq!(result.exception, "");
        assert_eq!(eval("None").output, "");
    }

    #[test]
    fn test_parse_error_produces_no_output() {
        let result = exec("print('a')\nif True print('b')");
        assert_eq!(result.output, "");
        assert!(result.exception.starts_with("SyntaxError:"), "{}", result.exception);
    }

    #[test]
    fn test_compile_errors_stop_before_running() {
        let result = exec("print('ran')\nbreak");
        assert_eq!(result.output, "");
        assert!(result.exception.contains("'break' outside loop"));
    }

    #[test]
    fn test_reserved_attribute_blocks_execution() {
        let result = exec("print('started')\nx = len.__class__");
        assert_eq!(result.output, "");
        assert!(result.exception.contains("__class__"));
    }

    #[test]
    fn test_guest_exception_is_short() {
        let result = exec("print('before')\nraise ValueError('bad')");
        assert_eq!(result.output, "before\n");
        assert!(result.exception.ends_with("ValueError: bad"));
        assert!(!result.exception.contains(".rs"));
    }

    #[test]
    fn test_expression_value_is_rendered_under_the_memory_budget() {
        let budget = ResourceBudget {
            max_memory_bytes: 32 * 1024 * 1024,
            max_wall_seconds: 10.0,
            max_cpu_seconds: 10.0,
            ..ResourceBudget::default()
        };
        let executor = Executor::new(
            Arc::new(PolicyConfig::embedded().unwrap()),
            budget,
            Enforcement::InProcess,
        );
        let request = ExecutionRequest::new("[[[0] * 1000] * 1000] * 1000", ExecutionMode::SingleExpression);
        let result = executor.run(&request).unwrap();
        assert_eq!(result.output, "");
        assert!(result.exception.starts_with("MemoryError:"), "{}", result.exception);
    }

    #[test]
    fn test_unrestricted_requests_skip_policy() {
        let request = ExecutionRequest::new("import os\nprint(os.sep)", ExecutionMode::StatementBlock)
            .with_restricted(false);
        let result = executor().run(&request).unwrap();
        assert_eq!(result.output, "/\n");
        assert!(result.is_success());
    }
}
