//! Compile step: structural checks the parser cannot make locally.
use super::ast::{Expr, ExprKind, Program, Stmt, StmtKind};
use crate::config::types::ParseError;

#[derive(Clone, Copy, Default)]
struct Context {
    in_loop: bool,
    in_function: bool,
}

/// Reject `break`/`continue` outside loops, `return` outside functions and
/// slices outside subscripts.
pub fn compile(program: &Program) -> Result<(), ParseError> {
    check_block(&program.body, Context::default())
}

/// Same checks for a lone expression (eval mode).
pub fn compile_expression(expr: &Expr) -> Result<(), ParseError> {
    check_expr(expr)
}

fn check_block(body: &[Stmt], ctx: Context) -> Result<(), ParseError> {
    body.iter().try_for_each(|stmt| check_stmt(stmt, ctx))
}

fn outside(stmt: &Stmt, what: &str, place: &str) -> ParseError {
    ParseError::new(stmt.line, 1, format!("'{}' outside {}", what, place))
}

fn check_stmt(stmt: &Stmt, ctx: Context) -> Result<(), ParseError> {
    match &stmt.kind {
        StmtKind::Break if !ctx.in_loop => Err(outside(stmt, "break", "loop")),
        StmtKind::Continue if !ctx.in_loop => Err(outside(stmt, "continue", "loop")),
        StmtKind::Return(_) if !ctx.in_function => Err(outside(stmt, "return", "function")),
        StmtKind::Return(Some(e)) | StmtKind::Expr(e) | StmtKind::Raise(Some(e)) => check_expr(e),
        StmtKind::Assign { targets, value } => {
            targets.iter().try_for_each(check_expr)?;
            check_expr(value)
        }
        StmtKind::AugAssign { target, value, .. } => {
            check_expr(target)?;
            check_expr(value)
        }
        StmtKind::If { test, body, orelse } => {
            check_expr(test)?;
            check_block(body, ctx)?;
            check_block(orelse, ctx)
        }
        StmtKind::While { test, body } => {
            check_expr(test)?;
            check_block(body, Context { in_loop: true, ..ctx })
        }
        StmtKind::For { target, iter, body } => {
            check_expr(target)?;
            check_expr(iter)?;
            check_block(body, Context { in_loop: true, ..ctx })
        }
        StmtKind::FunctionDef(def) => {
            for param in &def.params {
                if let Some(default) = &param.default {
                    check_expr(default)?;
                }
            }
            check_block(
                &def.body,
                Context {
                    in_loop: false,
                    in_function: true,
                },
            )
        }
        StmtKind::Try {
            body,
            handlers,
            finalbody,
        } => {
            check_block(body, ctx)?;
            for handler in handlers {
                check_block(&handler.body, ctx)?;
            }
            check_block(finalbody, ctx)
        }
        StmtKind::Del(targets) => targets.iter().try_for_each(check_expr),
        StmtKind::Assert { test, msg } => {
            check_expr(test)?;
            msg.as_ref().map_or(Ok(()), check_expr)
        }
        _ => Ok(()),
    }
}

fn check_expr(expr: &Expr) -> Result<(), ParseError> {
    match &expr.kind {
        ExprKind::Slice { .. } => Err(ParseError::new(
            expr.line,
            expr.col,
            "slice is only valid inside a subscript",
        )),
        ExprKind::Subscript { value, index } => {
            check_expr(value)?;
            match &index.kind {
                ExprKind::Slice { lower, upper, step } => {
                    for part in [lower, upper, step].into_iter().flatten() {
                        check_expr(part)?;
                    }
                    Ok(())
                }
                _ => check_expr(index),
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => items.iter().try_for_each(check_expr),
        ExprKind::Dict(pairs) => pairs.iter().try_for_each(|(k, v)| {
            check_expr(k)?;
            check_expr(v)
        }),
        ExprKind::Attribute { value, .. } => check_expr(value),
        ExprKind::Call {
            func,
            args,
            keywords,
        } => {
            check_expr(func)?;
            args.iter().try_for_each(check_expr)?;
            keywords.iter().try_for_each(|(_, v)| check_expr(v))
        }
        ExprKind::BinOp { left, right, .. }
        | ExprKind::And(left, right)
        | ExprKind::Or(left, right) => {
            check_expr(left)?;
            check_expr(right)
        }
        ExprKind::UnaryOp { operand, .. } => check_expr(operand),
        ExprKind::Compare { left, ops } => {
            check_expr(left)?;
            ops.iter().try_for_each(|(_, e)| check_expr(e))
        }
        ExprKind::IfExp { test, body, orelse } => {
            check_expr(test)?;
            check_expr(body)?;
            check_expr(orelse)
        }
        ExprKind::Lambda(def) => check_block(
            &def.body,
            Context {
                in_loop: false,
                in_function: true,
            },
        ),
        ExprKind::Constant(_) | ExprKind::Name(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse_program;

    #[test]
    fn test_break_outside_loop() {
        let program = parse_program("x = 1\nbreak\n").unwrap();
        let err = compile(&program).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("'break' outside loop"));
    }

    #[test]
    fn test_return_outside_function() {
        let program = parse_program("while True:\n    return 1\n").unwrap();
        assert!(compile(&program).is_err());
    }

    #[test]
    fn test_loop_inside_function_is_fine() {
        let program =
            parse_program("def f():\n    for i in range(3):\n        break\n    return 2\n")
                .unwrap();
        assert!(compile(&program).is_ok());
    }

    #[test]
    fn test_break_in_function_inside_loop_is_rejected() {
        let program = parse_program("for i in x:\n    def f():\n        break\n").unwrap();
        assert!(compile(&program).is_err());
    }
}
