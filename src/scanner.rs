//! Static scan of guest source.
//!
//! Collects the facts that can be decided before anything runs: which root
//! modules are imported and which reserved (`__name__`-style) attributes are
//! referenced anywhere in the tree.

use crate::config::policy::{Capability, PolicyConfig};
use crate::config::types::{CapabilityDenied, ExecutionMode, ParseError};
use crate::lang::ast::{Expr, ExprKind, Program, Stmt, StmtKind};
use crate::lang::{is_reserved_name, parse_expression, parse_program};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// Root module names (`a` for `import a.b.c`)
    pub imported_modules: BTreeSet<String>,
    /// Bare reserved attribute names (`__dict__` for `x.__dict__`)
    pub reserved_attributes: BTreeSet<String>,
}

/// Parse and scan a statement block.
pub fn scan(code: &str) -> Result<ScanResult, ParseError> {
    Ok(ScanResult::from_program(&parse_program(code)?))
}

/// Parse and scan according to the execution mode.
pub fn scan_mode(code: &str, mode: ExecutionMode) -> Result<ScanResult, ParseError> {
    match mode {
        ExecutionMode::StatementBlock => scan(code),
        ExecutionMode::SingleExpression => Ok(ScanResult::from_expression(&parse_expression(code)?)),
    }
}

impl ScanResult {
    pub fn from_program(program: &Program) -> Self {
        let mut result = ScanResult::default();
        result.walk_block(&program.body);
        result
    }

    pub fn from_expression(expr: &Expr) -> Self {
        let mut result = ScanResult::default();
        result.walk_expr(expr);
        result
    }

    /// Reserved attributes the policy does not enable, sorted.
    pub fn denied_reserved(&self, policy: &PolicyConfig) -> Vec<String> {
        self.reserved_attributes
            .iter()
            .filter(|name| !policy.permits(&Capability::SpecialAttribute(name)))
            .cloned()
            .collect()
    }

    /// Imported root modules the policy does not enable, sorted.
    pub fn denied_modules(&self, policy: &PolicyConfig) -> Vec<String> {
        self.imported_modules
            .iter()
            .filter(|name| !policy.permits(&Capability::Module(name)))
            .cloned()
            .collect()
    }

    /// First denial, reserved attributes before imports.
    pub fn check(&self, policy: &PolicyConfig) -> Result<(), CapabilityDenied> {
        let reserved = self.denied_reserved(policy);
        if !reserved.is_empty() {
            return Err(CapabilityDenied::reserved(&reserved));
        }
        match self.denied_modules(policy).first() {
            Some(module) => Err(CapabilityDenied::module(module)),
            None => Ok(()),
        }
    }

    fn record_import(&mut self, dotted: &str) {
        let root = dotted.split('.').next().unwrap_or(dotted);
        self.imported_modules.insert(root.to_string());
    }

    fn record_attribute(&mut self, name: &str) {
        if is_reserved_name(name) {
            self.reserved_attributes.insert(name.to_string());
        }
    }

    fn walk_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) | StmtKind::Raise(Some(e)) => {
                self.walk_expr(e)
            }
            StmtKind::Assign { targets, value } => {
                targets.iter().for_each(|t| self.walk_expr(t));
                self.walk_expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.walk_expr(target);
                self.walk_expr(value);
            }
            StmtKind::If { test, body, orelse } => {
                self.walk_expr(test);
                self.walk_block(body);
                self.walk_block(orelse);
            }
            StmtKind::While { test, body } => {
                self.walk_expr(test);
                self.walk_block(body);
            }
            StmtKind::For { target, iter, body } => {
                self.walk_expr(target);
                self.walk_expr(iter);
                self.walk_block(body);
            }
            StmtKind::FunctionDef(def) => {
                for param in &def.params {
                    if let Some(default) = &param.default {
                        self.walk_expr(default);
                    }
                }
                self.walk_block(&def.body);
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.record_import(&alias.name);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                self.record_import(module);
                for alias in names {
                    self.record_attribute(&alias.name);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                finalbody,
            } => {
                self.walk_block(body);
                for handler in handlers {
                    self.walk_block(&handler.body);
                }
                self.walk_block(finalbody);
            }
            StmtKind::Del(targets) => targets.iter().for_each(|t| self.walk_expr(t)),
            StmtKind::Assert { test, msg } => {
                self.walk_expr(test);
                if let Some(msg) = msg {
                    self.walk_expr(msg);
                }
            }
            StmtKind::Return(None)
            | StmtKind::Raise(None)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass
            | StmtKind::Global(_) => {}
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Attribute { value, attr } => {
                self.record_attribute(attr);
                self.walk_expr(value);
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                items.iter().for_each(|e| self.walk_expr(e))
            }
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    self.walk_expr(k);
                    self.walk_expr(v);
                }
            }
            ExprKind::Subscript { value, index } => {
                self.walk_expr(value);
                self.walk_expr(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.walk_expr(part);
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.walk_expr(func);
                args.iter().for_each(|e| self.walk_expr(e));
                keywords.iter().for_each(|(_, e)| self.walk_expr(e));
            }
            ExprKind::BinOp { left, right, .. }
            | ExprKind::And(left, right)
            | ExprKind::Or(left, right) => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            ExprKind::UnaryOp { operand, .. } => self.walk_expr(operand),
            ExprKind::Compare { left, ops } => {
                self.walk_expr(left);
                ops.iter().for_each(|(_, e)| self.walk_expr(e));
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.walk_expr(test);
                self.walk_expr(body);
                self.walk_expr(orelse);
            }
            ExprKind::Lambda(def) => {
                for param in &def.params {
                    if let Some(default) = &param.default {
                        self.walk_expr(default);
                    }
                }
                self.walk_block(&def.body);
            }
            ExprKind::Constant(_) | ExprKind::Name(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_records_root_module_of_dotted_imports() {
        let result = scan("import os.path\nfrom json import dumps\nimport math as m\n").unwrap();
        assert_eq!(result.imported_modules, set(&["json", "math", "os"]));
        assert!(result.reserved_attributes.is_empty());
    }

    #[test]
    fn test_walks_nested_scopes() {
        let source = concat!(
            "def outer():\n",
            "    def inner():\n",
            "        import random\n",
            "        return (lambda: x.__class__)()\n",
            "    try:\n",
            "        pass\n",
            "    except Exception:\n",
            "        y = {'k': a.__dict__}\n",
        );
        let result = scan(source).unwrap();
        assert_eq!(result.imported_modules, set(&["random"]));
        assert_eq!(result.reserved_attributes, set(&["__class__", "__dict__"]));
    }

    #[test]
    fn test_plain_dunder_names_are_not_attributes() {
        let result = scan("x = __name__\nobj._private\nobj.__\n").unwrap();
        assert!(result.reserved_attributes.is_empty());
    }

    #[test]
    fn test_from_import_of_reserved_name_is_recorded() {
        let result = scan("from os import __dict__\n").unwrap();
        assert_eq!(result.reserved_attributes, set(&["__dict__"]));
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = scan("x = = 1\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_expression_mode() {
        let result = scan_mode("math.__doc__", ExecutionMode::SingleExpression).unwrap();
        assert_eq!(result.reserved_attributes, set(&["__doc__"]));
        assert!(result.imported_modules.is_empty());
    }
}
