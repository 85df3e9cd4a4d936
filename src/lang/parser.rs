//! Recursive-descent parser producing [`ast`](super::ast) trees.
use super::ast::*;
use super::lexer::{is_keyword, tokenize, Tok, Token};
use crate::config::types::ParseError;
use std::rc::Rc;

/// Parse a block of statements.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(tokenize(source)?);
    let mut body = Vec::new();
    parser.skip_newlines();
    while !parser.at(&Tok::Eof) {
        body.extend(parser.statement()?);
        parser.skip_newlines();
    }
    Ok(Program { body })
}

/// Parse a single expression (eval mode). Surrounding whitespace is ignored.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(tokenize(source.trim())?);
    parser.skip_newlines();
    if parser.at(&Tok::Eof) {
        return Err(parser.error("unexpected EOF while parsing"));
    }
    let expr = parser.testlist()?;
    parser.skip_newlines();
    if !parser.at(&Tok::Eof) {
        return Err(parser.error("invalid syntax"));
    }
    Ok(expr)
}

/// Deepest bracket/operator/block nesting accepted before giving up.
const MAX_NESTING: usize = 100;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
        }
    }

    fn current(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_tok(&self, offset: usize) -> &Tok {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        &self.current().tok == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(&self.current().tok, Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(&self.current().tok, Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ParseError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match &self.current().tok {
            Tok::Name(n) if !is_keyword(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let tok = self.current();
        let message = message.into();
        let message = match &tok.tok {
            Tok::Indent => "unexpected indent".to_string(),
            Tok::Eof if message == "invalid syntax" => "unexpected EOF while parsing".to_string(),
            _ => message,
        };
        ParseError::new(tok.line, tok.col, message)
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested expressions or blocks"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn skip_newlines(&mut self) {
        while self.at(&Tok::Newline) {
            self.advance();
        }
    }

    fn end_of_simple(&mut self) -> Result<(), ParseError> {
        if self.at(&Tok::Newline) {
            self.advance();
            Ok(())
        } else if self.at(&Tok::Eof) || self.at(&Tok::Dedent) {
            Ok(())
        } else {
            Err(self.error("invalid syntax"))
        }
    }

    // ---- statements -------------------------------------------------------

    fn statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let line = self.current().line;
        let compound = match &self.current().tok {
            Tok::Name(n) => match n.as_str() {
                "if" => Some(self.if_statement()?),
                "while" => Some(self.while_statement()?),
                "for" => Some(self.for_statement()?),
                "def" => Some(self.function_def()?),
                "try" => Some(self.try_statement()?),
                _ => None,
            },
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => None,
        };
        if let Some(kind) = compound {
            return Ok(vec![Stmt { line, kind }]);
        }

        let mut stmts = vec![self.simple_statement()?];
        while self.eat_op(";") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        self.end_of_simple()?;
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.current().line;
        let keyword = match &self.current().tok {
            Tok::Name(n) if is_keyword(n) => Some(n.clone()),
            _ => None,
        };

        let kind = match keyword.as_deref() {
            Some("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Some("break") => {
                self.advance();
                StmtKind::Break
            }
            Some("continue") => {
                self.advance();
                StmtKind::Continue
            }
            Some("return") => {
                self.advance();
                if self.at(&Tok::Newline) || self.at(&Tok::Eof) || self.at_op(";") {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist()?))
                }
            }
            Some("raise") => {
                self.advance();
                if self.at(&Tok::Newline) || self.at(&Tok::Eof) || self.at_op(";") {
                    StmtKind::Raise(None)
                } else {
                    StmtKind::Raise(Some(self.test()?))
                }
            }
            Some("global") => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            Some("del") => {
                self.advance();
                let mut targets = vec![self.primary()?];
                while self.eat_op(",") {
                    targets.push(self.primary()?);
                }
                for target in &targets {
                    self.check_target(target)?;
                }
                StmtKind::Del(targets)
            }
            Some("assert") => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Some("import") => {
                self.advance();
                let mut names = vec![self.import_alias(true)?];
                while self.eat_op(",") {
                    names.push(self.import_alias(true)?);
                }
                StmtKind::Import(names)
            }
            Some("from") => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_keyword("import")?;
                let parenthesized = self.eat_op("(");
                let mut names = vec![self.import_alias(false)?];
                while self.eat_op(",") {
                    if parenthesized && self.at_op(")") {
                        break;
                    }
                    names.push(self.import_alias(false)?);
                }
                if parenthesized {
                    self.expect_op(")")?;
                }
                StmtKind::ImportFrom { module, names }
            }
            Some("None") | Some("True") | Some("False") | Some("not") | Some("lambda") | None => {
                self.expression_statement()?
            }
            Some(_) => return Err(self.error("invalid syntax")),
        };
        Ok(Stmt { line, kind })
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_alias(&mut self, dotted: bool) -> Result<Alias, ParseError> {
        let name = if dotted {
            self.dotted_name()?
        } else {
            self.expect_name()?
        };
        let asname = if self.eat_keyword("as") {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(Alias { name, asname })
    }

    fn expression_statement(&mut self) -> Result<StmtKind, ParseError> {
        let first = self.testlist()?;

        let aug = [
            ("+=", BinOp::Add),
            ("-=", BinOp::Sub),
            ("*=", BinOp::Mul),
            ("/=", BinOp::Div),
            ("//=", BinOp::FloorDiv),
            ("%=", BinOp::Mod),
            ("**=", BinOp::Pow),
        ];
        for (symbol, op) in aug {
            if self.eat_op(symbol) {
                if !matches!(
                    first.kind,
                    ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
                ) {
                    return Err(ParseError::new(
                        first.line,
                        first.col,
                        "illegal expression for augmented assignment",
                    ));
                }
                let value = self.testlist()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                });
            }
        }

        if !self.at_op("=") {
            return Ok(StmtKind::Expr(first));
        }

        let mut targets = vec![first];
        let mut value = None;
        while self.eat_op("=") {
            let next = self.testlist()?;
            if self.at_op("=") {
                targets.push(next);
            } else {
                value = Some(next);
            }
        }
        let value = value.ok_or_else(|| self.error("invalid syntax"))?;
        for target in &targets {
            self.check_target(target)?;
        }
        Ok(StmtKind::Assign { targets, value })
    }

    fn check_target(&self, target: &Expr) -> Result<(), ParseError> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.check_target(item)?;
                }
                Ok(())
            }
            _ => Err(ParseError::new(
                target.line,
                target.col,
                "cannot assign to expression",
            )),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.enter()?;
        let body = self.suite();
        self.leave();
        body
    }

    fn suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_op(":")?;
        if !self.at(&Tok::Newline) {
            // single-line suite: `if x: y = 1`
            return self.statement();
        }
        self.skip_newlines();
        if !self.at(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&Tok::Dedent) {
                self.advance();
                break;
            }
            if self.at(&Tok::Eof) {
                break;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Result<StmtKind, ParseError> {
        self.advance(); // `if` or `elif`
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.at_keyword("elif") {
            let line = self.current().line;
            vec![Stmt {
                line,
                kind: self.if_statement()?,
            }]
        } else if self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn while_statement(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let test = self.test()?;
        let body = self.block()?;
        Ok(StmtKind::While { test, body })
    }

    fn for_statement(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let target = self.target_list()?;
        self.check_target(&target)?;
        self.expect_keyword("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        Ok(StmtKind::For { target, iter, body })
    }

    fn target_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.primary()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_keyword("in") {
                break;
            }
            items.push(self.primary()?);
        }
        Ok(Expr::new(line, col, ExprKind::Tuple(items)))
    }

    fn function_def(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.current().line;
        self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parameters(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        let doc = docstring(&body);
        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef {
            line,
            name,
            params,
            body,
            doc,
        })))
    }

    fn parameters(&mut self, closing: &str) -> Result<Vec<Param>, ParseError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(closing) {
            let name = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!(
                    "duplicate argument '{}' in function definition",
                    name
                )));
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_statement(&mut self) -> Result<StmtKind, ParseError> {
        self.advance();
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.at_keyword("except") {
            let line = self.current().line;
            self.advance();
            let (kind, name) = if self.at_op(":") {
                (None, None)
            } else {
                let kind = self.dotted_name()?;
                let name = if self.eat_keyword("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let body = self.block()?;
            handlers.push(ExceptHandler {
                line,
                kind,
                name,
                body,
            });
        }
        let finalbody = if self.eat_keyword("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finalbody,
        })
    }

    // ---- expressions ------------------------------------------------------

    /// `a, b, c` becomes a tuple; a single expression stays as is.
    fn testlist(&mut self) -> Result<Expr, ParseError> {
        let first = self.test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let (line, col) = (first.line, first.col);
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.starts_expression() {
                items.push(self.test()?);
            } else {
                break;
            }
        }
        Ok(Expr::new(line, col, ExprKind::Tuple(items)))
    }

    fn starts_expression(&self) -> bool {
        match &self.current().tok {
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => true,
            Tok::Name(n) => {
                !is_keyword(n) || matches!(n.as_str(), "None" | "True" | "False" | "not" | "lambda")
            }
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    fn test(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let expr = self.conditional();
        self.leave();
        expr
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.at_keyword("if") {
            self.advance();
            let test = self.or_test()?;
            self.expect_keyword("else")?;
            let orelse = self.test()?;
            let (line, col) = (body.line, body.col);
            return Ok(Expr::new(
                line,
                col,
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
            ));
        }
        Ok(body)
    }

    fn lambda(&mut self) -> Result<Expr, ParseError> {
        let (line, col) = (self.current().line, self.current().col);
        self.advance();
        let params = self.parameters(":")?;
        self.expect_op(":")?;
        let body = self.test()?;
        let def = FunctionDef {
            line,
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
            doc: None,
        };
        Ok(Expr::new(line, col, ExprKind::Lambda(Rc::new(def))))
    }

    fn or_test(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_test()?;
        while self.at_keyword("or") {
            self.advance();
            let right = self.and_test()?;
            let (line, col) = (left.line, left.col);
            left = Expr::new(line, col, ExprKind::Or(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_test()?;
        while self.at_keyword("and") {
            self.advance();
            let right = self.not_test()?;
            let (line, col) = (left.line, left.col);
            left = Expr::new(line, col, ExprKind::And(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("not") {
            let (line, col) = (self.current().line, self.current().col);
            self.advance();
            let operand = self.not_test()?;
            return Ok(Expr::new(
                line,
                col,
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            ));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let simple = match &self.current().tok {
            Tok::Op("==") => Some(CmpOp::Eq),
            Tok::Op("!=") => Some(CmpOp::NotEq),
            Tok::Op("<") => Some(CmpOp::Lt),
            Tok::Op("<=") => Some(CmpOp::LtE),
            Tok::Op(">") => Some(CmpOp::Gt),
            Tok::Op(">=") => Some(CmpOp::GtE),
            Tok::Name(n) if n == "in" => Some(CmpOp::In),
            _ => None,
        };
        if let Some(op) = simple {
            self.advance();
            return Some(op);
        }
        if self.eat_keyword("is") {
            return Some(if self.eat_keyword("not") {
                CmpOp::IsNot
            } else {
                CmpOp::Is
            });
        }
        if self.at_keyword("not") && matches!(self.peek_tok(1), Tok::Name(m) if m == "in") {
            self.advance();
            self.advance();
            return Some(CmpOp::NotIn);
        }
        None
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let (line, col) = (left.line, left.col);
        Ok(Expr::new(
            line,
            col,
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
        ))
    }

    fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
        let (line, col) = (left.line, left.col);
        Expr::new(
            line,
            col,
            ExprKind::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
        )
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.factor()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let (line, col) = (self.current().line, self.current().col);
        let op = if self.eat_op("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_op("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        match op {
            Some(op) => {
                self.enter()?;
                let operand = self.factor();
                self.leave();
                let operand = operand?;
                Ok(Expr::new(
                    line,
                    col,
                    ExprKind::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                ))
            }
            None => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.primary()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Self::binary(base, BinOp::Pow, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            let (line, col) = (self.current().line, self.current().col);
            if self.eat_op("(") {
                let (args, keywords) = self.call_arguments()?;
                self.expect_op(")")?;
                expr = Expr::new(
                    line,
                    col,
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                );
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::new(
                    line,
                    col,
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                );
            } else if self.eat_op(".") {
                let attr = match &self.current().tok {
                    Tok::Name(n) => n.clone(),
                    _ => return Err(self.error("expected attribute name")),
                };
                self.advance();
                expr = Expr::new(
                    line,
                    col,
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut keywords: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            let is_keyword_arg = matches!(&self.current().tok, Tok::Name(n) if !is_keyword(n))
                && matches!(self.peek_tok(1), Tok::Op("="));
            if is_keyword_arg {
                let name = self.expect_name()?;
                self.advance(); // `=`
                if keywords.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                keywords.push((name, self.test()?));
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.test()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn subscript(&mut self) -> Result<Expr, ParseError> {
        let (line, col) = (self.current().line, self.current().col);
        let lower = if self.at_op(":") {
            None
        } else {
            let first = self.test()?;
            if !self.at_op(":") {
                return Ok(first);
            }
            Some(Box::new(first))
        };
        self.expect_op(":")?;
        let upper = if self.at_op(":") || self.at_op("]") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.at_op("]") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::new(line, col, ExprKind::Slice { lower, upper, step }))
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        let (line, col) = (token.line, token.col);
        let kind = match token.tok {
            Tok::Int(v) => {
                self.advance();
                ExprKind::Constant(Constant::Int(v))
            }
            Tok::Float(v) => {
                self.advance();
                ExprKind::Constant(Constant::Float(v))
            }
            Tok::Str(s) => {
                self.advance();
                let mut text = s;
                while let Tok::Str(next) = &self.current().tok {
                    text.push_str(next);
                    self.advance();
                }
                ExprKind::Constant(Constant::Str(Rc::from(text.as_str())))
            }
            Tok::Name(n) => match n.as_str() {
                "None" => {
                    self.advance();
                    ExprKind::Constant(Constant::None)
                }
                "True" => {
                    self.advance();
                    ExprKind::Constant(Constant::Bool(true))
                }
                "False" => {
                    self.advance();
                    ExprKind::Constant(Constant::Bool(false))
                }
                name if is_keyword(name) => return Err(self.error("invalid syntax")),
                _ => {
                    let name = n.clone();
                    self.advance();
                    ExprKind::Name(name)
                }
            },
            Tok::Op("(") => {
                self.advance();
                if self.eat_op(")") {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let inner = self.test()?;
                    if self.at_op(",") {
                        let mut items = vec![inner];
                        while self.eat_op(",") {
                            if self.at_op(")") {
                                break;
                            }
                            items.push(self.test()?);
                        }
                        self.expect_op(")")?;
                        ExprKind::Tuple(items)
                    } else {
                        self.expect_op(")")?;
                        return Ok(inner);
                    }
                }
            }
            Tok::Op("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.at_op("]") {
                    items.push(self.test()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                ExprKind::List(items)
            }
            Tok::Op("{") => {
                self.advance();
                let mut pairs = Vec::new();
                while !self.at_op("}") {
                    let key = self.test()?;
                    self.expect_op(":")?;
                    let value = self.test()?;
                    pairs.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                ExprKind::Dict(pairs)
            }
            Tok::Eof => return Err(self.error("unexpected EOF while parsing")),
            _ => return Err(self.error("invalid syntax")),
        };
        Ok(Expr::new(line, col, kind))
    }
}

fn docstring(body: &[Stmt]) -> Option<String> {
    match body.first().map(|s| &s.kind) {
        Some(StmtKind::Expr(Expr {
            kind: ExprKind::Constant(Constant::Str(s)),
            ..
        })) => Some(s.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_nested_blocks() {
        let program = parse_program(
            "def f(a, b=2):\n    if a:\n        return a + b\n    return 0\nx = f(1)\n",
        )
        .unwrap();
        assert_eq!(program.body.len(), 2);
        match &program.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params.len(), 2);
                assert!(def.params[1].default.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse_expression("1 + 2 * 3 ** 2").unwrap();
        match expr.kind {
            ExprKind::BinOp { op, right, .. } => {
                assert_eq!(op, BinOp::Add);
                assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_import_forms() {
        let program =
            parse_program("import os.path as p, math\nfrom json import dumps, loads as l\n")
                .unwrap();
        match &program.body[0].kind {
            StmtKind::Import(names) => {
                assert_eq!(names[0].name, "os.path");
                assert_eq!(names[0].asname.as_deref(), Some("p"));
                assert_eq!(names[1].name, "math");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &program.body[1].kind,
            StmtKind::ImportFrom { module, names } if module == "json" && names.len() == 2
        ));
    }

    #[test]
    fn test_try_and_slices() {
        let program = parse_program(
            "try:\n    x = a[1:3]\nexcept KeyError as e:\n    pass\nfinally:\n    y = 1\n",
        )
        .unwrap();
        assert!(matches!(&program.body[0].kind, StmtKind::Try { handlers, finalbody, .. }
            if handlers.len() == 1 && finalbody.len() == 1));
    }

    #[test]
    fn test_syntax_errors_have_locations() {
        let err = parse_program("x = (1 +\n").unwrap_err();
        assert!(err.line >= 1);

        let err = parse_program("if True\n    pass\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("':'"));

        let err = parse_program("  x = 1\n").unwrap_err();
        assert_eq!(err.message, "unexpected indent");

        assert!(parse_program("1 = x\n").is_err());
        assert!(parse_expression("x = 1").is_err());
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected_not_overflowed() {
        let source = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
        let err = parse_expression(&source).unwrap_err();
        assert!(err.message.contains("nested"));
        let source = format!("{}1", "-".repeat(5000));
        assert!(parse_expression(&source).is_err());
    }

    #[test]
    fn test_single_line_suites_and_semicolons() {
        let program = parse_program("if x: y = 1; z = 2\nwhile False: pass\n").unwrap();
        match &program.body[0].kind {
            StmtKind::If { body, .. } => assert_eq!(body.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
