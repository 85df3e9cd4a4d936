//! Tokenizer for the guest dialect.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` tokens so the parser never has to look at whitespace. Newlines
//! inside brackets are implicit line joins and are dropped.

use crate::config::types::ParseError;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub col: u32,
}

pub const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "break", "continue", "def", "del", "elif", "else", "except", "False",
    "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "None", "not", "or",
    "pass", "raise", "return", "True", "try", "while",
];

// Longest operators first so that greedy matching is correct.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+", "-",
    "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    indents: Vec<u32>,
    depth: usize,
    tokens: Vec<Token>,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
        indents: vec![0],
        depth: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok, line: u32, col: u32) {
        self.tokens.push(Token { tok, line, col });
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, self.col, message)
    }

    fn run(&mut self) -> Result<(), ParseError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };

            match c {
                '\n' => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    if self.depth == 0 {
                        self.push(Tok::Newline, line, col);
                        at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\'' | '"' => self.lex_string(false)?,
                c if c.is_ascii_digit() => self.lex_number()?,
                '.' if self.peek_at(1).map_or(false, |d| d.is_ascii_digit()) => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => {
                    if (c == 'r' || c == 'R') && matches!(self.peek_at(1), Some('\'') | Some('"')) {
                        self.bump();
                        self.lex_string(true)?;
                    } else {
                        self.lex_name();
                    }
                }
                _ => self.lex_operator()?,
            }
        }

        let (line, col) = (self.line, self.col);
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline, line, col);
        }
        if self.depth > 0 {
            return Err(self.error("unexpected EOF: unclosed bracket"));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line, col);
        }
        self.push(Tok::Eof, line, col);
        Ok(())
    }

    /// Measures leading whitespace and emits Indent/Dedent tokens.
    /// Returns true when the whole line was blank or a comment.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0u32;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.bump();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.bump();
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        let (line, col) = (self.line, self.col);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, line, col);
        } else if width < current {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent, line, col);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(ParseError::new(
                    line,
                    col,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_name(&mut self) {
        let (line, col) = (self.line, self.col);
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(Tok::Name(name), line, col);
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    if c != '_' {
                        digits.push(c);
                    }
                    self.bump();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| ParseError::new(line, col, "invalid hexadecimal literal"))?;
            self.push(Tok::Int(value), line, col);
            return Ok(());
        }

        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' if !is_float => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' => {
                    let sign = self.peek_at(1);
                    let next_digit = match sign {
                        Some('+') | Some('-') => self.peek_at(2),
                        other => other,
                    };
                    if !next_digit.map_or(false, |d| d.is_ascii_digit()) {
                        break;
                    }
                    is_float = true;
                    text.push('e');
                    self.bump();
                    if let Some(s @ ('+' | '-')) = self.peek() {
                        text.push(s);
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }

        if self.peek().map_or(false, |c| c.is_alphabetic() || c == '_') {
            return Err(ParseError::new(line, col, "invalid decimal literal"));
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| ParseError::new(line, col, "invalid float literal"))?;
            self.push(Tok::Float(value), line, col);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| ParseError::new(line, col, "integer literal too large"))?;
            self.push(Tok::Int(value), line, col);
        }
        Ok(())
    }

    fn lex_string(&mut self, raw: bool) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut value = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => {
                    return Err(ParseError::new(
                        line,
                        col,
                        "unterminated string literal",
                    ))
                }
            };
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                value.push(c);
                continue;
            }
            if c == '\n' && !triple {
                return Err(ParseError::new(line, col, "unterminated string literal"));
            }
            if c == '\\' && !raw {
                let escaped = self
                    .bump()
                    .ok_or_else(|| ParseError::new(line, col, "unterminated string literal"))?;
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '0' => value.push('\0'),
                    '\\' => value.push('\\'),
                    '\'' => value.push('\''),
                    '"' => value.push('"'),
                    '\n' => {}
                    'x' => value.push(self.lex_code_point(2, line, col)?),
                    'u' => value.push(self.lex_code_point(4, line, col)?),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
                continue;
            }
            if c == '\\' && raw {
                value.push(c);
                if let Some(next) = self.bump() {
                    value.push(next);
                }
                continue;
            }
            value.push(c);
        }

        self.push(Tok::Str(value), line, col);
        Ok(())
    }

    fn lex_code_point(&mut self, digits: usize, line: u32, col: u32) -> Result<char, ParseError> {
        let mut hex = String::with_capacity(digits);
        for _ in 0..digits {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                _ => return Err(ParseError::new(line, col, "truncated escape sequence")),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ParseError::new(line, col, "invalid escape sequence"))
    }

    fn lex_operator(&mut self) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                for _ in 0..len {
                    self.bump();
                }
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => {
                        if self.depth == 0 {
                            return Err(ParseError::new(
                                line,
                                col,
                                format!("unmatched '{}'", op),
                            ));
                        }
                        self.depth -= 1;
                    }
                    _ => {}
                }
                self.push(Tok::Op(op), line, col);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or('?');
        Err(self.error(format!("invalid character '{}'", c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_expression() {
        assert_eq!(
            kinds("1 + 2.5"),
            vec![
                Tok::Int(1),
                Tok::Op("+"),
                Tok::Float(2.5),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indentation_tokens() {
        let toks = kinds("if x:\n    y = 1\nz\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("f(1,\n  2)\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds("'a\\nb'")[0],
            Tok::Str("a\nb".to_string())
        );
        assert_eq!(kinds("r'a\\nb'")[0], Tok::Str("a\\nb".to_string()));
        assert_eq!(
            kinds("\"\"\"x\ny\"\"\"")[0],
            Tok::Str("x\ny".to_string())
        );
    }

    #[test]
    fn test_errors_carry_location() {
        let err = tokenize("x = 'abc").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated"));

        let err = tokenize("if x:\n        a\n    b\n").unwrap_err();
        assert_eq!(err.line, 3);

        assert!(tokenize("x = $").is_err());
        assert!(tokenize("99999999999999999999999").is_err());
    }
}
