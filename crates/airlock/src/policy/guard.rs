//! Guard predicates: the restricted expression language behind string-valued
//! `allow` entries.
//!
//! A guard is an arrow function whose body is a single expression:
//!
//! ```text
//! () => true
//! x => typeof x === "string"
//! (self, path, mode) => mode !== "w" && path.length < param("max_path")
//! ```
//!
//! Supported: literals (`true false null undefined`, numbers, quoted
//! strings), parameter names, member access, `!`, unary `-`, `typeof`,
//! `=== !== == !=`, `< <= > >=`, `&& ||`, parentheses and `param("id")`.
//! Anything else is rejected at compile time. Guards never see ambient
//! state beyond their bound arguments and the policy parameters.

use std::fmt;

use super::PolicyParameters;
use crate::error::{Error, Result};
use crate::realm::{PropertyKey, Value};

/// A compiled guard predicate.
pub struct Guard {
    source: String,
    params: Vec<String>,
    body: Expr,
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("source", &self.source)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Guard {
    /// Compile `source`. Fails with [`Error::Policy`] on any syntax outside
    /// the guard language.
    pub fn compile(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            params: Vec::new(),
        };
        let params = parser.parameters()?;
        parser.params = params.clone();
        parser.expect(&Token::Arrow)?;
        let body = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(policy_error(format!("unexpected {token} after guard body")));
        }
        Ok(Self {
            source: source.to_owned(),
            params,
            body,
        })
    }

    /// Source text the guard was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Evaluate against positional bindings; missing bindings are
    /// `undefined`. Any failure is a fatal [`Error::Policy`].
    pub fn evaluate(&self, bindings: &[Value], parameters: &PolicyParameters) -> Result<bool> {
        let scope = Scope {
            bindings,
            parameters,
        };
        scope
            .eval(&self.body)
            .map(|v| v.truthy())
            .map_err(|e| match e {
                Error::Policy(_) => e,
                other => policy_error(format!("guard '{}' failed: {other}", self.source)),
            })
    }
}

fn policy_error(message: impl Into<String>) -> Error {
    Error::Policy(message.into())
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Bang,
    Minus,
    Arrow,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {n}"),
            Self::Str(s) => write!(f, "string {s:?}"),
            Self::Ident(name) => write!(f, "'{name}'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Comma => f.write_str("','"),
            Self::Dot => f.write_str("'.'"),
            Self::Bang => f.write_str("'!'"),
            Self::Minus => f.write_str("'-'"),
            Self::Arrow => f.write_str("'=>'"),
            Self::StrictEq => f.write_str("'==='"),
            Self::StrictNe => f.write_str("'!=='"),
            Self::LooseEq => f.write_str("'=='"),
            Self::LooseNe => f.write_str("'!='"),
            Self::Lt => f.write_str("'<'"),
            Self::Le => f.write_str("'<='"),
            Self::Gt => f.write_str("'>'"),
            Self::Ge => f.write_str("'>='"),
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < len {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let rest = &bytes[pos..];
        let (token, width) = match c {
            b'(' => (Token::LParen, 1),
            b')' => (Token::RParen, 1),
            b',' => (Token::Comma, 1),
            b'-' => (Token::Minus, 1),
            b'.' if !rest.get(1).is_some_and(u8::is_ascii_digit) => (Token::Dot, 1),
            b'=' if rest.starts_with(b"===") => (Token::StrictEq, 3),
            b'=' if rest.starts_with(b"==") => (Token::LooseEq, 2),
            b'=' if rest.starts_with(b"=>") => (Token::Arrow, 2),
            b'!' if rest.starts_with(b"!==") => (Token::StrictNe, 3),
            b'!' if rest.starts_with(b"!=") => (Token::LooseNe, 2),
            b'!' => (Token::Bang, 1),
            b'<' if rest.starts_with(b"<=") => (Token::Le, 2),
            b'<' => (Token::Lt, 1),
            b'>' if rest.starts_with(b">=") => (Token::Ge, 2),
            b'>' => (Token::Gt, 1),
            b'&' if rest.starts_with(b"&&") => (Token::And, 2),
            b'|' if rest.starts_with(b"||") => (Token::Or, 2),
            b'"' | b'\'' => {
                let (text, width) = string_literal(source, pos)?;
                (Token::Str(text), width)
            }
            b'0'..=b'9' | b'.' => {
                let start = pos;
                let mut end = pos;
                while end < len && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
                    end += 1;
                }
                let text = &source[start..end];
                let n: f64 = text
                    .parse()
                    .map_err(|_| policy_error(format!("malformed number '{text}' in guard")))?;
                (Token::Number(n), end - start)
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => {
                let start = pos;
                let mut end = pos;
                while end < len
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'$')
                {
                    end += 1;
                }
                (Token::Ident(source[start..end].to_owned()), end - start)
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(policy_error(format!(
                    "unsupported character '{ch}' in guard at offset {pos}"
                )));
            }
        };
        tokens.push(token);
        pos += width;
    }
    Ok(tokens)
}

/// Parse a quoted string starting at `start`; returns the text and the
/// number of bytes consumed including quotes.
fn string_literal(source: &str, start: usize) -> Result<(String, usize)> {
    let mut chars = source[start..].char_indices();
    let quote = chars.next().map(|(_, c)| c).unwrap_or('"');
    let mut text = String::new();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            c if c == quote => return Ok((text, offset + c.len_utf8())),
            c => text.push(c),
        }
    }
    Err(policy_error("unterminated string literal in guard"))
}

// ---------------------------------------------------------------------------
// Syntax tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug)]
enum Expr {
    Literal(Value),
    Binding(usize),
    Parameter(String),
    Member(Box<Expr>, String),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    TypeOf(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: Vec<String>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        match self.next() {
            Some(ref found) if found == token => Ok(()),
            Some(found) => Err(policy_error(format!("expected {token}, found {found}"))),
            None => Err(policy_error(format!("expected {token}, found end of guard"))),
        }
    }

    fn identifier(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) if !is_keyword(&name) => Ok(name),
            Some(found) => Err(policy_error(format!("expected a parameter name, found {found}"))),
            None => Err(policy_error("guards must be functions, got an empty source")),
        }
    }

    fn parameters(&mut self) -> Result<Vec<String>> {
        if !self.eat(&Token::LParen) {
            if matches!(self.tokens.get(self.pos + 1), Some(Token::Arrow)) {
                return Ok(vec![self.identifier()?]);
            }
            return Err(policy_error("guards must be arrow functions"));
        }
        let mut params = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(params);
        }
        loop {
            let name = self.identifier()?;
            if params.contains(&name) {
                return Err(policy_error(format!("duplicate guard parameter '{name}'")));
            }
            params.push(name);
            if self.eat(&Token::RParen) {
                return Ok(params);
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut left = self.conjunction()?;
        while self.eat(&Token::Or) {
            left = Expr::Or(Box::new(left), Box::new(self.conjunction()?));
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            left = Expr::And(Box::new(left), Box::new(self.equality()?));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::StrictEq) => BinaryOp::StrictEq,
                Some(Token::StrictNe) => BinaryOp::StrictNe,
                Some(Token::LooseEq) => BinaryOp::LooseEq,
                Some(Token::LooseNe) => BinaryOp::LooseNe,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.relational()?));
        }
    }

    fn relational(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        if self.peek() == Some(&Token::Ident("typeof".to_owned())) {
            self.pos += 1;
            return Ok(Expr::TypeOf(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Token::Dot) {
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                Some(found) => {
                    return Err(policy_error(format!("expected a property name, found {found}")));
                }
                None => return Err(policy_error("expected a property name, found end of guard")),
            };
            expr = Expr::Member(Box::new(expr), name);
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "undefined" => Ok(Expr::Literal(Value::Undefined)),
                "param" if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let id = match self.next() {
                        Some(Token::Str(id)) => id,
                        _ => return Err(policy_error("param() takes one string literal")),
                    };
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Parameter(id))
                }
                _ => match self.params.iter().position(|p| *p == name) {
                    Some(index) => Ok(Expr::Binding(index)),
                    None => Err(policy_error(format!("unknown identifier '{name}' in guard"))),
                },
            },
            Some(found) => Err(policy_error(format!("unexpected {found} in guard"))),
            None => Err(policy_error("unexpected end of guard")),
        }
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(name, "true" | "false" | "null" | "undefined" | "typeof" | "param")
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

struct Scope<'a> {
    bindings: &'a [Value],
    parameters: &'a PolicyParameters,
}

impl Scope<'_> {
    fn eval(&self, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Binding(i) => self.bindings.get(*i).cloned().unwrap_or_default(),
            Expr::Parameter(id) => Value::String(self.parameters.get(id)?.to_owned()),
            Expr::Member(object, name) => member(&self.eval(object)?, name)?,
            Expr::Not(inner) => Value::Bool(!self.eval(inner)?.truthy()),
            Expr::Negate(inner) => Value::Number(-self.eval(inner)?.to_number()),
            Expr::TypeOf(inner) => Value::from(self.eval(inner)?.type_of()),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() { self.eval(right)? } else { left }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() { left } else { self.eval(right)? }
            }
            Expr::Binary(op, left, right) => {
                let (a, b) = (self.eval(left)?, self.eval(right)?);
                Value::Bool(match op {
                    BinaryOp::StrictEq => a.strict_equals(&b),
                    BinaryOp::StrictNe => !a.strict_equals(&b),
                    BinaryOp::LooseEq => loose_equals(&a, &b),
                    BinaryOp::LooseNe => !loose_equals(&a, &b),
                    BinaryOp::Lt => compare(&a, &b).is_some_and(|o| o.is_lt()),
                    BinaryOp::Le => compare(&a, &b).is_some_and(|o| o.is_le()),
                    BinaryOp::Gt => compare(&a, &b).is_some_and(|o| o.is_gt()),
                    BinaryOp::Ge => compare(&a, &b).is_some_and(|o| o.is_ge()),
                })
            }
        })
    }
}

fn member(object: &Value, name: &str) -> Result<Value> {
    match object {
        Value::Object(obj) => obj.get(&PropertyKey::from(name), object),
        Value::String(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
        Value::Undefined | Value::Null => Err(policy_error(format!(
            "cannot read property '{name}' of {object}"
        ))),
        _ => Ok(Value::Undefined),
    }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        _ if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            a.to_number() == b.to_number()
        }
        (Value::Bool(_), _) => loose_equals(&Value::Number(a.to_number()), b),
        (_, Value::Bool(_)) => loose_equals(a, &Value::Number(b.to_number())),
        _ => a.strict_equals(b),
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}
