//! Expression engine for `custom` rule checks.
//!
//! Pack authors who need more than the declarative check variants write a
//! small boolean expression over the node under test:
//!
//! ```text
//! kind == "interface" && !contains("shutdown")
//! all(has_child("mtu-*"), any(contains("mtu 1500"), contains("mtu 9000")))
//! cisco.has_interface("Gig0/1") || at_least(2, is_leaf(), contains("vty"), matches("^line"))
//! ```
//!
//! The language is deliberately tiny and deterministic: no loops, no
//! variables, no I/O. Conditions are comparisons on the node's `id`,
//! `kind` and `content` fields, built-in node predicates, and helper
//! calls resolved through the [`HelperRegistry`](crate::helpers::HelperRegistry)
//! (bare short name or `vendor.name`).
//!
//! Evaluation fails closed: a parse error, unknown helper, or exceeded
//! deadline makes the whole expression evaluate to `false`.

use std::fmt;
use std::time::Instant;

use regex::Regex;

use crate::helpers::HelperRegistry;
use crate::node::ConfigNode;

/// Maximum allowed expression source size in bytes.
const MAX_EXPR_INPUT_BYTES: usize = 64 * 1024;
/// Maximum supported nesting depth for expressions.
const MAX_EXPR_NESTING: usize = 32;

/// Errors raised while parsing or evaluating an expression.
///
/// Never surfaced to callers of a check; logged at debug level and
/// converted to a `false` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// Input was empty or contained only whitespace.
    EmptyInput,
    /// Input exceeded the size limit.
    InputTooLarge { actual_bytes: usize },
    /// Input exceeded the nesting limit.
    NestingTooDeep { position: usize },
    /// Unexpected token during parsing.
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },
    /// A regex literal failed to compile.
    InvalidPattern { position: usize },
    /// A numeric literal failed to parse.
    InvalidNumber { position: usize },
    /// Trailing input after a complete expression.
    TrailingInput { position: usize },
    /// Helper name not found in the registry (evaluation time).
    UnknownHelper { name: String },
    /// The evaluation deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "expression is empty"),
            Self::InputTooLarge { actual_bytes } => {
                write!(
                    f,
                    "expression exceeds size limit: {actual_bytes} bytes (max {MAX_EXPR_INPUT_BYTES})"
                )
            }
            Self::NestingTooDeep { position } => {
                write!(f, "expression nesting exceeds {MAX_EXPR_NESTING} at {position}")
            }
            Self::UnexpectedToken {
                expected,
                found,
                position,
            } => write!(f, "unexpected token `{found}` at {position}, expected {expected}"),
            Self::InvalidPattern { position } => write!(f, "invalid pattern at {position}"),
            Self::InvalidNumber { position } => write!(f, "invalid number at {position}"),
            Self::TrailingInput { position } => write!(f, "unexpected input at {position}"),
            Self::UnknownHelper { name } => write!(f, "unknown helper `{name}`"),
            Self::DeadlineExceeded => write!(f, "evaluation deadline exceeded"),
        }
    }
}

/// Node fields addressable in comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Kind,
    Content,
}

impl Field {
    fn get<'a>(self, node: &'a ConfigNode) -> &'a str {
        match self {
            Field::Id => &node.id,
            Field::Kind => &node.kind,
            Field::Content => &node.content,
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// `at_least(n, e1, e2, ...)` — true when at least `n` operands hold.
    AtLeast(usize, Vec<Expr>),
    Eq(Field, String),
    Ne(Field, String),
    Contains(String),
    Matches(Regex),
    HasChild(String),
    ChildContains(String, String),
    ChildMatches(String, Regex),
    Helper {
        namespace: Option<String>,
        name: String,
        args: Vec<String>,
    },
    Lit(bool),
}

/// A parsed `custom` check program.
///
/// Parsing never fails loudly: a malformed program is retained with its
/// error and evaluates to `false`.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    compiled: Result<Expr, ExprError>,
}

impl Program {
    /// Parse an expression. The returned program is always usable;
    /// parse failures are folded into fail-closed evaluation.
    pub fn parse(source: &str) -> Self {
        let compiled = compile(source);
        if let Err(err) = &compiled {
            tracing::debug!(error = %err, "custom check failed to parse");
        }
        Self {
            source: source.to_string(),
            compiled,
        }
    }

    /// The original expression source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the program parsed cleanly.
    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    /// Evaluate against a node, failing closed on any error or timeout.
    pub fn evaluate(&self, node: &ConfigNode, helpers: &HelperRegistry, deadline: Instant) -> bool {
        let expr = match &self.compiled {
            Ok(expr) => expr,
            Err(_) => return false,
        };
        match eval(expr, node, helpers, deadline) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "custom check evaluation failed closed");
                false
            }
        }
    }
}

fn compile(source: &str) -> Result<Expr, ExprError> {
    if source.trim().is_empty() {
        return Err(ExprError::EmptyInput);
    }
    if source.len() > MAX_EXPR_INPUT_BYTES {
        return Err(ExprError::InputTooLarge {
            actual_bytes: source.len(),
        });
    }
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let expr = parser.parse_or(0)?;
    if let Some(token) = parser.peek() {
        return Err(ExprError::TrailingInput {
            position: token.position,
        });
    }
    Ok(expr)
}

fn eval(
    expr: &Expr,
    node: &ConfigNode,
    helpers: &HelperRegistry,
    deadline: Instant,
) -> Result<bool, ExprError> {
    if Instant::now() > deadline {
        return Err(ExprError::DeadlineExceeded);
    }
    match expr {
        Expr::And(operands) => {
            for operand in operands {
                if !eval(operand, node, helpers, deadline)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expr::Or(operands) => {
            for operand in operands {
                if eval(operand, node, helpers, deadline)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Not(inner) => Ok(!eval(inner, node, helpers, deadline)?),
        Expr::AtLeast(needed, operands) => {
            let mut hits = 0usize;
            for operand in operands {
                if eval(operand, node, helpers, deadline)? {
                    hits += 1;
                    if hits >= *needed {
                        return Ok(true);
                    }
                }
            }
            Ok(hits >= *needed)
        }
        Expr::Eq(field, value) => Ok(field.get(node) == value),
        Expr::Ne(field, value) => Ok(field.get(node) != value),
        Expr::Contains(text) => Ok(node.content.contains(text)),
        Expr::Matches(regex) => Ok(regex.is_match(&node.content)),
        Expr::HasChild(selector) => Ok(node.children_matching(selector).next().is_some()),
        Expr::ChildContains(selector, text) => Ok(node
            .children_matching(selector)
            .any(|child| child.content.contains(text))),
        Expr::ChildMatches(selector, regex) => Ok(node
            .children_matching(selector)
            .any(|child| regex.is_match(&child.content))),
        Expr::Helper {
            namespace,
            name,
            args,
        } => {
            let helper = helpers
                .lookup(namespace.as_deref(), name)
                .ok_or_else(|| ExprError::UnknownHelper { name: name.clone() })?;
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            Ok(helper(node, &arg_refs))
        }
        Expr::Lit(value) => Ok(*value),
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(usize),
    LeftParen,
    RightParen,
    Comma,
    Dot,
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    NotEq,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn lex(source: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                tokens.push(Token {
                    kind: TokenKind::LeftParen,
                    position: i,
                });
                i += 1;
            }
            b')' => {
                tokens.push(Token {
                    kind: TokenKind::RightParen,
                    position: i,
                });
                i += 1;
            }
            b',' => {
                tokens.push(Token {
                    kind: TokenKind::Comma,
                    position: i,
                });
                i += 1;
            }
            b'.' => {
                tokens.push(Token {
                    kind: TokenKind::Dot,
                    position: i,
                });
                i += 1;
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token {
                        kind: TokenKind::AndAnd,
                        position: i,
                    });
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedToken {
                        expected: "`&&`",
                        found: "&".into(),
                        position: i,
                    });
                }
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token {
                        kind: TokenKind::OrOr,
                        position: i,
                    });
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedToken {
                        expected: "`||`",
                        found: "|".into(),
                        position: i,
                    });
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::NotEq,
                        position: i,
                    });
                    i += 2;
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Bang,
                        position: i,
                    });
                    i += 1;
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token {
                        kind: TokenKind::EqEq,
                        position: i,
                    });
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedToken {
                        expected: "`==`",
                        found: "=".into(),
                        position: i,
                    });
                }
            }
            b'"' | b'\'' => {
                let quote = b;
                let start = i;
                i += 1;
                let mut value = String::new();
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(ExprError::UnexpectedToken {
                                expected: "closing quote",
                                found: "end of input".into(),
                                position: start,
                            });
                        }
                        Some(&c) if c == quote => {
                            i += 1;
                            break;
                        }
                        Some(b'\\') => {
                            // `\"` and `\\` are escapes; any other
                            // backslash passes through verbatim so regex
                            // patterns like `\d+` survive.
                            match bytes.get(i + 1) {
                                Some(&c) if c == quote || c == b'\\' => {
                                    value.push(c as char);
                                    i += 2;
                                }
                                _ => {
                                    value.push('\\');
                                    i += 1;
                                }
                            }
                        }
                        Some(_) => {
                            // Consume one UTF-8 character.
                            let rest = &source[i..];
                            let ch = rest.chars().next().ok_or(ExprError::UnexpectedToken {
                                expected: "character",
                                found: "invalid UTF-8 boundary".into(),
                                position: i,
                            })?;
                            value.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    position: start,
                });
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let number = source[start..i]
                    .parse::<usize>()
                    .map_err(|_| ExprError::InvalidNumber { position: start })?;
                tokens.push(Token {
                    kind: TokenKind::Number(number),
                    position: start,
                });
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(source[start..i].to_string()),
                    position: start,
                });
            }
            other => {
                return Err(ExprError::UnexpectedToken {
                    expected: "expression",
                    found: (other as char).to_string(),
                    position: i,
                });
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind, expected: &'static str) -> Result<Token, ExprError> {
        match self.advance() {
            Some(token) if &token.kind == kind => Ok(token),
            Some(token) => Err(ExprError::UnexpectedToken {
                expected,
                found: describe(&token.kind),
                position: token.position,
            }),
            None => Err(ExprError::UnexpectedToken {
                expected,
                found: "end of input".into(),
                position: self.last_position(),
            }),
        }
    }

    fn last_position(&self) -> usize {
        self.tokens.last().map(|t| t.position).unwrap_or(0)
    }

    fn check_depth(&self, depth: usize, position: usize) -> Result<(), ExprError> {
        if depth > MAX_EXPR_NESTING {
            Err(ExprError::NestingTooDeep { position })
        } else {
            Ok(())
        }
    }

    fn parse_or(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut operands = vec![self.parse_and(depth)?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::OrOr)) {
            self.advance();
            operands.push(self.parse_and(depth)?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or(operands)
        })
    }

    fn parse_and(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let mut operands = vec![self.parse_unary(depth)?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::AndAnd)) {
            self.advance();
            operands.push(self.parse_unary(depth)?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And(operands)
        })
    }

    fn parse_unary(&mut self, depth: usize) -> Result<Expr, ExprError> {
        match self.peek().map(|t| (t.kind.clone(), t.position)) {
            Some((TokenKind::Bang, position)) => {
                self.check_depth(depth + 1, position)?;
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary(depth + 1)?)))
            }
            _ => self.parse_primary(depth),
        }
    }

    fn parse_primary(&mut self, depth: usize) -> Result<Expr, ExprError> {
        let token = self.advance().ok_or(ExprError::UnexpectedToken {
            expected: "expression",
            found: "end of input".into(),
            position: self.last_position(),
        })?;
        match token.kind {
            TokenKind::LeftParen => {
                self.check_depth(depth + 1, token.position)?;
                let inner = self.parse_or(depth + 1)?;
                self.eat(&TokenKind::RightParen, "`)`")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => self.parse_ident(name, token.position, depth),
            other => Err(ExprError::UnexpectedToken {
                expected: "expression",
                found: describe(&other),
                position: token.position,
            }),
        }
    }

    fn parse_ident(
        &mut self,
        name: String,
        position: usize,
        depth: usize,
    ) -> Result<Expr, ExprError> {
        // Boolean literals
        match name.as_str() {
            "true" => return Ok(Expr::Lit(true)),
            "false" => return Ok(Expr::Lit(false)),
            _ => {}
        }

        // Field comparison: `id == "x"` / `content != 'y'`
        let field = match name.as_str() {
            "id" => Some(Field::Id),
            "kind" => Some(Field::Kind),
            "content" => Some(Field::Content),
            _ => None,
        };
        if let Some(field) = field {
            if let Some(kind) = self.peek().map(|t| t.kind.clone()) {
                match kind {
                    TokenKind::EqEq => {
                        self.advance();
                        let value = self.eat_string()?;
                        return Ok(Expr::Eq(field, value));
                    }
                    TokenKind::NotEq => {
                        self.advance();
                        let value = self.eat_string()?;
                        return Ok(Expr::Ne(field, value));
                    }
                    _ => {}
                }
            }
            return Err(ExprError::UnexpectedToken {
                expected: "`==` or `!=` after field",
                found: self
                    .peek()
                    .map(|t| describe(&t.kind))
                    .unwrap_or_else(|| "end of input".into()),
                position,
            });
        }

        // Namespaced helper call: `vendor.name(args)`
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Dot)) {
            self.advance();
            let member = match self.advance() {
                Some(Token {
                    kind: TokenKind::Ident(member),
                    ..
                }) => member,
                other => {
                    return Err(ExprError::UnexpectedToken {
                        expected: "helper name after `.`",
                        found: other
                            .map(|t| describe(&t.kind))
                            .unwrap_or_else(|| "end of input".into()),
                        position,
                    });
                }
            };
            let args = self.parse_string_args()?;
            return Ok(Expr::Helper {
                namespace: Some(name),
                name: member,
                args,
            });
        }

        // Structural combinators and builtins
        match name.as_str() {
            "all" | "any" => {
                self.check_depth(depth + 1, position)?;
                self.eat(&TokenKind::LeftParen, "`(`")?;
                let operands = self.parse_expr_list(depth + 1)?;
                self.eat(&TokenKind::RightParen, "`)`")?;
                Ok(if name == "all" {
                    Expr::And(operands)
                } else {
                    Expr::Or(operands)
                })
            }
            "not" => {
                self.check_depth(depth + 1, position)?;
                self.eat(&TokenKind::LeftParen, "`(`")?;
                let inner = self.parse_or(depth + 1)?;
                self.eat(&TokenKind::RightParen, "`)`")?;
                Ok(Expr::Not(Box::new(inner)))
            }
            "at_least" => {
                self.check_depth(depth + 1, position)?;
                self.eat(&TokenKind::LeftParen, "`(`")?;
                let needed = match self.advance() {
                    Some(Token {
                        kind: TokenKind::Number(n),
                        ..
                    }) => n,
                    other => {
                        return Err(ExprError::UnexpectedToken {
                            expected: "count",
                            found: other
                                .map(|t| describe(&t.kind))
                                .unwrap_or_else(|| "end of input".into()),
                            position,
                        });
                    }
                };
                self.eat(&TokenKind::Comma, "`,`")?;
                let operands = self.parse_expr_list(depth + 1)?;
                self.eat(&TokenKind::RightParen, "`)`")?;
                Ok(Expr::AtLeast(needed, operands))
            }
            "contains" => {
                let args = self.parse_string_args()?;
                self.expect_arity(&args, 1, position)?;
                Ok(Expr::Contains(args.into_iter().next().unwrap_or_default()))
            }
            "matches" => {
                let args = self.parse_string_args()?;
                self.expect_arity(&args, 1, position)?;
                let regex = Regex::new(&args[0])
                    .map_err(|_| ExprError::InvalidPattern { position })?;
                Ok(Expr::Matches(regex))
            }
            "has_child" => {
                let args = self.parse_string_args()?;
                self.expect_arity(&args, 1, position)?;
                Ok(Expr::HasChild(args.into_iter().next().unwrap_or_default()))
            }
            "child_contains" => {
                let mut args = self.parse_string_args()?;
                self.expect_arity(&args, 2, position)?;
                let text = args.pop().unwrap_or_default();
                let selector = args.pop().unwrap_or_default();
                Ok(Expr::ChildContains(selector, text))
            }
            "child_matches" => {
                let mut args = self.parse_string_args()?;
                self.expect_arity(&args, 2, position)?;
                let pattern = args.pop().unwrap_or_default();
                let selector = args.pop().unwrap_or_default();
                let regex = Regex::new(&pattern)
                    .map_err(|_| ExprError::InvalidPattern { position })?;
                Ok(Expr::ChildMatches(selector, regex))
            }
            // Anything else is a bare helper call resolved at evaluation.
            _ => {
                let args = self.parse_string_args()?;
                Ok(Expr::Helper {
                    namespace: None,
                    name,
                    args,
                })
            }
        }
    }

    fn parse_expr_list(&mut self, depth: usize) -> Result<Vec<Expr>, ExprError> {
        let mut operands = vec![self.parse_or(depth)?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma)) {
            self.advance();
            operands.push(self.parse_or(depth)?);
        }
        Ok(operands)
    }

    fn parse_string_args(&mut self) -> Result<Vec<String>, ExprError> {
        self.eat(&TokenKind::LeftParen, "`(`")?;
        let mut args = Vec::new();
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RightParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.eat_string()?);
            match self.advance() {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => continue,
                Some(Token {
                    kind: TokenKind::RightParen,
                    ..
                }) => break,
                other => {
                    return Err(ExprError::UnexpectedToken {
                        expected: "`,` or `)`",
                        found: other
                            .map(|t| describe(&t.kind))
                            .unwrap_or_else(|| "end of input".into()),
                        position: self.last_position(),
                    });
                }
            }
        }
        Ok(args)
    }

    fn eat_string(&mut self) -> Result<String, ExprError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::Str(value),
                ..
            }) => Ok(value),
            other => Err(ExprError::UnexpectedToken {
                expected: "string literal",
                found: other
                    .map(|t| describe(&t.kind))
                    .unwrap_or_else(|| "end of input".into()),
                position: self.last_position(),
            }),
        }
    }

    fn expect_arity(
        &self,
        args: &[String],
        arity: usize,
        position: usize,
    ) -> Result<(), ExprError> {
        if args.len() == arity {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken {
                expected: "argument list",
                found: format!("{} arguments", args.len()),
                position,
            })
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => name.clone(),
        TokenKind::Str(_) => "string".into(),
        TokenKind::Number(n) => n.to_string(),
        TokenKind::LeftParen => "(".into(),
        TokenKind::RightParen => ")".into(),
        TokenKind::Comma => ",".into(),
        TokenKind::Dot => ".".into(),
        TokenKind::AndAnd => "&&".into(),
        TokenKind::OrOr => "||".into(),
        TokenKind::Bang => "!".into(),
        TokenKind::EqEq => "==".into(),
        TokenKind::NotEq => "!=".into(),
    }
}
