//! forklisp - a minimal Lisp evaluator with fork-join argument evaluation
//!
//! This crate reads one S-expression program, evaluates it against a small fixed
//! set of special forms and primitives, and prints the result.
//!
//! ```lisp
//! (letrec ((even (lambda (n) (if (== n 0) t (odd (- n 1)))))
//!          (odd  (lambda (n) (if (== n 0) nil (even (- n 1))))))
//!   (list (even 10) (odd 7) (2 (quote (a b c)))))
//! ;; => (t t b)
//! ```
//!
//! ## Language
//!
//! Every value is an atom (a name: symbols, decimal integers, `t` and `nil`) or a
//! pair. `nil` is the only false value. Special forms are `quote`, `list`,
//! `prog2`, `if`, `lambda` and `letrec`; everything else is an application of a
//! primitive (see [`builtinops`]) or of a closure.
//!
//! Tail positions (closure bodies, both `if` branches, the second `prog2`
//! operand and the `letrec` body) run in constant native stack.
//!
//! ## Argument evaluation
//!
//! Operands of an application are evaluated either strictly left to right or,
//! in parallel mode, as a fork-join over scoped threads bounded by a worker
//! budget. Both produce the same values in the same order; only the relative
//! order of `print` output differs. The mode is chosen once per run through
//! [`config::EvalConfig`].
//!
//! ## Modules
//!
//! - `ast`: the S-expression data model
//! - `reader`: text to S-expression
//! - `printer`: S-expression to text, and output sinks for `print`
//! - `evaluator`: environments, the trampolined evaluator and argument strategies
//! - `builtinops`: the primitive registry
//! - `config`: evaluation settings

use std::fmt;

/// Maximum list nesting accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 256;

/// Default limit on non-tail evaluation nesting
/// Tail calls do not count against it, so only genuinely nested computation is bounded
pub const DEFAULT_MAX_EVAL_DEPTH: usize = 4096;

/// Default native stack size for the evaluation thread and argument workers
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// A character that cannot start a token, or a stray closing parenthesis
    InvalidSyntax,
    /// Input ended before the expression was complete (empty input, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Extra input found after a complete expression
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 60 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 60;

        let found = input[error_offset..].chars().next().map(String::from);
        let context_start = input[..error_offset]
            .char_indices()
            .rev()
            .nth(19)
            .map_or(0, |(i, _)| i);
        let context_str: String = input[context_start..].chars().take(MAX_CONTEXT).collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        // Keep the snippet on one line
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Every way a run can fail. All of them abort the whole evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(ParseError),
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("Illegal function: {0}")]
    IllegalFunction(String),
    #[error("No such primitive: {0}")]
    NoSuchPrimitive(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error(
        "ArityError: {}expected {expected} arguments, got {got}",
        arity_context(.expression)
    )]
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    #[error("EvaluationError: {0}")]
    EvalError(String),
    /// Raised inside sibling tasks once another part of the run has failed
    #[error("Evaluation cancelled")]
    Cancelled,
}

fn arity_context(expression: &Option<String>) -> String {
    expression
        .as_ref()
        .map(|expr| format!("{expr}: "))
        .unwrap_or_default()
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError naming the offending form or primitive
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: impl Into<String>) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression.into()),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::ParseError(err)
    }
}

pub mod ast;
pub mod builtinops;
pub mod config;
pub mod evaluator;
pub mod printer;
pub mod reader;

pub use ast::Value;
pub use config::{ArgumentStrategy, EvalConfig};
pub use evaluator::{Evaluator, run_program};
pub use reader::parse_program;
