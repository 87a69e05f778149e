//! Printed form of S-expressions and the sinks that receive `print` output.
//!
//! Atoms print as their names, proper lists as `(a b c)`, improper lists as
//! `(a b . c)`, and `nil` always as `nil` (never `()`). Closures have no source
//! syntax and print as `#<closure (lambda ...)>`.

use crate::ast::Value;
use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

/// One step of rendering: a value still to be printed, or fixed punctuation
enum Piece<'a> {
    Value(&'a Value),
    Text(&'static str),
}

// Nested lists are expanded onto an explicit stack, so arbitrarily deep values
// print on any thread.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending = vec![Piece::Value(self)];
        while let Some(piece) = pending.pop() {
            match piece {
                Piece::Text(text) => f.write_str(text)?,
                Piece::Value(Value::Atom(name)) => f.write_str(name)?,
                Piece::Value(Value::Closure(closure)) => {
                    f.write_str("#<closure ")?;
                    pending.push(Piece::Text(">"));
                    pending.push(Piece::Value(closure.lambda()));
                }
                Piece::Value(list @ Value::Pair(_)) => {
                    f.write_str("(")?;
                    pending.push(Piece::Text(")"));

                    let mut elements = Vec::new();
                    let mut current = list;
                    while let Value::Pair(pair) = current {
                        elements.push(pair.car());
                        current = pair.cdr();
                    }
                    if !current.is_nil() {
                        pending.push(Piece::Value(current));
                        pending.push(Piece::Text(" . "));
                    }
                    // Pushed last to first so that they pop in order
                    for (index, element) in elements.into_iter().enumerate().rev() {
                        pending.push(Piece::Value(element));
                        if index > 0 {
                            pending.push(Piece::Text(" "));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Render a value in its printed form
pub fn print_value(value: &Value) -> String {
    value.to_string()
}

/// Destination for the `print` primitive.
///
/// Sinks are shared by every worker of a parallel run, so each call must emit
/// one whole line. Ordering between lines printed by concurrently evaluated
/// operands is unspecified.
pub trait Output: Send + Sync {
    fn print_line(&self, line: &str) -> io::Result<()>;
}

/// Writes printed lines to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutOutput;

impl Output for StdoutOutput {
    fn print_line(&self, line: &str) -> io::Result<()> {
        writeln!(io::stdout().lock(), "{line}")
    }
}

/// Collects printed lines in memory
#[derive(Debug, Default)]
pub struct CaptureOutput {
    lines: Mutex<Vec<String>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines printed so far, in the order they were emitted
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Output for CaptureOutput {
    fn print_line(&self, line: &str) -> io::Result<()> {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_owned()),
            Err(poisoned) => poisoned.into_inner().push(line.to_owned()),
        }
        Ok(())
    }
}
