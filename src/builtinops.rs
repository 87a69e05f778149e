//! Built-in primitive registry.
//!
//! Primitives receive arguments that have already been evaluated, so nothing
//! here short-circuits (not even `and`/`or`). Every primitive is an atom bound
//! to itself in the global environment; applying that atom looks the name up
//! in this registry once and dispatches to the implementation.
//!
//! ```lisp
//! (car (quote (a b)))     ; a
//! (cons 1 nil)            ; (1)
//! (and t (quote x))       ; x
//! (== 3 3)                ; t
//! (/ -7 2)                ; -3
//! (2 (quote (a b c)))     ; b
//! ```
//!
//! ## Error Handling
//!
//! - **Arity Checking**: the argument count is checked once, against the
//!   primitive's signature, before the implementation runs
//! - **Type Safety**: arithmetic rejects non-integer atoms, `==` rejects lists,
//!   `car`/`cdr` reject anything but a pair
//! - **Overflow Detection**: arithmetic reports overflow instead of wrapping
//!
//! ## Integer Selectors
//!
//! A positive integer atom in function position is not in the registry but is
//! still a primitive: `(k list)` returns the `k`-th element (1-based).
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with one of the [`PrimitiveFn`] signatures
//! 2. **Add to BUILTIN_OPS** with its identifier
//! 3. **Add tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::{NumberType, Value, boolean, cons, parse_integer};
use crate::printer::Output;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Implementation of a primitive, by the number of arguments it takes
#[derive(Debug, Clone, Copy)]
pub enum PrimitiveFn {
    Unary(fn(&Value, &dyn Output) -> Result<Value, Error>),
    Binary(fn(&Value, &Value, &dyn Output) -> Result<Value, Error>),
}

/// Accepted operand counts for a special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    /// Validate an argument count
    pub fn validate(self, arg_count: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if arg_count != n => Err(Error::arity_error(n, arg_count)),
            _ => Ok(()),
        }
    }

    /// Like [`Arity::validate`], naming the operation in the error
    pub fn validate_for(self, name: &str, arg_count: usize) -> Result<(), Error> {
        self.validate(arg_count).map_err(|err| match err {
            Error::ArityError { expected, got, .. } => {
                Error::arity_error_with_expr(expected, got, name)
            }
            other => other,
        })
    }
}

/// Definition of a built-in primitive
#[derive(Debug)]
pub struct BuiltinOp {
    /// The atom name that selects this primitive
    pub id: &'static str,
    pub func: PrimitiveFn,
}

impl BuiltinOp {
    /// Number of arguments the primitive takes
    pub fn param_count(&self) -> usize {
        match self.func {
            PrimitiveFn::Unary(_) => 1,
            PrimitiveFn::Binary(_) => 2,
        }
    }

    /// Check the argument count, then run the implementation
    pub fn apply(&self, args: &[Value], output: &dyn Output) -> Result<Value, Error> {
        match (self.func, args) {
            (PrimitiveFn::Unary(func), [arg]) => func(arg, output),
            (PrimitiveFn::Binary(func), [left, right]) => func(left, right, output),
            _ => Err(Error::arity_error_with_expr(
                self.param_count(),
                args.len(),
                self.id,
            )),
        }
    }
}

//
// Builtin Function Implementations
//

fn integer_operand(name: &str, value: &Value) -> Result<NumberType, Error> {
    value
        .as_integer()
        .ok_or_else(|| Error::TypeError(format!("{name} requires integer arguments, got {value}")))
}

macro_rules! checked_arithmetic {
    ($name:ident, $op_str:expr, $checked:ident, $what:expr) => {
        fn $name(a: &Value, b: &Value, _output: &dyn Output) -> Result<Value, Error> {
            let a = integer_operand($op_str, a)?;
            let b = integer_operand($op_str, b)?;
            a.$checked(b)
                .map(Value::from)
                .ok_or_else(|| Error::EvalError(concat!("Integer overflow in ", $what).into()))
        }
    };
}

checked_arithmetic!(builtin_add, "+", checked_add, "addition");
checked_arithmetic!(builtin_sub, "-", checked_sub, "subtraction");
checked_arithmetic!(builtin_mul, "*", checked_mul, "multiplication");

// Truncates toward zero
fn builtin_div(a: &Value, b: &Value, _output: &dyn Output) -> Result<Value, Error> {
    let a = integer_operand("/", a)?;
    let b = integer_operand("/", b)?;
    if b == 0 {
        return Err(Error::DivisionByZero);
    }
    a.checked_div(b)
        .map(Value::from)
        .ok_or_else(|| Error::EvalError("Integer overflow in division".into()))
}

macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(a: &Value, b: &Value, _output: &dyn Output) -> Result<Value, Error> {
            Ok(boolean(integer_operand($op_str, a)? $op integer_operand($op_str, b)?))
        }
    };
}

numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");

fn builtin_car(value: &Value, _output: &dyn Output) -> Result<Value, Error> {
    match value {
        Value::Pair(pair) => Ok(pair.car().clone()),
        other => Err(Error::TypeError(format!("car requires a pair, got {other}"))),
    }
}

fn builtin_cdr(value: &Value, _output: &dyn Output) -> Result<Value, Error> {
    match value {
        Value::Pair(pair) => Ok(pair.cdr().clone()),
        other => Err(Error::TypeError(format!("cdr requires a pair, got {other}"))),
    }
}

fn builtin_cons(car: &Value, cdr: &Value, _output: &dyn Output) -> Result<Value, Error> {
    Ok(cons(car.clone(), cdr.clone()))
}

fn builtin_atom(value: &Value, _output: &dyn Output) -> Result<Value, Error> {
    Ok(boolean(value.is_atom()))
}

// `not` shares this implementation
fn builtin_null(value: &Value, _output: &dyn Output) -> Result<Value, Error> {
    Ok(boolean(value.is_nil()))
}

fn builtin_and(first: &Value, second: &Value, _output: &dyn Output) -> Result<Value, Error> {
    Ok(if first.is_truthy() {
        second.clone()
    } else {
        first.clone()
    })
}

fn builtin_or(first: &Value, second: &Value, _output: &dyn Output) -> Result<Value, Error> {
    Ok(if first.is_truthy() {
        first.clone()
    } else {
        second.clone()
    })
}

fn builtin_equal(a: &Value, b: &Value, _output: &dyn Output) -> Result<Value, Error> {
    match (a, b) {
        (Value::Atom(a), Value::Atom(b)) => Ok(boolean(a == b)),
        _ => Err(Error::TypeError(format!(
            "== requires atoms, got {a} and {b}"
        ))),
    }
}

fn builtin_print(value: &Value, output: &dyn Output) -> Result<Value, Error> {
    output
        .print_line(&value.to_string())
        .map_err(|e| Error::EvalError(format!("print failed: {e}")))?;
    Ok(value.clone())
}

/// `(k list)`: the k-th element of a proper or improper list, counting from 1
fn select_element(index: NumberType, args: &[Value]) -> Result<Value, Error> {
    let [list] = args else {
        return Err(Error::arity_error_with_expr(1, args.len(), index.to_string()));
    };

    let mut current = list;
    let mut remaining = index;
    loop {
        match current {
            Value::Pair(pair) if remaining == 1 => return Ok(pair.car().clone()),
            Value::Pair(pair) => {
                current = pair.cdr();
                remaining -= 1;
            }
            _ if current.is_nil() => {
                return Err(Error::EvalError(format!(
                    "Selector {index} is past the end of {list}"
                )));
            }
            other => {
                return Err(Error::TypeError(format!(
                    "Selector {index} requires a list, found {other}"
                )));
            }
        }
    }
}

/// Global registry of all built-in primitives
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    vec![
        // List structure
        BuiltinOp {
            id: "car",
            func: PrimitiveFn::Unary(builtin_car),
        },
        BuiltinOp {
            id: "cdr",
            func: PrimitiveFn::Unary(builtin_cdr),
        },
        BuiltinOp {
            id: "cons",
            func: PrimitiveFn::Binary(builtin_cons),
        },
        // Predicates
        BuiltinOp {
            id: "atom",
            func: PrimitiveFn::Unary(builtin_atom),
        },
        BuiltinOp {
            id: "null",
            func: PrimitiveFn::Unary(builtin_null),
        },
        BuiltinOp {
            id: "not",
            func: PrimitiveFn::Unary(builtin_null),
        },
        BuiltinOp {
            id: "==",
            func: PrimitiveFn::Binary(builtin_equal),
        },
        // Logic
        BuiltinOp {
            id: "and",
            func: PrimitiveFn::Binary(builtin_and),
        },
        BuiltinOp {
            id: "or",
            func: PrimitiveFn::Binary(builtin_or),
        },
        // Arithmetic
        BuiltinOp {
            id: "+",
            func: PrimitiveFn::Binary(builtin_add),
        },
        BuiltinOp {
            id: "-",
            func: PrimitiveFn::Binary(builtin_sub),
        },
        BuiltinOp {
            id: "*",
            func: PrimitiveFn::Binary(builtin_mul),
        },
        BuiltinOp {
            id: "/",
            func: PrimitiveFn::Binary(builtin_div),
        },
        BuiltinOp {
            id: "<",
            func: PrimitiveFn::Binary(builtin_lt),
        },
        BuiltinOp {
            id: ">",
            func: PrimitiveFn::Binary(builtin_gt),
        },
        // Output
        BuiltinOp {
            id: "print",
            func: PrimitiveFn::Unary(builtin_print),
        },
    ]
});

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin primitives
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin primitive by name
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

/// Apply the primitive named by an atom in function position
pub fn apply_primitive(name: &str, args: &[Value], output: &dyn Output) -> Result<Value, Error> {
    if let Some(op) = find_builtin_op(name) {
        return op.apply(args, output);
    }
    match parse_integer(name) {
        Some(index) if index > 0 => select_element(index, args),
        _ => Err(Error::NoSuchPrimitive(name.to_owned())),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, t, val};
    use crate::printer::CaptureOutput;

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        apply_primitive(name, args, &CaptureOutput::new())
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_builtin_op("not").unwrap();
        assert_eq!(not_op.param_count(), 1);

        let add_op = find_builtin_op("+").unwrap();
        assert_eq!(add_op.param_count(), 2);
        let result = add_op.apply(&[val(1), val(2)], &CaptureOutput::new()).unwrap();
        assert_eq!(result, val(3));

        let all_ops = get_builtin_ops();
        assert_eq!(all_ops.len(), 16);
        for op in all_ops {
            assert!(std::ptr::eq(find_builtin_op(op.id).unwrap(), op));
        }

        // Special forms and selectors are not registry entries
        assert!(find_builtin_op("quote").is_none());
        assert!(find_builtin_op("list").is_none());
        assert!(find_builtin_op("2").is_none());
        assert!(find_builtin_op("unknown").is_none());
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let abc = val([sym("a"), sym("b"), sym("c")]);
        let dotted = cons(sym("a"), sym("b"));

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[val(2), val(3)], success(5)),
            test!("+", &[val(-2), val(2)], success(0)),
            test!("-", &[val(5), val(2)], success(3)),
            test!("-", &[val(2), val(5)], success(-3)),
            test!("*", &[val(2), val(3)], success(6)),
            test!("*", &[val(-4), val(0)], success(0)),
            test!("/", &[val(7), val(2)], success(3)),
            test!("/", &[val(-7), val(2)], success(-3)),
            test!("/", &[val(7), val(-2)], success(-3)),
            test!("/", &[val(1), val(0)], None),
            // Leading plus sign is accepted, result is canonical
            test!("+", &[sym("+4"), val(1)], success(5)),
            // Overflow
            test!("+", &[val(NumberType::MAX), val(1)], None),
            test!("-", &[val(NumberType::MIN), val(1)], None),
            test!("*", &[val(NumberType::MAX), val(2)], None),
            test!("/", &[val(NumberType::MIN), val(-1)], None),
            // Non-integer operands
            test!("+", &[sym("x"), val(1)], None),
            test!("+", &[val(1), val([1])], None),
            test!("*", &[nil(), val(1)], None),
            // Arity
            test!("+", &[val(1)], None),
            test!("+", &[val(1), val(2), val(3)], None),
            // =================================================================
            // COMPARISON
            // =================================================================
            test!("<", &[val(1), val(2)], success(true)),
            test!("<", &[val(2), val(1)], success(false)),
            test!("<", &[val(2), val(2)], success(false)),
            test!(">", &[val(3), val(-3)], success(true)),
            test!(">", &[val(-3), val(3)], success(false)),
            test!("<", &[sym("a"), val(1)], None),
            test!("==", &[val(3), val(3)], success(true)),
            test!("==", &[val(3), val(4)], success(false)),
            test!("==", &[sym("a"), sym("a")], success(true)),
            test!("==", &[nil(), sym("nil")], success(true)),
            // Names are compared, not numeric values
            test!("==", &[sym("+3"), val(3)], success(false)),
            test!("==", &[val([1]), val([1])], None),
            test!("==", &[sym("a"), val([1])], None),
            // =================================================================
            // LIST STRUCTURE
            // =================================================================
            test!("car", &[abc.clone()], success(sym("a"))),
            test!("cdr", &[abc.clone()], success([sym("b"), sym("c")])),
            test!("cdr", &[val([1])], success(nil())),
            test!("cdr", &[dotted.clone()], success(sym("b"))),
            test!("car", &[nil()], None),
            test!("cdr", &[sym("x")], None),
            test!("car", &[], None),
            test!("cons", &[val(1), nil()], success([1])),
            test!("cons", &[val(1), val([2, 3])], success([1, 2, 3])),
            test!("cons", &[sym("a"), sym("b")], Some(dotted.clone())),
            // =================================================================
            // PREDICATES AND LOGIC
            // =================================================================
            test!("atom", &[sym("x")], success(true)),
            test!("atom", &[nil()], success(true)),
            test!("atom", &[val([1])], success(false)),
            test!("null", &[nil()], success(true)),
            test!("null", &[val(0)], success(false)),
            test!("null", &[val([nil()])], success(false)),
            test!("not", &[nil()], success(true)),
            test!("not", &[t()], success(false)),
            test!("and", &[nil(), sym("x")], success(nil())),
            test!("and", &[t(), sym("x")], success(sym("x"))),
            test!("and", &[val(1), nil()], success(nil())),
            test!("or", &[val(1), sym("x")], success(1)),
            test!("or", &[nil(), sym("x")], success(sym("x"))),
            test!("or", &[nil(), nil()], success(nil())),
            test!("and", &[t()], None),
            // =================================================================
            // SELECTORS
            // =================================================================
            test!("1", &[abc.clone()], success(sym("a"))),
            test!("2", &[abc.clone()], success(sym("b"))),
            test!("3", &[abc.clone()], success(sym("c"))),
            test!("4", &[abc.clone()], None),
            test!("2", &[dotted.clone()], None),
            test!("1", &[sym("x")], None),
            test!("1", &[nil()], None),
            test!("2", &[abc.clone(), abc.clone()], None),
            // =================================================================
            // UNKNOWN NAMES
            // =================================================================
            test!("0", &[abc.clone()], None),
            test!("-1", &[abc.clone()], None),
            test!("frobnicate", &[], None),
            test!("list", &[val(1)], None),
            test!("quote", &[val(1)], None),
        ];

        for (i, (name, result, expected)) in test_cases.into_iter().enumerate() {
            match (result, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "Test #{} ({name}): value mismatch", i + 1);
                }
                (Err(_), None) => {}
                (Ok(actual), None) => {
                    panic!("Test #{} ({name}): expected error, got {actual:?}", i + 1)
                }
                (Err(err), Some(expected)) => {
                    panic!(
                        "Test #{} ({name}): expected {expected:?}, got error {err:?}",
                        i + 1
                    )
                }
            }
        }
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            call_builtin("/", &[val(1), val(0)]),
            Err(Error::DivisionByZero)
        );
        assert_eq!(
            call_builtin("mystery", &[]),
            Err(Error::NoSuchPrimitive("mystery".into()))
        );
        assert!(matches!(
            call_builtin("==", &[val([1]), val([1])]),
            Err(Error::TypeError(_))
        ));
        assert!(matches!(
            call_builtin("car", &[sym("x")]),
            Err(Error::TypeError(_))
        ));
        assert!(matches!(
            call_builtin("+", &[val(NumberType::MAX), val(1)]),
            Err(Error::EvalError(msg)) if msg.contains("overflow")
        ));
        match call_builtin("cons", &[val(1)]) {
            Err(Error::ArityError {
                expected,
                got,
                expression,
            }) => {
                assert_eq!((expected, got), (2, 1));
                assert_eq!(expression.as_deref(), Some("cons"));
            }
            other => panic!("expected ArityError, got {other:?}"),
        }
        let message = call_builtin("9", &[val([1, 2])]).unwrap_err().to_string();
        assert!(message.contains("past the end"), "{message}");
    }

    #[test]
    fn test_print_writes_to_output() {
        let output = CaptureOutput::new();
        let printed = apply_primitive("print", &[val([1, 2])], &output).unwrap();
        assert_eq!(printed, val([1, 2]));
        apply_primitive("print", &[nil()], &output).unwrap();
        assert_eq!(output.lines(), vec!["(1 2)", "nil"]);
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        Exact(2).validate(2).unwrap();
        Exact(2).validate(1).unwrap_err();
        Exact(2).validate(3).unwrap_err();

        Any.validate(0).unwrap();
        Any.validate(100).unwrap();

        match Exact(2).validate_for("if", 1).unwrap_err() {
            Error::ArityError {
                expected,
                got,
                expression,
            } => {
                assert_eq!(expected, 2);
                assert_eq!(got, 1);
                assert_eq!(expression.as_deref(), Some("if"));
            }
            _ => panic!("Expected ArityError"),
        }
    }

    #[test]
    fn test_every_primitive_rejects_wrong_argument_counts() {
        let output = CaptureOutput::new();
        for op in get_builtin_ops() {
            let expected = op.param_count();
            for got in [0, expected - 1, expected + 1] {
                if got == expected {
                    continue;
                }
                match op.apply(&vec![val(1); got], &output) {
                    Err(Error::ArityError {
                        expected: reported,
                        got: reported_got,
                        expression,
                    }) => {
                        assert_eq!((reported, reported_got), (expected, got), "{}", op.id);
                        assert_eq!(expression.as_deref(), Some(op.id));
                    }
                    other => panic!("{} with {got} arguments: expected ArityError, got {other:?}", op.id),
                }
            }
        }
        assert!(output.lines().is_empty());
    }

    struct ClosedOutput;

    impl Output for ClosedOutput {
        fn print_line(&self, _line: &str) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout closed"))
        }
    }

    #[test]
    fn test_print_reports_write_failure() {
        match apply_primitive("print", &[sym("hello")], &ClosedOutput) {
            Err(Error::EvalError(msg)) => {
                assert!(msg.contains("print failed"), "{msg}");
                assert!(msg.contains("stdout closed"), "{msg}");
            }
            other => panic!("expected EvalError, got {other:?}"),
        }
    }
}
