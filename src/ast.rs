//! This module defines the S-expression data model shared by the reader, the
//! evaluator and the printer. The main enum, [`Value`], is either an atom (an
//! immutable name), a pair, or a closure produced by `lambda`. All payloads are
//! reference counted with [`Arc`] so that trees can be shared freely between the
//! threads of a parallel run; nothing here is ever mutated after construction.
//!
//! Ergonomic helpers such as [`atom`], [`cons`], [`nil`] and the `From`
//! conversions make it easy to build expected values in code and tests:
//! `val([1, 2, 3])` is the list `(1 2 3)` and `val(vec![sym("a"), val(2)])` is
//! `(a 2)`.

use crate::Error;
use crate::evaluator::environment::Environment;
use std::sync::{Arc, LazyLock};

/// Type alias for integer values computed by primitives
pub(crate) type NumberType = i64;

/// Non-alphanumeric characters that may appear in atom names
pub(crate) const ATOM_SPECIAL_CHARS: &str = "+-*/=><";

/// Check whether a character may appear in an atom name
pub(crate) fn is_atom_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ATOM_SPECIAL_CHARS.contains(c)
}

/// Interpret an atom name as a base-10 integer, if it is one
pub(crate) fn parse_integer(name: &str) -> Option<NumberType> {
    name.parse::<NumberType>().ok()
}

static NIL: LazyLock<Value> = LazyLock::new(|| Value::Atom(Arc::from("nil")));
static T: LazyLock<Value> = LazyLock::new(|| Value::Atom(Arc::from("t")));

/// The two halves of a cons cell
pub struct Pair {
    car: Value,
    cdr: Value,
}

impl Pair {
    pub fn car(&self) -> &Value {
        &self.car
    }

    pub fn cdr(&self) -> &Value {
        &self.cdr
    }

    fn release_into(&mut self, reclaimer: &mut Reclaimer) {
        reclaimer.push_value(std::mem::replace(&mut self.car, nil()));
        reclaimer.push_value(std::mem::replace(&mut self.cdr, nil()));
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        let mut reclaimer = Reclaimer::default();
        self.release_into(&mut reclaimer);
        reclaimer.run();
    }
}

/// The code of a `lambda`: everything a closure holds except its environment
pub struct Lambda {
    /// The whole `(lambda (formals...) body)` expression, kept for printing
    pub(crate) lambda: Value,
    pub(crate) params: Vec<Arc<str>>,
    pub(crate) body: Value,
}

/// A `lambda` expression together with the environment it was created in
pub struct Closure {
    pub(crate) code: Arc<Lambda>,
    pub(crate) env: Environment,
}

impl Closure {
    pub fn lambda(&self) -> &Value {
        &self.code.lambda
    }

    pub fn params(&self) -> &[Arc<str>] {
        &self.code.params
    }

    pub fn body(&self) -> &Value {
        &self.code.body
    }
}

impl Drop for Closure {
    fn drop(&mut self) {
        let mut reclaimer = Reclaimer::default();
        reclaimer.push_env(std::mem::take(&mut self.env));
        reclaimer.run();
    }
}

/// Worklist that releases nested pairs, closures and environments without
/// recursing once per nesting level.
///
/// Each `Drop` impl moves its children in here instead of letting them drop in
/// place. Only children whose last reference is being released are opened up;
/// shared ones just lose a count.
#[derive(Default)]
pub(crate) struct Reclaimer {
    values: Vec<Value>,
    envs: Vec<Environment>,
}

impl Reclaimer {
    pub(crate) fn push_value(&mut self, value: Value) {
        if !value.is_atom() {
            self.values.push(value);
        }
    }

    pub(crate) fn push_env(&mut self, env: Environment) {
        if !env.is_empty() {
            self.envs.push(env);
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            if let Some(value) = self.values.pop() {
                match value {
                    Value::Atom(_) => {}
                    Value::Pair(pair) => {
                        if let Ok(mut pair) = Arc::try_unwrap(pair) {
                            pair.release_into(&mut self);
                        }
                    }
                    Value::Closure(closure) => {
                        if let Ok(mut closure) = Arc::try_unwrap(closure) {
                            self.push_env(std::mem::take(&mut closure.env));
                        }
                    }
                }
            } else if let Some(mut env) = self.envs.pop() {
                env.release_into(&mut self);
            } else {
                return;
            }
        }
    }
}

/// Core S-expression type
///
/// Atoms hold names only: `42`, `foo`, `nil` and `t` are all atoms, and integers
/// are recovered from their decimal names when a primitive needs them.
#[derive(Clone)]
pub enum Value {
    /// Leaf holding an immutable name
    Atom(Arc<str>),
    /// Cons cell; lists are chains of pairs ending in `nil`
    Pair(Arc<Pair>),
    /// Function value created by `lambda`. Not an atom.
    Closure(Arc<Closure>),
}

impl Value {
    /// The atom's name, or `None` for pairs and closures
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Value::Atom(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    pub fn is_atom(&self) -> bool {
        matches!(self, Value::Atom(_))
    }

    /// `nil` is any atom named exactly "nil"
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Atom(name) if &**name == "nil")
    }

    /// Everything except `nil` counts as true
    pub fn is_truthy(&self) -> bool {
        !self.is_nil()
    }

    /// The integer this atom spells, if any
    pub fn as_integer(&self) -> Option<NumberType> {
        self.as_atom().and_then(parse_integer)
    }

    /// Collect the elements of a proper list. `nil` gives an empty vector.
    pub fn list_to_vec(&self) -> Result<Vec<Value>, Error> {
        let mut elements = Vec::new();
        let mut current = self;
        loop {
            match current {
                Value::Pair(pair) => {
                    elements.push(pair.car.clone());
                    current = &pair.cdr;
                }
                _ if current.is_nil() => return Ok(elements),
                other => {
                    return Err(Error::TypeError(format!(
                        "expected a proper list, found tail {other}"
                    )));
                }
            }
        }
    }

    /// Build a proper list from its elements
    pub fn list<I>(elements: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        elements
            .into_iter()
            .rev()
            .fold(nil(), |tail, head| cons(head, tail))
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Atom(name) => write!(f, "Atom({name})"),
            Value::Pair(_) => write!(f, "List({self})"),
            Value::Closure(closure) => write!(f, "Closure({})", closure.lambda()),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality for atoms and pairs; closures compare by identity
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            match (left, right) {
                (Value::Atom(a), Value::Atom(b)) if a == b => {}
                (Value::Pair(a), Value::Pair(b)) => {
                    if !Arc::ptr_eq(a, b) {
                        pending.push((&a.cdr, &b.cdr));
                        pending.push((&a.car, &b.car));
                    }
                }
                (Value::Closure(a), Value::Closure(b)) if Arc::ptr_eq(a, b) => {}
                _ => return false,
            }
        }
        true
    }
}

impl Eq for Value {}

// From trait implementations for Value - enables .into() conversion

impl From<&str> for Value {
    fn from(name: &str) -> Self {
        atom(name)
    }
}

impl From<String> for Value {
    fn from(name: String) -> Self {
        Value::Atom(Arc::from(name))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        if b { t() } else { nil() }
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Atom(Arc::from(n.to_string()))
            }
        }
    };
}

impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u32);
impl_from_integer!(usize);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

/// Create an atom with the given name
pub fn atom<S: AsRef<str>>(name: S) -> Value {
    match name.as_ref() {
        "nil" => nil(),
        "t" => t(),
        other => Value::Atom(Arc::from(other)),
    }
}

/// The false value, which doubles as the empty list
pub fn nil() -> Value {
    NIL.clone()
}

/// The canonical true value
pub fn t() -> Value {
    T.clone()
}

pub fn cons(car: Value, cdr: Value) -> Value {
    Value::Pair(Arc::new(Pair { car, cdr }))
}

/// `t` for true, `nil` for false
pub fn boolean(b: bool) -> Value {
    b.into()
}

/// Helper for building values in tests: anything convertible into a Value
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper for symbols in mixed lists
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    atom(name)
}
