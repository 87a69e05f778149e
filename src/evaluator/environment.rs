//! Lexical environments.
//!
//! An environment is an immutable chain of frames shared through [`Arc`], so
//! capturing one in a closure or handing it to a worker thread is a pointer
//! copy. The only mutation anywhere is the single write that fills a `letrec`
//! frame after its values are computed; until then the frame is invisible to
//! lookup and searches fall through to the enclosing scopes.
//!
//! A `letrec` frame never holds its own closures directly. A lambda that
//! closed over the frame is stored as bare code and gets the frame back as its
//! environment when it is looked up, so the frame does not keep itself alive
//! and is freed with the last closure or evaluation that still uses it.

use crate::Error;
use crate::ast::{Closure, Lambda, Reclaimer, Value, atom, nil, t};
use crate::builtinops::get_builtin_ops;
use std::sync::{Arc, OnceLock};

/// Names that are bound to themselves in the global environment besides the
/// primitives. `list` and `prog2` are special forms but are also reachable as values.
const SELF_BOUND_NAMES: &[&str] = &["list", "prog2"];

enum Binding {
    Value(Value),
    /// A lambda created in the frame that binds it
    Recursive(Arc<Lambda>),
}

struct Bindings {
    names: Vec<Arc<str>>,
    values: Vec<Binding>,
}

impl Bindings {
    fn find(&self, name: &str) -> Option<&Binding> {
        self.names
            .iter()
            .position(|candidate| &**candidate == name)
            .map(|index| &self.values[index])
    }
}

struct Scope {
    frame: OnceLock<Bindings>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn release_into(&mut self, reclaimer: &mut Reclaimer) {
        if let Some(bindings) = self.frame.take() {
            for binding in bindings.values {
                if let Binding::Value(value) = binding {
                    reclaimer.push_value(value);
                }
            }
        }
        reclaimer.push_env(Environment {
            head: self.parent.take(),
        });
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let mut reclaimer = Reclaimer::default();
        self.release_into(&mut reclaimer);
        reclaimer.run();
    }
}

/// Environment for variable bindings
#[derive(Clone, Default)]
pub struct Environment {
    head: Option<Arc<Scope>>,
}

impl Environment {
    /// An environment with no bindings at all
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, frame: OnceLock<Bindings>) -> Self {
        Environment {
            head: Some(Arc::new(Scope {
                frame,
                parent: self.head.clone(),
            })),
        }
    }

    /// A new environment whose innermost frame binds `names` to `values` pairwise
    pub fn extend(&self, names: Vec<Arc<str>>, values: Vec<Value>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        let values = values.into_iter().map(Binding::Value).collect();
        self.push(OnceLock::from(Bindings { names, values }))
    }

    /// A new environment whose innermost frame is empty until [`Environment::fill_innermost`]
    pub fn extend_pending(&self) -> Self {
        self.push(OnceLock::new())
    }

    /// Fill the pending innermost frame. Each pending frame can be filled once.
    pub fn fill_innermost(&self, names: Vec<Arc<str>>, values: Vec<Value>) -> Result<(), Error> {
        let Some(scope) = &self.head else {
            return Err(Error::EvalError(
                "Cannot fill the frame of an empty environment".to_owned(),
            ));
        };
        let values = values
            .into_iter()
            .map(|value| match value {
                Value::Closure(closure)
                    if closure.env.head.as_ref().is_some_and(|head| Arc::ptr_eq(head, scope)) =>
                {
                    Binding::Recursive(Arc::clone(&closure.code))
                }
                other => Binding::Value(other),
            })
            .collect();
        scope
            .frame
            .set(Bindings { names, values })
            .map_err(|_| Error::EvalError("letrec frame is already filled".to_owned()))
    }

    /// Find the innermost binding of `name`. Frames that are still pending are skipped.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self.head.as_ref();
        while let Some(current) = scope {
            if let Some(bindings) = current.frame.get()
                && let Some(binding) = bindings.find(name)
            {
                return Some(match binding {
                    Binding::Value(value) => value.clone(),
                    Binding::Recursive(code) => Value::Closure(Arc::new(Closure {
                        code: Arc::clone(code),
                        env: Environment {
                            head: Some(Arc::clone(current)),
                        },
                    })),
                });
            }
            scope = current.parent.as_ref();
        }
        None
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn release_into(&mut self, reclaimer: &mut Reclaimer) {
        if let Some(scope) = self.head.take()
            && let Ok(mut scope) = Arc::try_unwrap(scope)
        {
            scope.release_into(reclaimer);
        }
    }

    /// Number of frames in the chain, pending ones included
    pub fn depth(&self) -> usize {
        let mut count = 0;
        let mut scope = self.head.as_deref();
        while let Some(current) = scope {
            count += 1;
            scope = current.parent.as_deref();
        }
        count
    }
}

/// Create the global environment: `t`, `nil`, and every primitive name bound to itself
pub fn create_global_env() -> Environment {
    let mut names: Vec<Arc<str>> = vec![Arc::from("t"), Arc::from("nil")];
    let mut values = vec![t(), nil()];

    let self_bound = SELF_BOUND_NAMES
        .iter()
        .copied()
        .chain(get_builtin_ops().iter().map(|op| op.id));
    for name in self_bound {
        names.push(Arc::from(name));
        values.push(atom(name));
    }

    Environment::new().extend(names, values)
}
