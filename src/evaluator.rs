//! The evaluator: a trampoline over (expression, environment) states.
//!
//! Every special-form handler and every closure application either finishes
//! with a value or hands back the next state to evaluate. Only non-tail
//! positions (operands, an `if` test, the first `prog2` operand, `letrec`
//! values) recurse, and each such recursion counts against
//! [`EvalConfig::max_depth`], so deep non-tail recursion fails with an error
//! instead of exhausting the native stack.

pub mod environment;
mod evlis;

use crate::Error;
use crate::ast::{Closure, Lambda, Value, parse_integer};
use crate::builtinops::{Arity, apply_primitive};
use crate::config::EvalConfig;
use crate::printer::Output;
use crate::reader::parse_program;
use evlis::WorkerBudget;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;
use tracing::debug;

pub use environment::{Environment, create_global_env};

/// Outcome of one trampoline step
enum Step {
    Done(Value),
    Continue(Value, Environment),
}

/// Special form handler: the whole form, its unevaluated operands, the
/// environment and the current depth
type SpecialFormFn = fn(&Evaluator, &Value, &[Value], &Environment, usize) -> Result<Step, Error>;

struct SpecialForm {
    id: &'static str,
    arity: Arity,
    handler: SpecialFormFn,
}

/// Special forms are recognized by the head atom's name before any lookup,
/// so no binding can shadow them.
static SPECIAL_FORMS: LazyLock<HashMap<&'static str, SpecialForm>> = LazyLock::new(|| {
    [
        SpecialForm {
            id: "quote",
            arity: Arity::Exact(1),
            handler: eval_quote,
        },
        SpecialForm {
            id: "list",
            arity: Arity::Any,
            handler: eval_list,
        },
        SpecialForm {
            id: "prog2",
            arity: Arity::Exact(2),
            handler: eval_prog2,
        },
        SpecialForm {
            id: "if",
            arity: Arity::Exact(3),
            handler: eval_if,
        },
        SpecialForm {
            id: "lambda",
            arity: Arity::Exact(2),
            handler: eval_lambda,
        },
        SpecialForm {
            id: "letrec",
            arity: Arity::Exact(2),
            handler: eval_letrec,
        },
    ]
    .into_iter()
    .map(|form| (form.id, form))
    .collect()
});

fn find_special_form(name: &str) -> Option<&'static SpecialForm> {
    SPECIAL_FORMS.get(name)
}

/// Evaluates expressions under one [`EvalConfig`].
///
/// The worker budget and the cancellation flag are shared by everything the
/// evaluator runs, including forked argument workers. Concurrent calls to
/// [`Evaluator::eval`] on one instance share them too, so use one evaluator per run.
pub struct Evaluator {
    config: EvalConfig,
    output: Arc<dyn Output>,
    workers: WorkerBudget,
    cancelled: AtomicBool,
}

impl Evaluator {
    pub fn new(config: EvalConfig, output: Arc<dyn Output>) -> Self {
        Evaluator {
            workers: WorkerBudget::new(config.max_workers),
            config,
            output,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate an expression (public API)
    pub fn eval(&self, expr: &Value, env: &Environment) -> Result<Value, Error> {
        self.cancelled.store(false, Ordering::Release);
        self.eval_at(expr, env, 0)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Raise the cancellation flag so that sibling operands stop early
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("evaluation failed, cancelling outstanding operands");
        }
    }

    /// Evaluate with depth tracking to prevent stack overflow
    pub(crate) fn eval_at(
        &self,
        expr: &Value,
        env: &Environment,
        depth: usize,
    ) -> Result<Value, Error> {
        if depth >= self.config.max_depth {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.config.max_depth
            )));
        }

        let mut expr = expr.clone();
        let mut env = env.clone();
        loop {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let step = match &expr {
                // Integers evaluate to themselves, every other atom is a variable
                Value::Atom(name) => {
                    return if parse_integer(name).is_some() {
                        Ok(expr.clone())
                    } else {
                        env.lookup(name)
                            .ok_or_else(|| Error::UnboundVariable(name.to_string()))
                    };
                }
                Value::Closure(_) => return Ok(expr.clone()),
                Value::Pair(pair) => {
                    let elements = expr.list_to_vec()?;
                    match pair.car().as_atom().and_then(find_special_form) {
                        Some(form) => {
                            let operands = &elements[1..];
                            form.arity.validate_for(form.id, operands.len())?;
                            (form.handler)(self, &expr, operands, &env, depth)?
                        }
                        None => self.apply(&elements, &env, depth)?,
                    }
                }
            };

            match step {
                Step::Done(value) => return Ok(value),
                Step::Continue(next_expr, next_env) => {
                    expr = next_expr;
                    env = next_env;
                }
            }
        }
    }

    /// Function application: evaluate head and operands, then dispatch on the head value
    fn apply(&self, elements: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
        let mut values = self.evlis(elements, env, depth)?.into_iter();
        let Some(function) = values.next() else {
            return Err(Error::EvalError("Cannot apply an empty list".to_owned()));
        };
        let args: Vec<Value> = values.collect();

        match function {
            Value::Atom(name) => apply_primitive(&name, &args, &*self.output).map(Step::Done),
            Value::Closure(closure) => {
                let code = &closure.code;
                if code.params.len() != args.len() {
                    return Err(Error::arity_error_with_expr(
                        code.params.len(),
                        args.len(),
                        code.lambda.to_string(),
                    ));
                }
                let body_env = closure.env.extend(code.params.clone(), args);
                Ok(Step::Continue(code.body.clone(), body_env))
            }
            pair @ Value::Pair(_) => Err(Error::IllegalFunction(pair.to_string())),
        }
    }
}

/// Evaluate quote special form
fn eval_quote(
    _evaluator: &Evaluator,
    _form: &Value,
    operands: &[Value],
    _env: &Environment,
    _depth: usize,
) -> Result<Step, Error> {
    match operands {
        [datum] => Ok(Step::Done(datum.clone())),
        _ => Err(Error::arity_error_with_expr(1, operands.len(), "quote")),
    }
}

/// Evaluate list special form: every operand through the argument strategy
fn eval_list(
    evaluator: &Evaluator,
    _form: &Value,
    operands: &[Value],
    env: &Environment,
    depth: usize,
) -> Result<Step, Error> {
    let values = evaluator.evlis(operands, env, depth)?;
    Ok(Step::Done(Value::list(values)))
}

/// Evaluate prog2 special form: the first operand for effect, the second in tail position
fn eval_prog2(
    evaluator: &Evaluator,
    _form: &Value,
    operands: &[Value],
    env: &Environment,
    depth: usize,
) -> Result<Step, Error> {
    match operands {
        [first, second] => {
            evaluator.eval_at(first, env, depth + 1)?;
            Ok(Step::Continue(second.clone(), env.clone()))
        }
        _ => Err(Error::arity_error_with_expr(2, operands.len(), "prog2")),
    }
}

/// Evaluate if special form. Only `nil` is false.
fn eval_if(
    evaluator: &Evaluator,
    _form: &Value,
    operands: &[Value],
    env: &Environment,
    depth: usize,
) -> Result<Step, Error> {
    match operands {
        [condition_expr, then_expr, else_expr] => {
            let condition = evaluator.eval_at(condition_expr, env, depth + 1)?;
            let branch = if condition.is_truthy() {
                then_expr
            } else {
                else_expr
            };
            Ok(Step::Continue(branch.clone(), env.clone()))
        }
        _ => Err(Error::arity_error_with_expr(3, operands.len(), "if")),
    }
}

/// Evaluate lambda special form
fn eval_lambda(
    _evaluator: &Evaluator,
    form: &Value,
    operands: &[Value],
    env: &Environment,
    _depth: usize,
) -> Result<Step, Error> {
    let [formals, body] = operands else {
        return Err(Error::arity_error_with_expr(2, operands.len(), "lambda"));
    };

    let formals = formals
        .list_to_vec()
        .map_err(|_| Error::TypeError(format!("lambda formals must be a list, got {formals}")))?;
    let params = formals
        .iter()
        .map(|formal| match formal {
            Value::Atom(name) => Ok(Arc::clone(name)),
            other => Err(Error::TypeError(format!(
                "lambda formals must be atoms, got {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Step::Done(Value::Closure(Arc::new(Closure {
        code: Arc::new(Lambda {
            lambda: form.clone(),
            params,
            body: body.clone(),
        }),
        env: env.clone(),
    }))))
}

/// Evaluate letrec special form.
///
/// The new frame is pushed before any value is computed, so lambdas among the
/// values capture it. It is filled once all values are known. Bindings are
/// stored in reverse declaration order, so with duplicate names the later
/// declaration is the one that is found.
fn eval_letrec(
    evaluator: &Evaluator,
    _form: &Value,
    operands: &[Value],
    env: &Environment,
    depth: usize,
) -> Result<Step, Error> {
    let [bindings, body] = operands else {
        return Err(Error::arity_error_with_expr(2, operands.len(), "letrec"));
    };

    let bindings = bindings
        .list_to_vec()
        .map_err(|_| Error::TypeError(format!("letrec bindings must be a list, got {bindings}")))?;

    let extended = env.extend_pending();
    let mut names = Vec::with_capacity(bindings.len());
    let mut values = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        let (name, value_expr) = match binding.list_to_vec().as_deref() {
            Ok([Value::Atom(name), value_expr]) => (Arc::clone(name), value_expr.clone()),
            _ => {
                return Err(Error::TypeError(format!(
                    "letrec binding must be (name expression), got {binding}"
                )));
            }
        };
        values.push(evaluator.eval_at(&value_expr, &extended, depth + 1)?);
        names.push(name);
    }

    names.reverse();
    values.reverse();
    let count = names.len();
    extended.fill_innermost(names, values)?;
    debug!(bindings = count, "letrec frame filled");

    Ok(Step::Continue(body.clone(), extended))
}

/// Parse and evaluate a whole program in a fresh global environment.
///
/// Evaluation runs on its own thread with [`EvalConfig::stack_size`] of stack
/// so that the depth limit, not the caller's stack, bounds recursion.
pub fn run_program(
    source: &str,
    config: &EvalConfig,
    output: Arc<dyn Output>,
) -> Result<Value, Error> {
    let program = parse_program(source)?;
    let evaluator = Evaluator::new(config.clone(), output);
    let env = create_global_env();

    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("forklisp-eval".to_owned())
            .stack_size(config.stack_size)
            .spawn_scoped(scope, || evaluator.eval(&program, &env))
            .map_err(|err| Error::EvalError(format!("Cannot start evaluation thread: {err}")))?;
        handle
            .join()
            .map_err(|_| Error::EvalError("Evaluation thread panicked".to_owned()))?
    })
}
