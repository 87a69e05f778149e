//! Operand evaluation for applications and the `list` form.
//!
//! The sequential strategy evaluates left to right. The parallel strategy is a
//! fork-join: every operand after the first that is not an atom gets its own
//! scoped worker thread (while the run-wide [`WorkerBudget`] allows), the first
//! operand is evaluated on the current thread, and results are joined back in
//! operand order. Operands that could not be forked are evaluated inline after
//! the first one, so the values and their order never depend on the budget.

use super::Evaluator;
use super::environment::Environment;
use crate::Error;
use crate::ast::Value;
use crate::config::ArgumentStrategy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ScopedJoinHandle};
use tracing::{trace, warn};

/// Upper bound on argument worker threads alive at the same time
#[derive(Debug)]
pub(crate) struct WorkerBudget {
    live: AtomicUsize,
    limit: usize,
}

impl WorkerBudget {
    pub(crate) fn new(limit: usize) -> Self {
        WorkerBudget {
            live: AtomicUsize::new(0),
            limit,
        }
    }

    /// Reserve one worker slot, or `None` when the budget is exhausted
    pub(crate) fn try_acquire(&self) -> Option<WorkerPermit<'_>> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.limit).then_some(live + 1)
            })
            .ok()
            .map(|_| WorkerPermit { budget: self })
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// A reserved worker slot, released on drop
#[derive(Debug)]
pub(crate) struct WorkerPermit<'a> {
    budget: &'a WorkerBudget,
}

impl Drop for WorkerPermit<'_> {
    fn drop(&mut self) {
        self.budget.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Where the value of one operand will come from
enum Slot<'scope, 'a> {
    Forked(ScopedJoinHandle<'scope, Result<Value, Error>>),
    Inline(&'a Value),
    Done(Result<Value, Error>),
}

impl Evaluator {
    /// Evaluate every operand with the configured strategy, results in operand order
    pub(crate) fn evlis(
        &self,
        operands: &[Value],
        env: &Environment,
        depth: usize,
    ) -> Result<Vec<Value>, Error> {
        match self.config.strategy {
            ArgumentStrategy::Sequential => operands
                .iter()
                .map(|operand| self.eval_at(operand, env, depth + 1))
                .collect(),
            ArgumentStrategy::Parallel => self.evlis_parallel(operands, env, depth),
        }
    }

    fn evlis_parallel(
        &self,
        operands: &[Value],
        env: &Environment,
        depth: usize,
    ) -> Result<Vec<Value>, Error> {
        let Some((first, rest)) = operands.split_first() else {
            return Ok(Vec::new());
        };

        let results: Vec<Result<Value, Error>> = thread::scope(|scope| {
            let mut slots = Vec::with_capacity(rest.len());
            for (index, operand) in rest.iter().enumerate() {
                if operand.is_atom() {
                    slots.push(Slot::Inline(operand));
                    continue;
                }
                let Some(permit) = self.workers.try_acquire() else {
                    trace!(operand = index + 1, "worker budget exhausted, evaluating inline");
                    slots.push(Slot::Inline(operand));
                    continue;
                };

                let spawned = thread::Builder::new()
                    .name(format!("forklisp-arg-{}", index + 1))
                    .stack_size(self.config.stack_size)
                    .spawn_scoped(scope, move || {
                        let _permit = permit;
                        self.eval_operand(operand, env, depth)
                    });
                match spawned {
                    Ok(handle) => {
                        trace!(
                            operand = index + 1,
                            depth,
                            live_workers = self.workers.live(),
                            "forked operand"
                        );
                        slots.push(Slot::Forked(handle));
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to spawn argument worker, evaluating inline");
                        slots.push(Slot::Inline(operand));
                    }
                }
            }

            let mut results = Vec::with_capacity(operands.len());
            results.push(self.eval_operand(first, env, depth));
            // Inline operands run before any join so they overlap with the workers
            let slots: Vec<Slot<'_, '_>> = slots
                .into_iter()
                .map(|slot| match slot {
                    Slot::Inline(operand) => Slot::Done(self.eval_operand(operand, env, depth)),
                    forked => forked,
                })
                .collect();
            for slot in slots {
                results.push(match slot {
                    Slot::Done(result) => result,
                    Slot::Forked(handle) => handle.join().unwrap_or_else(|_| {
                        self.cancel();
                        Err(Error::EvalError("argument worker panicked".to_owned()))
                    }),
                    Slot::Inline(operand) => self.eval_operand(operand, env, depth),
                });
            }
            results
        });

        collect_in_order(results)
    }

    /// Evaluate one operand, raising the run-wide cancellation flag on failure
    fn eval_operand(&self, operand: &Value, env: &Environment, depth: usize) -> Result<Value, Error> {
        let result = self.eval_at(operand, env, depth + 1);
        if result.is_err() {
            self.cancel();
        }
        result
    }
}

/// Assemble joined results. The reported failure is the first one in operand
/// order that is not a consequence of cancellation.
fn collect_in_order(results: Vec<Result<Value, Error>>) -> Result<Vec<Value>, Error> {
    let mut values = Vec::with_capacity(results.len());
    let mut cancelled = false;
    let mut failure = None;
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(Error::Cancelled) => cancelled = true,
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None if cancelled => Err(Error::Cancelled),
        None => Ok(values),
    }
}
