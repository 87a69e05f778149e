//! Evaluation settings fixed for the duration of a run.

use crate::{DEFAULT_MAX_EVAL_DEPTH, DEFAULT_STACK_SIZE};

/// How the operands of an application (and of `list`) are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgumentStrategy {
    /// Strictly left to right on the current thread
    #[default]
    Sequential,
    /// Fork one task per operand after the first, join in operand order
    Parallel,
}

impl ArgumentStrategy {
    /// Map the externally supplied parallel/sequential boolean
    pub fn from_parallel_flag(parallel: bool) -> Self {
        if parallel {
            ArgumentStrategy::Parallel
        } else {
            ArgumentStrategy::Sequential
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalConfig {
    pub strategy: ArgumentStrategy,
    /// Maximum non-tail evaluation nesting before the run fails
    pub max_depth: usize,
    /// Maximum number of argument worker threads alive at once across the run.
    /// Operands beyond the budget are evaluated on the forking thread.
    pub max_workers: usize,
    /// Native stack size for the evaluation thread and every worker
    pub stack_size: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            strategy: ArgumentStrategy::Sequential,
            max_depth: DEFAULT_MAX_EVAL_DEPTH,
            max_workers: default_max_workers(),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl EvalConfig {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self::default().with_strategy(ArgumentStrategy::Parallel)
    }

    pub fn with_strategy(mut self, strategy: ArgumentStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.strategy == ArgumentStrategy::Parallel
    }
}

/// One worker per available core
fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
