//! Execution engine for clusterdeck
//!
//! The engine has three layers:
//! - [`Step`]: one remote or local action with an optional rollback
//! - [`Task`]: the ordered steps applied to one entity, run against a
//!   fresh [`Context`]
//! - [`Tasks`]: a batch of tasks for one step type, run concurrently
//!   under a bounded worker pool and aggregated by a [`Monitor`]

pub mod context;
pub mod monitor;
pub mod step;
pub mod task;
pub mod tasks;

use std::time::Duration;

pub use context::{Context, Register};
pub use monitor::{Monitor, Outcome, StepStatus, Summary};
pub use step::Step;
pub use task::{Task, TaskRecord, TaskState};
pub use tasks::{Tasks, TasksOutcome};

/// Default number of tasks running at once within a step
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Per-step execution options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Hide the step line of the progress report
    pub silent_main_bar: bool,
    /// Hide the per-unit lines of the progress report
    pub silent_sub_bar: bool,
    /// Keep admitting tasks after a failure and do not fail the step
    pub skip_error: bool,
    /// Worker pool size
    pub concurrency: usize,
    /// Deadline applied to every remote call
    pub command_timeout: Option<Duration>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            silent_main_bar: false,
            silent_sub_bar: false,
            skip_error: false,
            concurrency: DEFAULT_CONCURRENCY,
            command_timeout: None,
        }
    }
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_skip_error(mut self, skip_error: bool) -> Self {
        self.skip_error = skip_error;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Hide both progress lines
    pub fn silent(mut self) -> Self {
        self.silent_main_bar = true;
        self.silent_sub_bar = true;
        self
    }

    pub fn silent_sub_bar(mut self) -> Self {
        self.silent_sub_bar = true;
        self
    }
}
