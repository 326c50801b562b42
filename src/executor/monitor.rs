//! Result aggregation for a batch of tasks.
//!
//! Workers never share counters. Each finished task is reported to the
//! single [`Monitor`] owned by the dispatcher, which classifies it, groups
//! it under its progress unit (ptid) and keeps the first hard error.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

use super::task::{TaskRecord, TaskState};
use crate::error::{Error, Result};

/// Classification of one finished task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Skipped,
    Failed,
}

impl Outcome {
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(err) if err.is_skip() => Outcome::Skipped,
            Err(_) => Outcome::Failed,
        }
    }
}

/// Aggregate status of a group of tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Skip,
    Error,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Success => "OK",
            StepStatus::Skip => "SKIP",
            StepStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Classified counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }

    /// Any failure is an error; otherwise all-skipped is a skip.
    pub fn status(&self) -> StepStatus {
        if self.failed > 0 {
            StepStatus::Error
        } else if self.skipped > 0 && self.skipped == self.total() {
            StepStatus::Skip
        } else {
            StepStatus::Success
        }
    }
}

impl std::ops::AddAssign for Summary {
    fn add_assign(&mut self, other: Self) {
        self.success += other.success;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success={} skip={} error={}",
            self.success, self.skipped, self.failed
        )
    }
}

/// Collector for the results of one batch.
#[derive(Debug, Default)]
pub struct Monitor {
    units: IndexMap<String, Summary>,
    records: Vec<TaskRecord>,
    first_error: Option<Error>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a progress unit before any of its tasks finish, so units
    /// keep their creation order.
    pub fn expect(&mut self, ptid: &str) {
        self.units.entry(ptid.to_string()).or_default();
    }

    /// Account for a finished task and return its classification.
    pub fn record(&mut self, record: TaskRecord, result: Result<()>) -> Outcome {
        let outcome = Outcome::from_result(&result);
        self.units
            .entry(record.ptid.clone())
            .or_default()
            .add(outcome);
        if let Err(err) = result {
            if outcome == Outcome::Failed && self.first_error.is_none() {
                self.first_error = Some(err);
            }
        }
        self.records.push(record);
        outcome
    }

    /// Account for a task whose worker died before reporting.
    pub fn record_lost(&mut self, err: Error) {
        self.units.entry(String::new()).or_default().add(Outcome::Failed);
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    pub fn has_failure(&self) -> bool {
        self.first_error.is_some()
    }

    /// Counts of one progress unit
    pub fn sum(&self, ptid: &str) -> Summary {
        self.units.get(ptid).copied().unwrap_or_default()
    }

    pub fn units(&self) -> impl Iterator<Item = (&str, &Summary)> {
        self.units.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Counts over every task
    pub fn summary(&self) -> Summary {
        let mut total = Summary::default();
        for unit in self.units.values() {
            total += *unit;
        }
        total
    }

    pub fn status(&self) -> StepStatus {
        self.summary().status()
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    /// Consume the monitor, yielding records in completion order and the
    /// first hard error.
    pub fn finish(self) -> (Vec<TaskRecord>, Option<Error>) {
        (self.records, self.first_error)
    }
}

impl TaskRecord {
    pub fn outcome(&self) -> Outcome {
        match self.state {
            TaskState::Skipped => Outcome::Skipped,
            TaskState::Failed => Outcome::Failed,
            _ => Outcome::Success,
        }
    }
}
