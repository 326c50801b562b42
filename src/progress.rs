//! Two-tier progress reporting.
//!
//! Each playbook step gets a main line; each progress unit (ptid) of the
//! step gets a sub line that settles on the unit's aggregate status.

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

use crate::executor::{ExecOptions, StepStatus, Summary};

/// Owner of the terminal area used by a playbook run.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    multi: MultiProgress,
    hidden: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    /// Draw to stderr.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            hidden: false,
        }
    }

    /// Draw nothing.
    pub fn hidden() -> Self {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::hidden());
        Self { multi, hidden: true }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Blank line between two visible steps
    pub fn separator(&self) {
        if !self.hidden {
            let _ = self.multi.println("");
        }
    }

    /// Start the main line of a step with `total` tasks.
    pub fn step(&self, name: &str, total: usize, options: &ExecOptions) -> StepProgress {
        let main = if self.hidden || options.silent_main_bar {
            ProgressBar::hidden()
        } else {
            let bar = self.multi.add(ProgressBar::new(total as u64));
            bar.set_style(main_style());
            bar.set_prefix(name.to_string());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        StepProgress {
            multi: self.multi.clone(),
            main,
            units: HashMap::new(),
            silent_sub: self.hidden || options.silent_sub_bar,
        }
    }
}

fn main_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:.bold} [{pos}/{len}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn unit_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.cyan} {prefix:.dim} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn colored_status(status: StepStatus) -> String {
    match status {
        StepStatus::Success => status.to_string().green().to_string(),
        StepStatus::Skip => status.to_string().cyan().to_string(),
        StepStatus::Error => status.to_string().red().bold().to_string(),
    }
}

/// Progress of one running step.
#[derive(Debug)]
pub struct StepProgress {
    multi: MultiProgress,
    main: ProgressBar,
    units: HashMap<String, ProgressBar>,
    silent_sub: bool,
}

impl StepProgress {
    /// Register a unit line labelled `label`; repeated ptids share a line.
    pub fn add_unit(&mut self, ptid: &str, label: &str) {
        if self.silent_sub || self.units.contains_key(ptid) {
            return;
        }
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(unit_style());
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        self.units.insert(ptid.to_string(), bar);
    }

    /// Refresh after a task of `ptid` finished; `unit` holds its counts so far.
    pub fn task_finished(&self, ptid: &str, unit: &Summary) {
        self.main.inc(1);
        if let Some(bar) = self.units.get(ptid) {
            bar.set_message(unit.to_string());
        }
    }

    /// Settle every line on its final status.
    pub fn finish<'a>(
        &self,
        status: StepStatus,
        units: impl Iterator<Item = (&'a str, &'a Summary)>,
    ) {
        for (ptid, summary) in units {
            if let Some(bar) = self.units.get(ptid) {
                bar.finish_with_message(colored_status(summary.status()));
            }
        }
        self.main.finish_with_message(colored_status(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_reporter_tracks_nothing() {
        let reporter = ProgressReporter::hidden();
        let mut step = reporter.step("PULL_IMAGE", 3, &ExecOptions::default());
        step.add_unit("a", "host=h1");
        assert!(step.units.is_empty());
        step.task_finished("a", &Summary::default());
        step.finish(StepStatus::Success, std::iter::empty());
    }

    #[test]
    fn test_units_share_line_per_ptid() {
        let reporter = ProgressReporter {
            multi: {
                let multi = MultiProgress::new();
                multi.set_draw_target(ProgressDrawTarget::hidden());
                multi
            },
            hidden: false,
        };
        let mut step = reporter.step("START_SERVICE", 4, &ExecOptions::default());
        step.add_unit("etcd_h1_0", "host=h1 role=etcd");
        step.add_unit("etcd_h1_0", "host=h1 role=etcd");
        step.add_unit("mds_h1_0", "host=h1 role=mds");
        assert_eq!(step.units.len(), 2);
    }
}
