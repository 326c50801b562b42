//! Playbook driver.
//!
//! A [`Playbook`] is an ordered list of [`PlaybookStep`]s. Each step names a
//! [`StepType`] and the configs it applies to; the [`TaskFactory`] expands it
//! into a batch of tasks which then run with the step's [`ExecOptions`].
//!
//! Main steps run in order and stop at the first failing step. Post steps
//! run afterwards no matter how the main steps ended.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::configs::Configs;
use crate::connection::Connector;
use crate::error::{Error, Result};
use crate::executor::{ExecOptions, TasksOutcome};
use crate::factory::{StepOptions, StepType, TaskFactory};
use crate::progress::ProgressReporter;

/// One step of a playbook.
#[derive(Debug, Clone)]
pub struct PlaybookStep {
    pub step_type: StepType,
    pub configs: Configs,
    pub options: StepOptions,
    pub exec_options: ExecOptions,
}

impl PlaybookStep {
    pub fn new(step_type: StepType, configs: impl Into<Configs>) -> Self {
        Self {
            step_type,
            configs: configs.into(),
            options: StepOptions::default(),
            exec_options: ExecOptions::default(),
        }
    }

    pub fn with_options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_exec_options(mut self, exec_options: ExecOptions) -> Self {
        self.exec_options = exec_options;
        self
    }

    fn is_silent(&self) -> bool {
        self.exec_options.silent_main_bar
    }
}

/// Outcomes of every executed step, in execution order.
#[derive(Debug, Default)]
pub struct PlaybookReport {
    pub outcomes: Vec<TasksOutcome>,
    pub post_outcomes: Vec<TasksOutcome>,
}

impl PlaybookReport {
    /// Outcome of the first executed step of the given type.
    pub fn outcome(&self, step_type: StepType) -> Option<&TasksOutcome> {
        self.outcomes
            .iter()
            .chain(self.post_outcomes.iter())
            .find(|o| o.name == step_type.as_str())
    }
}

pub struct Playbook {
    factory: TaskFactory,
    connector: Arc<dyn Connector>,
    progress: ProgressReporter,
    steps: Vec<PlaybookStep>,
    post_steps: Vec<PlaybookStep>,
    command_timeout: Option<Duration>,
}

impl Playbook {
    pub fn new(factory: TaskFactory, connector: Arc<dyn Connector>) -> Self {
        Self {
            factory,
            connector,
            progress: ProgressReporter::new(),
            steps: Vec::new(),
            post_steps: Vec::new(),
            command_timeout: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Deadline applied to every remote call of steps that set none.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn add_step(&mut self, step: PlaybookStep) {
        self.steps.push(step);
    }

    pub fn add_post_step(&mut self, step: PlaybookStep) {
        self.post_steps.push(step);
    }

    pub fn steps(&self) -> &[PlaybookStep] {
        &self.steps
    }

    pub fn post_steps(&self) -> &[PlaybookStep] {
        &self.post_steps
    }

    #[instrument(skip_all, fields(steps = self.steps.len(), post_steps = self.post_steps.len()))]
    pub async fn run(self) -> Result<PlaybookReport> {
        let mut report = PlaybookReport::default();

        let main = self.run_steps(&self.steps, &mut report.outcomes).await;
        if let Err(e) = &main {
            warn!(error = %e, "main steps failed, running post steps");
        }
        let post = self.run_steps(&self.post_steps, &mut report.post_outcomes).await;
        if let Err(e) = &post {
            warn!(error = %e, "post step failed");
        }

        main?;
        post?;
        Ok(report)
    }

    async fn run_steps(
        &self,
        steps: &[PlaybookStep],
        outcomes: &mut Vec<TasksOutcome>,
    ) -> Result<()> {
        let mut printed = false;
        for step in steps {
            if printed && !step.is_silent() {
                self.progress.separator();
            }
            let mut outcome = self.run_step(step).await?;
            printed |= !step.is_silent();

            if !step.exec_options.skip_error {
                if let Some(source) = outcome.error.take() {
                    return Err(Error::StepFailed {
                        step: outcome.name,
                        summary: outcome.summary,
                        source: Box::new(source),
                    });
                }
            }
            outcomes.push(outcome);
        }
        Ok(())
    }

    async fn run_step(&self, step: &PlaybookStep) -> Result<TasksOutcome> {
        let tasks = self.factory.create_tasks(step)?;
        info!(step = %step.step_type, tasks = tasks.len(), "running playbook step");

        let mut options = step.exec_options.clone();
        if options.command_timeout.is_none() {
            options.command_timeout = self.command_timeout;
        }
        let outcome = tasks
            .execute(&options, Arc::clone(&self.connector), &self.progress)
            .await;
        info!(
            step = %step.step_type,
            summary = %outcome.summary,
            status = %outcome.status,
            "playbook step finished"
        );
        Ok(outcome)
    }
}
