//! Task definition and single-task execution.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::context::{Context, Register};
use super::step::Step;
use crate::connection::Connector;
use crate::error::Result;
use crate::topology::Entity;

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Created,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// The ordered steps to apply to one entity.
///
/// `ptid` groups tasks that belong to the same progress unit (all replicas
/// of one deploy item), `tid` identifies the task itself.
pub struct Task {
    name: String,
    subname: String,
    ptid: String,
    tid: String,
    entity: Option<Arc<dyn Entity>>,
    steps: Vec<Box<dyn Step>>,
    post_steps: Vec<Box<dyn Step>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("subname", &self.subname)
            .field("ptid", &self.ptid)
            .field("tid", &self.tid)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field(
                "post_steps",
                &self.post_steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Task {
    /// Create a task with freshly generated ids.
    pub fn new(
        name: impl Into<String>,
        subname: impl Into<String>,
        entity: Option<Arc<dyn Entity>>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            name: name.into(),
            subname: subname.into(),
            ptid: id.clone(),
            tid: id,
            entity,
            steps: Vec::new(),
            post_steps: Vec::new(),
        }
    }

    pub fn with_ids(mut self, ptid: impl Into<String>, tid: impl Into<String>) -> Self {
        self.set_ids(ptid, tid);
        self
    }

    pub fn set_ids(&mut self, ptid: impl Into<String>, tid: impl Into<String>) {
        self.ptid = ptid.into();
        self.tid = tid.into();
    }

    pub fn add_step(&mut self, step: impl Step + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Add a step that runs after the main steps whatever their outcome.
    pub fn add_post_step(&mut self, step: impl Step + 'static) {
        self.post_steps.push(Box::new(step));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subname(&self) -> &str {
        &self.subname
    }

    pub fn ptid(&self) -> &str {
        &self.ptid
    }

    pub fn tid(&self) -> &str {
        &self.tid
    }

    pub fn entity(&self) -> Option<&Arc<dyn Entity>> {
        self.entity.as_ref()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn post_step_names(&self) -> Vec<&str> {
        self.post_steps.iter().map(|s| s.name()).collect()
    }

    fn host(&self) -> String {
        self.entity
            .as_ref()
            .map(|e| e.host().to_string())
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Run the task to completion.
    ///
    /// Main steps stop at the first error. Only the failing step is rolled
    /// back, and never for a skip. Post steps always run; a post step error
    /// only becomes the task's error when the main steps succeeded. The
    /// context is always closed.
    #[instrument(skip_all, fields(task = %self.name, host = %self.host(), tid = %self.tid))]
    pub async fn execute(
        self,
        connector: &dyn Connector,
        timeout: Option<Duration>,
    ) -> (TaskRecord, Result<()>) {
        let mut record = TaskRecord {
            name: self.name.clone(),
            subname: self.subname.clone(),
            ptid: self.ptid.clone(),
            tid: self.tid.clone(),
            host: self.host(),
            state: TaskState::Running,
            error: None,
            register: Register::new(),
        };

        let mut ctx = match Context::open(self.entity.clone(), connector, timeout).await {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(error = %err, "Failed to open connection");
                record.finish(&Err(&err));
                return (record, Err(err));
            }
        };

        let mut result = Ok(());
        for step in &self.steps {
            debug!(step = step.name(), "Executing step");
            if let Err(err) = step.execute(&mut ctx).await {
                if err.is_skip() {
                    debug!(step = step.name(), "Task skipped");
                } else {
                    warn!(step = step.name(), error = %err, "Step failed, rolling back");
                    step.rollback(&mut ctx).await;
                }
                result = Err(err);
                break;
            }
        }

        for step in &self.post_steps {
            debug!(step = step.name(), "Executing post step");
            if let Err(err) = step.execute(&mut ctx).await {
                warn!(step = step.name(), error = %err, "Post step failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        record.register = ctx.take_register();
        if let Err(err) = ctx.close().await {
            warn!(error = %err, "Failed to close connection");
        }

        record.finish(&result.as_ref().map(|_| ()));
        (record, result)
    }
}

/// What a finished task leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub name: String,
    pub subname: String,
    pub ptid: String,
    pub tid: String,
    pub host: String,
    pub state: TaskState,
    /// Error message of a failed task
    pub error: Option<String>,
    /// Register contents at the end of the task
    pub register: Register,
}

impl TaskRecord {
    fn finish(&mut self, result: &std::result::Result<(), &crate::error::Error>) {
        match result {
            Ok(()) => self.state = TaskState::Succeeded,
            Err(err) if err.is_skip() => self.state = TaskState::Skipped,
            Err(err) => {
                self.state = TaskState::Failed;
                self.error = Some(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        CommandResult, Connection, ConnectionResult, ExecuteOptions, TransferOptions,
    };
    use crate::error::Error;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;

    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    struct Quiet(Arc<Journal>);

    #[async_trait]
    impl Connection for Quiet {
        fn identifier(&self) -> &str {
            "quiet"
        }
        async fn execute(&self, _: &str, _: Option<ExecuteOptions>) -> ConnectionResult<CommandResult> {
            Ok(CommandResult::success(String::new(), String::new()))
        }
        async fn upload(&self, _: &Path, _: &Path, _: Option<TransferOptions>) -> ConnectionResult<()> {
            Ok(())
        }
        async fn upload_content(&self, _: &[u8], _: &Path, _: Option<TransferOptions>) -> ConnectionResult<()> {
            Ok(())
        }
        async fn download_content(&self, _: &Path) -> ConnectionResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> ConnectionResult<()> {
            self.0.push("close");
            Ok(())
        }
    }

    struct QuietConnector(Arc<Journal>);

    #[async_trait]
    impl Connector for QuietConnector {
        async fn connect(
            &self,
            _: Option<&crate::connection::SshTarget>,
        ) -> ConnectionResult<Arc<dyn Connection>> {
            Ok(Arc::new(Quiet(self.0.clone())))
        }
    }

    enum Behavior {
        Ok,
        Fail,
        Skip,
    }

    struct Probe {
        name: String,
        behavior: Behavior,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl Step for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, ctx: &mut Context) -> Result<()> {
            self.journal.push(format!("exec:{}", self.name));
            ctx.register_mut().set(self.name.clone(), true);
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err(Error::step_execution(&self.name, "boom")),
                Behavior::Skip => Err(Error::SkipTask),
            }
        }

        async fn rollback(&self, _ctx: &mut Context) {
            self.journal.push(format!("rollback:{}", self.name));
        }
    }

    fn probe(journal: &Arc<Journal>, name: &str, behavior: Behavior) -> Probe {
        Probe {
            name: name.to_string(),
            behavior,
            journal: journal.clone(),
        }
    }

    #[tokio::test]
    async fn test_failing_step_rolls_back_only_itself() {
        let journal = Arc::new(Journal::default());
        let mut task = Task::new("Start Service", "host=h1", None);
        task.add_step(probe(&journal, "a", Behavior::Ok));
        task.add_step(probe(&journal, "b", Behavior::Fail));
        task.add_step(probe(&journal, "c", Behavior::Ok));
        task.add_post_step(probe(&journal, "post", Behavior::Ok));

        let (record, result) = task.execute(&QuietConnector(journal.clone()), None).await;
        assert!(result.is_err());
        assert_eq!(record.state, TaskState::Failed);
        assert!(record.error.unwrap().contains("boom"));
        assert_eq!(
            journal.events(),
            vec!["exec:a", "exec:b", "rollback:b", "exec:post", "close"]
        );
        assert!(record.register.contains("post"));
    }

    #[tokio::test]
    async fn test_skip_does_not_roll_back() {
        let journal = Arc::new(Journal::default());
        let mut task = Task::new("Create Container", "", None);
        task.add_step(probe(&journal, "check", Behavior::Skip));
        task.add_step(probe(&journal, "create", Behavior::Ok));
        task.add_post_step(probe(&journal, "post", Behavior::Ok));

        let (record, result) = task.execute(&QuietConnector(journal.clone()), None).await;
        assert!(matches!(result, Err(Error::SkipTask)));
        assert_eq!(record.state, TaskState::Skipped);
        assert!(record.error.is_none());
        assert_eq!(journal.events(), vec!["exec:check", "exec:post", "close"]);
    }

    #[tokio::test]
    async fn test_post_step_error_fails_successful_task() {
        let journal = Arc::new(Journal::default());
        let mut task = Task::new("Sync Config", "", None).with_ids("p", "t");
        task.add_step(probe(&journal, "main", Behavior::Ok));
        task.add_post_step(probe(&journal, "post", Behavior::Fail));

        let (record, result) = task.execute(&QuietConnector(journal), None).await;
        assert!(result.is_err());
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.ptid, "p");
        assert_eq!(record.tid, "t");
    }

    #[test]
    fn test_fresh_ids() {
        let a = Task::new("x", "", None);
        let b = Task::new("x", "", None);
        assert_eq!(a.ptid(), a.tid());
        assert_ne!(a.tid(), b.tid());
    }
}
