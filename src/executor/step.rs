//! The unit of work inside a task.

use async_trait::async_trait;

use super::context::Context;
use crate::error::Result;

/// One action of a task.
///
/// Steps run in order against the task's [`Context`]. When a step fails
/// (other than with [`Error::SkipTask`](crate::error::Error::SkipTask)) its
/// own `rollback` is invoked; steps that already succeeded are left alone.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut Context) -> Result<()>;

    /// Undo partial effects after `execute` failed. Best effort.
    async fn rollback(&self, _ctx: &mut Context) {}
}
