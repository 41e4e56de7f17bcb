//! Port implemented by background jobs.
use async_trait::async_trait;

use crate::domain::task_queue::TaskRecord;

use super::define_port_error;

define_port_error! {
    /// Outcome classes a handler reports for a failed delivery.
    pub enum HandlerError {
        /// The task can never succeed; drop it without retrying.
        SkipRetry { message: String } => "task skipped without retry: {message}",
        /// The failure may be transient; retry under the task's budget.
        Retryable { message: String } => "task failed: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one delivery of `task`.
    async fn handle(&self, task: &TaskRecord) -> Result<(), HandlerError>;
}
