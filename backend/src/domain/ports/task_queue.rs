//! Port abstraction for durable task storage.
//!
//! Adapters persist [`TaskRecord`]s, hand each claimable task to exactly one
//! worker at a time, and record the outcome of every delivery. Scheduling
//! decisions (backoff, dead-lettering) are made by the domain processor.
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::task_queue::{NewTask, QueueName, TaskId, TaskRecord};

use super::define_port_error;

define_port_error! {
    /// Errors raised by task queue adapters.
    pub enum TaskQueueError {
        /// Queue storage is unreachable.
        Connection { message: String } => "task queue connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "task queue query failed: {message}",
        /// The addressed task is not stored.
        Missing { id: String } => "task {id} not found",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Store a new task.
    async fn push(&self, task: NewTask) -> Result<TaskRecord, TaskQueueError>;

    /// Claim the next claimable task, trying `queues` in order.
    ///
    /// The returned task is `Active` and invisible to other workers.
    async fn claim_next(
        &self,
        queues: &[QueueName],
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, TaskQueueError>;

    /// Remove a delivered task.
    async fn complete(&self, id: TaskId) -> Result<(), TaskQueueError>;

    /// Return a task to the queue after a failed delivery.
    async fn retry(
        &self,
        id: TaskId,
        retry_count: u32,
        next_visible_at: DateTime<Utc>,
        last_error: String,
    ) -> Result<(), TaskQueueError>;

    /// Park a task whose retries are exhausted.
    async fn dead_letter(
        &self,
        id: TaskId,
        retry_count: u32,
        last_error: String,
    ) -> Result<(), TaskQueueError>;

    /// Make tasks claimed before `claimed_before` claimable again.
    ///
    /// Returns the number of recovered tasks.
    async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, TaskQueueError>;

    /// Look a task up by id.
    async fn find(&self, id: TaskId) -> Result<Option<TaskRecord>, TaskQueueError>;

    /// List dead-lettered tasks, newest first.
    async fn list_dead_letters(&self, limit: u32) -> Result<Vec<TaskRecord>, TaskQueueError>;
}
