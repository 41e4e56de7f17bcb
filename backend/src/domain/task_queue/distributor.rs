//! Enqueue side of the task queue.

use std::sync::Arc;

use chrono::TimeDelta;
use mockable::Clock;
use serde::Serialize;
use tracing::info;

use super::{
    NewTask, PayloadDeleteOldAvatar, PayloadSendVerifyEmail, TaskId, TaskKind, TaskOptions,
    TaskRecord, TaskState,
};
use crate::domain::Error;
use crate::domain::ports::{TaskQueue, TaskQueueError};

pub(crate) fn map_queue_error(error: TaskQueueError) -> Error {
    match error {
        TaskQueueError::Connection { message } => Error::service_unavailable(message),
        TaskQueueError::Query { message } => Error::internal(message),
        TaskQueueError::Missing { id } => Error::not_found(format!("task {id} not found")),
    }
}

/// Writes tasks to a [`TaskQueue`]. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct TaskDistributor {
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
}

impl TaskDistributor {
    /// Build a distributor over `queue`.
    pub fn new(queue: Arc<dyn TaskQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { queue, clock }
    }

    /// Store one task of `kind` carrying `payload`.
    ///
    /// The task becomes claimable once `options.process_in` has elapsed.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        payload: Vec<u8>,
        options: TaskOptions,
    ) -> Result<TaskRecord, Error> {
        let now = self.clock.utc();
        let delay = TimeDelta::from_std(options.process_in)
            .map_err(|err| Error::invalid_request(format!("process_in out of range: {err}")))?;
        let next_visible_at = now
            .checked_add_signed(delay)
            .ok_or_else(|| Error::invalid_request("process_in is past the last representable time"))?;
        let task = NewTask {
            id: TaskId::random(),
            kind: kind.as_str().to_owned(),
            payload,
            queue: options.queue,
            state: TaskState::initial(options.process_in),
            max_retry: options.max_retry,
            next_visible_at,
            created_at: now,
        };
        let record = self.queue.push(task).await.map_err(map_queue_error)?;
        info!(
            task_id = %record.id,
            kind = %kind,
            queue = record.queue.as_str(),
            max_retry = record.max_retry,
            next_visible_at = %record.next_visible_at,
            "enqueued task"
        );
        Ok(record)
    }

    /// Schedule the verification email for a new user.
    pub async fn distribute_send_verify_email(
        &self,
        payload: &PayloadSendVerifyEmail,
        options: TaskOptions,
    ) -> Result<TaskRecord, Error> {
        self.enqueue(TaskKind::SendVerifyEmail, encode(payload)?, options)
            .await
    }

    /// Schedule deletion of a replaced avatar.
    pub async fn distribute_delete_old_avatar(
        &self,
        payload: &PayloadDeleteOldAvatar,
        options: TaskOptions,
    ) -> Result<TaskRecord, Error> {
        self.enqueue(TaskKind::DeleteOldAvatar, encode(payload)?, options)
            .await
    }
}

fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(payload)
        .map_err(|err| Error::internal(format!("failed to marshal task payload: {err}")))
}
