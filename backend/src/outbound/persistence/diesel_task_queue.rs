//! PostgreSQL-backed [`TaskQueue`].
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a short transaction so that
//! concurrent workers never receive the same task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::AsyncConnection as _;
use diesel_async::RunQueryDsl;
use diesel_async::scoped_futures::ScopedFutureExt as _;

use super::diesel_error_mapping::{map_queue_diesel_error, map_queue_pool_error};
use super::models::{NewTaskRow, TaskRow};
use super::pool::DbPool;
use super::schema::tasks;
use crate::domain::ports::{TaskQueue, TaskQueueError};
use crate::domain::task_queue::{NewTask, QueueName, TaskId, TaskRecord, TaskState};

/// Diesel adapter for durable task storage.
#[derive(Clone)]
pub struct DieselTaskQueue {
    pool: DbPool,
}

impl DieselTaskQueue {
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn stored_counter(value: u32, column: &str) -> Result<i32, TaskQueueError> {
    i32::try_from(value).map_err(|_| TaskQueueError::query(format!("{column} out of range: {value}")))
}

fn require_row(updated: usize, id: TaskId) -> Result<(), TaskQueueError> {
    if updated == 0 {
        return Err(TaskQueueError::missing(id.to_string()));
    }
    Ok(())
}

fn claimable_states() -> Vec<&'static str> {
    TaskState::CLAIMABLE.iter().map(|state| state.as_str()).collect()
}

#[async_trait]
impl TaskQueue for DieselTaskQueue {
    async fn push(&self, task: NewTask) -> Result<TaskRecord, TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        let row = NewTaskRow {
            id: *task.id.as_uuid(),
            kind: &task.kind,
            payload: &task.payload,
            queue: task.queue.as_str(),
            state: task.state.as_str(),
            max_retry: stored_counter(task.max_retry, "max_retry")?,
            next_visible_at: task.next_visible_at,
            created_at: task.created_at,
        };
        diesel::insert_into(tasks::table)
            .values(&row)
            .returning(TaskRow::as_returning())
            .get_result::<TaskRow>(&mut conn)
            .await
            .map_err(map_queue_diesel_error)?
            .try_into()
    }

    async fn claim_next(
        &self,
        queues: &[QueueName],
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        let queue_names: Vec<&'static str> = queues.iter().map(|queue| queue.as_str()).collect();
        let claimed = conn
            .transaction::<_, DieselError, _>(|conn| {
                async move {
                    for queue in queue_names {
                        let candidate = tasks::table
                            .filter(tasks::queue.eq(queue))
                            .filter(tasks::state.eq_any(claimable_states()))
                            .filter(tasks::next_visible_at.le(now))
                            .order((tasks::next_visible_at.asc(), tasks::created_at.asc()))
                            .select(tasks::id)
                            .for_update()
                            .skip_locked()
                            .first::<uuid::Uuid>(conn)
                            .await
                            .optional()?;
                        if let Some(id) = candidate {
                            let row = diesel::update(tasks::table.find(id))
                                .set((
                                    tasks::state.eq(TaskState::Active.as_str()),
                                    tasks::claimed_at.eq(Some(now)),
                                ))
                                .returning(TaskRow::as_returning())
                                .get_result::<TaskRow>(conn)
                                .await?;
                            return Ok(Some(row));
                        }
                    }
                    Ok(None)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_queue_diesel_error)?;
        claimed.map(TaskRecord::try_from).transpose()
    }

    async fn complete(&self, id: TaskId) -> Result<(), TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        let deleted = diesel::delete(tasks::table.find(*id.as_uuid()))
            .execute(&mut conn)
            .await
            .map_err(map_queue_diesel_error)?;
        require_row(deleted, id)
    }

    async fn retry(
        &self,
        id: TaskId,
        retry_count: u32,
        next_visible_at: DateTime<Utc>,
        last_error: String,
    ) -> Result<(), TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        let updated = diesel::update(tasks::table.find(*id.as_uuid()))
            .set((
                tasks::state.eq(TaskState::Retrying.as_str()),
                tasks::retry_count.eq(stored_counter(retry_count, "retry_count")?),
                tasks::next_visible_at.eq(next_visible_at),
                tasks::last_error.eq(Some(last_error)),
                tasks::claimed_at.eq(None::<DateTime<Utc>>),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_queue_diesel_error)?;
        require_row(updated, id)
    }

    async fn dead_letter(
        &self,
        id: TaskId,
        retry_count: u32,
        last_error: String,
    ) -> Result<(), TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        let updated = diesel::update(tasks::table.find(*id.as_uuid()))
            .set((
                tasks::state.eq(TaskState::DeadLettered.as_str()),
                tasks::retry_count.eq(stored_counter(retry_count, "retry_count")?),
                tasks::last_error.eq(Some(last_error)),
                tasks::claimed_at.eq(None::<DateTime<Utc>>),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_queue_diesel_error)?;
        require_row(updated, id)
    }

    async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        let recovered = diesel::update(
            tasks::table
                .filter(tasks::state.eq(TaskState::Active.as_str()))
                .filter(tasks::claimed_at.lt(claimed_before)),
        )
        .set((
            tasks::state.eq(TaskState::Ready.as_str()),
            tasks::claimed_at.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_queue_diesel_error)?;
        Ok(u64::try_from(recovered).unwrap_or(u64::MAX))
    }

    async fn find(&self, id: TaskId) -> Result<Option<TaskRecord>, TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        tasks::table
            .find(*id.as_uuid())
            .select(TaskRow::as_select())
            .first::<TaskRow>(&mut conn)
            .await
            .optional()
            .map_err(map_queue_diesel_error)?
            .map(TaskRecord::try_from)
            .transpose()
    }

    async fn list_dead_letters(&self, limit: u32) -> Result<Vec<TaskRecord>, TaskQueueError> {
        let mut conn = self.pool.get_owned().await.map_err(map_queue_pool_error)?;
        let rows = tasks::table
            .filter(tasks::state.eq(TaskState::DeadLettered.as_str()))
            .order(tasks::created_at.desc())
            .limit(i64::from(limit))
            .select(TaskRow::as_select())
            .load::<TaskRow>(&mut conn)
            .await
            .map_err(map_queue_diesel_error)?;
        rows.into_iter().map(TaskRecord::try_from).collect()
    }
}
