//! In-process [`TaskQueue`] used by tests and database-less runs.
//!
//! Tasks do not survive a restart. Claim order within a queue is earliest
//! `next_visible_at` first, then enqueue order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ports::{TaskQueue, TaskQueueError};
use crate::domain::task_queue::{NewTask, QueueName, TaskId, TaskRecord, TaskState};

#[derive(Debug, Default)]
struct Table {
    next_seq: u64,
    tasks: HashMap<TaskId, (u64, TaskRecord)>,
}

/// Mutex-guarded task table.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    table: Mutex<Table>,
}

impl InMemoryTaskQueue {
    fn table(&self) -> Result<MutexGuard<'_, Table>, TaskQueueError> {
        self.table
            .lock()
            .map_err(|_| TaskQueueError::query("task table mutex poisoned"))
    }

    fn update(
        &self,
        id: TaskId,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> Result<(), TaskQueueError> {
        let mut table = self.table()?;
        let (_, task) = table
            .tasks
            .get_mut(&id)
            .ok_or_else(|| TaskQueueError::missing(id.to_string()))?;
        apply(task);
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn push(&self, task: NewTask) -> Result<TaskRecord, TaskQueueError> {
        let mut table = self.table()?;
        let record = TaskRecord::from_new(task);
        let seq = table.next_seq;
        table.next_seq += 1;
        table.tasks.insert(record.id, (seq, record.clone()));
        Ok(record)
    }

    async fn claim_next(
        &self,
        queues: &[QueueName],
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, TaskQueueError> {
        let mut table = self.table()?;
        for queue in queues {
            let next = table
                .tasks
                .values_mut()
                .filter(|(_, task)| task.queue == *queue && task.is_claimable(now))
                .min_by_key(|(seq, task)| (task.next_visible_at, *seq));
            if let Some((_, task)) = next {
                task.state = TaskState::Active;
                task.claimed_at = Some(now);
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    async fn complete(&self, id: TaskId) -> Result<(), TaskQueueError> {
        self.table()?
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TaskQueueError::missing(id.to_string()))
    }

    async fn retry(
        &self,
        id: TaskId,
        retry_count: u32,
        next_visible_at: DateTime<Utc>,
        last_error: String,
    ) -> Result<(), TaskQueueError> {
        self.update(id, |task| {
            task.state = TaskState::Retrying;
            task.retry_count = retry_count;
            task.next_visible_at = next_visible_at;
            task.last_error = Some(last_error);
            task.claimed_at = None;
        })
    }

    async fn dead_letter(
        &self,
        id: TaskId,
        retry_count: u32,
        last_error: String,
    ) -> Result<(), TaskQueueError> {
        self.update(id, |task| {
            task.state = TaskState::DeadLettered;
            task.retry_count = retry_count;
            task.last_error = Some(last_error);
            task.claimed_at = None;
        })
    }

    async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, TaskQueueError> {
        let mut table = self.table()?;
        let mut recovered = 0;
        for (_, task) in table.tasks.values_mut() {
            let stale = task.state == TaskState::Active
                && task.claimed_at.is_some_and(|claimed| claimed < claimed_before);
            if stale {
                task.state = TaskState::Ready;
                task.claimed_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn find(&self, id: TaskId) -> Result<Option<TaskRecord>, TaskQueueError> {
        Ok(self.table()?.tasks.get(&id).map(|(_, task)| task.clone()))
    }

    async fn list_dead_letters(&self, limit: u32) -> Result<Vec<TaskRecord>, TaskQueueError> {
        let table = self.table()?;
        let mut dead: Vec<&(u64, TaskRecord)> = table
            .tasks
            .values()
            .filter(|(_, task)| task.state == TaskState::DeadLettered)
            .collect();
        dead.sort_by(|(a_seq, a), (b_seq, b)| {
            b.created_at.cmp(&a.created_at).then(b_seq.cmp(a_seq))
        });
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(dead
            .into_iter()
            .take(limit)
            .map(|(_, task)| task.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).single().expect("time")
    }

    fn task(queue: QueueName, visible_at: DateTime<Utc>) -> NewTask {
        NewTask {
            id: TaskId::random(),
            kind: "task:delete_old_avatar".to_owned(),
            payload: Vec::new(),
            queue,
            state: TaskState::Ready,
            max_retry: 3,
            next_visible_at: visible_at,
            created_at: visible_at,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn claimed_tasks_are_not_handed_out_twice(now: DateTime<Utc>) {
        let queue = InMemoryTaskQueue::default();
        queue.push(task(QueueName::Default, now)).await.expect("push");

        let first = queue.claim_next(&QueueName::PRIORITY, now).await.expect("claim");
        let second = queue.claim_next(&QueueName::PRIORITY, now).await.expect("claim");

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn claims_follow_visibility_then_enqueue_order(now: DateTime<Utc>) {
        let queue = InMemoryTaskQueue::default();
        let later = queue
            .push(task(QueueName::Default, now))
            .await
            .expect("push");
        let earlier = queue
            .push(task(QueueName::Default, now - TimeDelta::seconds(5)))
            .await
            .expect("push");
        let future = queue
            .push(task(QueueName::Default, now + TimeDelta::seconds(5)))
            .await
            .expect("push");

        let order: Vec<TaskId> = [
            queue.claim_next(&QueueName::PRIORITY, now).await,
            queue.claim_next(&QueueName::PRIORITY, now).await,
            queue.claim_next(&QueueName::PRIORITY, now).await,
        ]
        .into_iter()
        .filter_map(|claim| claim.expect("claim").map(|task| task.id))
        .collect();

        assert_eq!(order, vec![earlier.id, later.id]);
        assert_ne!(order.last(), Some(&future.id));
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_ids_are_missing(now: DateTime<Utc>) {
        let queue = InMemoryTaskQueue::default();
        let id = TaskId::random();

        let err = queue.complete(id).await.expect_err("missing");
        let retry = queue
            .retry(id, 1, now, "boom".to_owned())
            .await
            .expect_err("missing");

        assert!(err.is_missing());
        assert!(retry.is_missing());
    }

    #[rstest]
    #[tokio::test]
    async fn dead_letters_are_listed_newest_first(now: DateTime<Utc>) {
        let queue = InMemoryTaskQueue::default();
        let old = queue
            .push(task(QueueName::Default, now - TimeDelta::minutes(1)))
            .await
            .expect("push");
        let new = queue.push(task(QueueName::Default, now)).await.expect("push");
        for id in [old.id, new.id] {
            queue
                .dead_letter(id, 3, "gave up".to_owned())
                .await
                .expect("dead letter");
        }

        let listed = queue.list_dead_letters(1).await.expect("list");

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, new.id);
    }
}
