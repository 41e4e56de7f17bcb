//! Worker side of the task queue.
//!
//! The processor claims tasks (critical before default), dispatches them by
//! type name to registered [`TaskHandler`]s, and records the outcome. Handlers
//! classify their own failures: [`HandlerError::SkipRetry`] drops the task,
//! [`HandlerError::Retryable`] reschedules it with jittered exponential
//! backoff until `max_retry` is spent, after which it is dead-lettered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio::sync::{Semaphore, watch};
use tracing::{error, info, warn};

use super::runtime::retry_base_delay;
use super::{BackoffJitter, FailureTransition, QueueName, RandomJitter, TaskId, TaskKind, TaskRecord};
use crate::domain::ports::{HandlerError, TaskHandler, TaskQueue, TaskQueueError};

/// Processor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProcessorConfig {
    /// Deliveries running at once.
    pub concurrency: usize,
    /// Pause between polls when no task is claimable.
    pub poll_interval: Duration,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any retry delay.
    pub max_backoff: Duration,
    /// Claims older than this are presumed abandoned by a crashed worker.
    pub stale_after: Duration,
}

impl Default for TaskProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(600),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// What happened to a delivered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handler succeeded; the task was removed.
    Succeeded,
    /// Handler asked not to retry; the task was removed.
    Skipped { reason: String },
    /// Handler failed; the task will be delivered again.
    Retrying {
        retry_count: u32,
        next_visible_at: DateTime<Utc>,
    },
    /// Retries are exhausted or no handler exists; the task was parked.
    DeadLettered { retry_count: u32, reason: String },
}

/// Summary of one [`TaskProcessor::process_one`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTask {
    pub id: TaskId,
    pub kind: String,
    pub queue: QueueName,
    pub outcome: DeliveryOutcome,
}

/// Claims and runs queued tasks.
pub struct TaskProcessor {
    queue: Arc<dyn TaskQueue>,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn BackoffJitter>,
    config: TaskProcessorConfig,
}

impl TaskProcessor {
    /// Build a processor with random retry jitter and no handlers.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        config: TaskProcessorConfig,
    ) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            clock,
            jitter: Arc::new(RandomJitter),
            config,
        }
    }

    /// Replace the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn BackoffJitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Route tasks of `kind` to `handler`.
    #[must_use]
    pub fn register(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind.as_str(), handler);
        self
    }

    /// Claim and deliver at most one task.
    ///
    /// Returns `Ok(None)` when nothing is claimable.
    pub async fn process_one(&self) -> Result<Option<ProcessedTask>, TaskQueueError> {
        let Some(task) = self.claim().await? else {
            return Ok(None);
        };
        let outcome = self.deliver(&task).await?;
        Ok(Some(ProcessedTask {
            id: task.id,
            kind: task.kind,
            queue: task.queue,
            outcome,
        }))
    }

    /// Return abandoned claims to the queue.
    pub async fn recover_stale(&self) -> Result<u64, TaskQueueError> {
        let stale_after =
            TimeDelta::from_std(self.config.stale_after).unwrap_or_else(|_| TimeDelta::days(1));
        let cutoff = self.clock.utc() - stale_after;
        let recovered = self.queue.recover_stale(cutoff).await?;
        if recovered > 0 {
            warn!(recovered, %cutoff, "returned stale task claims to the queue");
        }
        Ok(recovered)
    }

    /// Run deliveries until `shutdown` flips to `true` or its sender drops.
    ///
    /// On shutdown no new task is claimed and the call returns once every
    /// in-flight delivery has finished.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        info!(concurrency, handlers = self.handlers.len(), "task processor started");

        while !*shutdown.borrow() {
            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };
            match self.claim().await {
                Ok(Some(task)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = this.deliver(&task).await {
                            error!(task_id = %task.id, error = %err, "failed to record task outcome");
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    self.idle(&mut shutdown).await;
                }
                Err(err) => {
                    drop(permit);
                    error!(error = %err, "failed to claim task");
                    self.idle(&mut shutdown).await;
                }
            }
        }

        let in_flight = u32::try_from(concurrency).unwrap_or(u32::MAX);
        if permits.acquire_many(in_flight).await.is_err() {
            warn!("task processor stopped without draining deliveries");
        }
        info!("task processor stopped");
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        if let Err(err) = self.recover_stale().await {
            warn!(error = %err, "failed to recover stale task claims");
        }
        tokio::select! {
            () = tokio::time::sleep(self.config.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn claim(&self) -> Result<Option<TaskRecord>, TaskQueueError> {
        self.queue
            .claim_next(&QueueName::PRIORITY, self.clock.utc())
            .await
    }

    async fn deliver(&self, task: &TaskRecord) -> Result<DeliveryOutcome, TaskQueueError> {
        let Some(handler) = self.handlers.get(task.kind.as_str()) else {
            let reason = format!("no handler registered for {}", task.kind);
            self.queue
                .dead_letter(task.id, task.retry_count, reason.clone())
                .await?;
            error!(task_id = %task.id, kind = %task.kind, "task has no handler; dead-lettered");
            return Ok(DeliveryOutcome::DeadLettered {
                retry_count: task.retry_count,
                reason,
            });
        };

        match handler.handle(task).await {
            Ok(()) => {
                self.queue.complete(task.id).await?;
                info!(task_id = %task.id, kind = %task.kind, queue = task.queue.as_str(), "processed task");
                Ok(DeliveryOutcome::Succeeded)
            }
            Err(HandlerError::SkipRetry { message }) => {
                self.queue.complete(task.id).await?;
                warn!(task_id = %task.id, kind = %task.kind, reason = %message, "task skipped without retry");
                Ok(DeliveryOutcome::Skipped { reason: message })
            }
            Err(HandlerError::Retryable { message }) => self.record_failure(task, message).await,
        }
    }

    async fn record_failure(
        &self,
        task: &TaskRecord,
        message: String,
    ) -> Result<DeliveryOutcome, TaskQueueError> {
        match task.after_failure() {
            FailureTransition::Retry { retry_count } => {
                let next_visible_at = self.next_attempt_at(retry_count);
                self.queue
                    .retry(task.id, retry_count, next_visible_at, message.clone())
                    .await?;
                warn!(
                    task_id = %task.id,
                    kind = %task.kind,
                    retry_count,
                    max_retry = task.max_retry,
                    %next_visible_at,
                    error = %message,
                    "task failed; retry scheduled"
                );
                Ok(DeliveryOutcome::Retrying {
                    retry_count,
                    next_visible_at,
                })
            }
            FailureTransition::DeadLetter { retry_count } => {
                self.queue
                    .dead_letter(task.id, retry_count, message.clone())
                    .await?;
                error!(
                    task_id = %task.id,
                    kind = %task.kind,
                    retry_count,
                    error = %message,
                    "task retries exhausted; dead-lettered"
                );
                Ok(DeliveryOutcome::DeadLettered {
                    retry_count,
                    reason: message,
                })
            }
        }
    }

    fn next_attempt_at(&self, retry_count: u32) -> DateTime<Utc> {
        let base = retry_base_delay(
            self.config.initial_backoff,
            self.config.max_backoff,
            retry_count,
        );
        let jittered = self.jitter.jittered_delay(base, retry_count);
        let delay = TimeDelta::from_std(jittered).unwrap_or_else(|_| TimeDelta::days(1));
        let now = self.clock.utc();
        now.checked_add_signed(delay).unwrap_or(now)
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
