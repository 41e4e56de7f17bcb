//! Durable background tasks that follow committed writes.
//!
//! A task moves through an explicit state machine:
//!
//! ```text
//! enqueue ──► Scheduled ──(process_in elapsed)──► Ready ──claim──► Active
//!                                                  ▲                │
//!                         Retrying ◄──retryable────┼────────────────┤
//!                             └──(backoff elapsed)─┘                │
//!                                      removed ◄──success/skip──────┤
//!                                 DeadLettered ◄──retries spent─────┘
//! ```
//!
//! The [`TaskDistributor`] creates tasks, the [`TaskProcessor`] claims and
//! dispatches them to [`TaskHandler`](crate::domain::ports::TaskHandler)s,
//! and [`handlers`] holds the two concrete jobs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod distributor;
pub mod handlers;
mod processor;
mod runtime;

pub use distributor::TaskDistributor;
pub use processor::{DeliveryOutcome, ProcessedTask, TaskProcessor, TaskProcessorConfig};
pub use runtime::{BackoffJitter, RandomJitter};

/// Identifier of a task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap a stored identifier.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Jobs the processor knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Create a verification record and mail its link.
    SendVerifyEmail,
    /// Remove a replaced avatar from blob storage.
    DeleteOldAvatar,
}

impl TaskKind {
    /// Stored task type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SendVerifyEmail => "task:send_verify_email",
            Self::DeleteOldAvatar => "task:delete_old_avatar",
        }
    }

    /// Enqueue options used when callers do not override them.
    #[must_use]
    pub const fn default_options(self) -> TaskOptions {
        match self {
            Self::SendVerifyEmail => TaskOptions {
                queue: QueueName::Critical,
                max_retry: 10,
                process_in: Duration::from_secs(10),
            },
            Self::DeleteOldAvatar => TaskOptions {
                queue: QueueName::Default,
                max_retry: 25,
                process_in: Duration::ZERO,
            },
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named priority queue; earlier entries in [`QueueName::PRIORITY`] drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Critical,
    Default,
}

impl QueueName {
    /// Queues in the order workers drain them.
    pub const PRIORITY: [Self; 2] = [Self::Critical, Self::Default];

    /// Stored queue name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Default => "default",
        }
    }
}

/// Raised when a stored task column holds an unknown value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {column} value: {value}")]
pub struct UnknownTaskValue {
    pub column: &'static str,
    pub value: String,
}

impl FromStr for QueueName {
    type Err = UnknownTaskValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .into_iter()
            .find(|queue| queue.as_str() == value)
            .ok_or_else(|| UnknownTaskValue {
                column: "queue",
                value: value.to_owned(),
            })
    }
}

/// Per-task delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Queue the task is placed on.
    pub queue: QueueName,
    /// Retries allowed after the first failed delivery.
    pub max_retry: u32,
    /// Delay before the first delivery.
    pub process_in: Duration,
}

/// Lifecycle state of a stored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting for its initial delay to elapse.
    Scheduled,
    /// Deliverable now.
    Ready,
    /// Claimed by a worker.
    Active,
    /// Waiting for a retry backoff to elapse.
    Retrying,
    /// Retries exhausted; kept for inspection.
    DeadLettered,
}

impl TaskState {
    /// States a worker may claim once `next_visible_at` has passed.
    pub const CLAIMABLE: [Self; 3] = [Self::Scheduled, Self::Ready, Self::Retrying];

    /// Stored state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Initial state for a task that becomes visible after `process_in`.
    #[must_use]
    pub const fn initial(process_in: Duration) -> Self {
        if process_in.is_zero() {
            Self::Ready
        } else {
            Self::Scheduled
        }
    }
}

impl FromStr for TaskState {
    type Err = UnknownTaskValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        [
            Self::Scheduled,
            Self::Ready,
            Self::Active,
            Self::Retrying,
            Self::DeadLettered,
        ]
        .into_iter()
        .find(|state| state.as_str() == value)
        .ok_or_else(|| UnknownTaskValue {
            column: "state",
            value: value.to_owned(),
        })
    }
}

/// Input for storing a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub id: TaskId,
    pub kind: String,
    pub payload: Vec<u8>,
    pub queue: QueueName,
    pub state: TaskState,
    pub max_retry: u32,
    pub next_visible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Stored task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: TaskId,
    /// Task type name; see [`TaskKind::as_str`].
    pub kind: String,
    pub payload: Vec<u8>,
    pub queue: QueueName,
    pub state: TaskState,
    /// Failed deliveries that were rescheduled.
    pub retry_count: u32,
    pub max_retry: u32,
    pub next_visible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Materialise a freshly enqueued task.
    #[must_use]
    pub fn from_new(task: NewTask) -> Self {
        Self {
            id: task.id,
            kind: task.kind,
            payload: task.payload,
            queue: task.queue,
            state: task.state,
            retry_count: 0,
            max_retry: task.max_retry,
            next_visible_at: task.next_visible_at,
            last_error: None,
            claimed_at: None,
            created_at: task.created_at,
        }
    }

    /// True when a worker may claim the task at `now`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        TaskState::CLAIMABLE.contains(&self.state) && self.next_visible_at <= now
    }

    /// Decide what a retryable failure of the current delivery leads to.
    #[must_use]
    pub const fn after_failure(&self) -> FailureTransition {
        if self.retry_count < self.max_retry {
            FailureTransition::Retry {
                retry_count: self.retry_count + 1,
            }
        } else {
            FailureTransition::DeadLetter {
                retry_count: self.retry_count,
            }
        }
    }
}

/// Result of a retryable delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Reschedule with the incremented retry count.
    Retry { retry_count: u32 },
    /// Keep the task for inspection; no further deliveries.
    DeadLetter { retry_count: u32 },
}

/// Payload of [`TaskKind::SendVerifyEmail`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSendVerifyEmail {
    pub username: String,
}

/// Payload of [`TaskKind::DeleteOldAvatar`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDeleteOldAvatar {
    pub location: String,
}
