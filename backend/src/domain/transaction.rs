//! Atomic execution of units of work against the record store.
//!
//! [`TxCoordinator::run_atomic`] opens a transaction, lends the unit of work
//! a [`LedgerOps`] handle that cannot outlive the call, and then commits or
//! rolls back exactly once. The closure shape mirrors
//! `diesel_async::AsyncConnection::transaction`: the returned future is a
//! [`ScopedBoxFuture`] bounded by the borrow of the handle.

use std::fmt;
use std::sync::Arc;

use scoped_futures::ScopedBoxFuture;
use serde_json::json;
use tracing::{debug, error, warn};

use super::ports::{LedgerOps, LedgerStore, StoreError};
use super::{Error, ErrorCode};

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Connection { message } => Self::service_unavailable(message),
            StoreError::Query { message } => Self::internal(message),
            StoreError::UniqueViolation { constraint } => {
                Self::conflict(format!("unique constraint violated: {constraint}"))
                    .with_details(json!({ "constraint": constraint }))
            }
            StoreError::ForeignKeyViolation { constraint } => {
                Self::not_found(format!("referenced record does not exist: {constraint}"))
                    .with_details(json!({ "constraint": constraint }))
            }
            StoreError::CheckViolation { constraint } => {
                Self::conflict(format!("check constraint violated: {constraint}"))
                    .with_details(json!({ "constraint": constraint }))
            }
            StoreError::RowNotFound { entity } => Self::not_found(format!("{entity} not found")),
        }
    }
}

/// Failure of an atomic unit of work.
///
/// `cause` is the error that aborted the unit (or the begin/commit failure).
/// When the rollback that followed also failed, its error is kept alongside
/// instead of replacing the cause.
#[derive(Debug, Clone, PartialEq)]
pub struct TxError {
    cause: Error,
    rollback_cause: Option<StoreError>,
}

impl TxError {
    /// Wrap a unit-of-work failure whose rollback succeeded.
    #[must_use]
    pub const fn aborted(cause: Error) -> Self {
        Self {
            cause,
            rollback_cause: None,
        }
    }

    /// Wrap a unit-of-work failure whose rollback failed too.
    #[must_use]
    pub const fn rollback_failed(cause: Error, rollback_cause: StoreError) -> Self {
        Self {
            cause,
            rollback_cause: Some(rollback_cause),
        }
    }

    /// The error that aborted the transaction.
    #[must_use]
    pub const fn cause(&self) -> &Error {
        &self.cause
    }

    /// The rollback failure, if any.
    #[must_use]
    pub const fn rollback_cause(&self) -> Option<&StoreError> {
        self.rollback_cause.as_ref()
    }

    /// Shortcut for `self.cause().code()`.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.cause.code()
    }

    /// Drop the rollback detail and keep the cause.
    #[must_use]
    pub fn into_cause(self) -> Error {
        self.cause
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rollback_cause {
            Some(rollback) => write!(f, "{}; rollback also failed: {rollback}", self.cause),
            None => write!(f, "{}", self.cause),
        }
    }
}

impl std::error::Error for TxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl From<Error> for TxError {
    fn from(value: Error) -> Self {
        Self::aborted(value)
    }
}

/// Runs units of work atomically against a [`LedgerStore`].
#[derive(Clone)]
pub struct TxCoordinator {
    store: Arc<dyn LedgerStore>,
}

impl TxCoordinator {
    /// Build a coordinator over `store`.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Run `work` inside one transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back when it returns `Err`.
    /// A commit failure is reported as-is and never retried. If the returned
    /// future is dropped before completion, or `work` panics, the transaction
    /// is dropped unfinished and the store discards it.
    ///
    /// # Examples
    /// ```ignore
    /// use scoped_futures::ScopedFutureExt;
    ///
    /// let account = coordinator
    ///     .run_atomic(|ops| {
    ///         async move {
    ///             let account = ops.get_account(id).await?;
    ///             account.ok_or_else(|| Error::not_found("no such account"))
    ///         }
    ///         .scope_boxed()
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_atomic<'a, T, F>(&self, work: F) -> Result<T, TxError>
    where
        F: for<'r> FnOnce(&'r mut dyn LedgerOps) -> ScopedBoxFuture<'a, 'r, Result<T, Error>>
            + Send
            + 'a,
        T: Send + 'a,
    {
        let mut transaction = self
            .store
            .begin()
            .await
            .map_err(|err| TxError::aborted(Error::from(err)))?;

        match work(transaction.ops()).await {
            Ok(value) => {
                transaction.commit().await.map_err(|err| {
                    error!(error = %err, "transaction commit failed");
                    TxError::aborted(Error::from(err))
                })?;
                debug!("transaction committed");
                Ok(value)
            }
            Err(cause) => match transaction.rollback().await {
                Ok(()) => {
                    debug!(code = ?cause.code(), "transaction rolled back");
                    Err(TxError::aborted(cause))
                }
                Err(rollback) => {
                    warn!(cause = %cause, rollback = %rollback, "transaction rollback failed");
                    Err(TxError::rollback_failed(cause, rollback))
                }
            },
        }
    }
}
