//! Session bookkeeping for refresh-token renewal.

use std::sync::Arc;

use mockable::Clock;
use scoped_futures::ScopedFutureExt;
use tracing::info;
use uuid::Uuid;

use super::ports::{LedgerOps, StoreError};
use super::transaction::{TxCoordinator, TxError};
use super::{Error, NewSession, Session, Username};

/// Session use cases backed by the record store.
#[derive(Clone)]
pub struct SessionService {
    coordinator: TxCoordinator,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    pub fn new(coordinator: TxCoordinator, clock: Arc<dyn Clock>) -> Self {
        Self { coordinator, clock }
    }

    /// Record a session issued at login.
    ///
    /// # Errors
    ///
    /// `NotFound` when the session's user does not exist.
    pub async fn create_session(&self, session: NewSession) -> Result<Session, TxError> {
        let created = self
            .coordinator
            .run_atomic(move |ops| insert_session(ops, session).scope_boxed())
            .await?;
        info!(session_id = %created.id, username = %created.username, "session created");
        Ok(created)
    }

    /// Fetch a session.
    pub async fn get_session(&self, id: Uuid) -> Result<Session, TxError> {
        self.coordinator
            .run_atomic(move |ops| find_session(ops, id).scope_boxed())
            .await
    }

    /// Load session `id` and check it may renew an access token for
    /// `username` presenting `refresh_token`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session and `Unauthorized` when the session
    /// is blocked, belongs to someone else, holds another token, or expired.
    pub async fn check_refresh(
        &self,
        id: Uuid,
        username: &Username,
        refresh_token: &str,
    ) -> Result<Session, TxError> {
        let session = self.get_session(id).await?;
        session.check_refresh(username, refresh_token, self.clock.utc())?;
        Ok(session)
    }

    /// Block a session so it can no longer renew tokens.
    pub async fn block_session(&self, id: Uuid) -> Result<Session, TxError> {
        let blocked = self
            .coordinator
            .run_atomic(move |ops| block(ops, id).scope_boxed())
            .await?;
        info!(session_id = %blocked.id, username = %blocked.username, "session blocked");
        Ok(blocked)
    }
}

fn session_not_found(id: Uuid) -> Error {
    Error::not_found(format!("session {id} does not exist"))
}

async fn insert_session(ops: &mut dyn LedgerOps, session: NewSession) -> Result<Session, Error> {
    let username = session.username.clone();
    ops.create_session(session).await.map_err(|err| match err {
        StoreError::ForeignKeyViolation { .. } => {
            Error::not_found(format!("user {username} does not exist"))
        }
        other => Error::from(other),
    })
}

async fn find_session(ops: &mut dyn LedgerOps, id: Uuid) -> Result<Session, Error> {
    ops.get_session(id)
        .await?
        .ok_or_else(|| session_not_found(id))
}

async fn block(ops: &mut dyn LedgerOps, id: Uuid) -> Result<Session, Error> {
    ops.block_session(id)
        .await?
        .ok_or_else(|| session_not_found(id))
}
