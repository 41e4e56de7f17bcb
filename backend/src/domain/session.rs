//! Login sessions backing refresh-token renewal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{Error, Username};

/// Persisted session row; one per successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub username: Username,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Check that this session may mint a new access token for `username`
    /// presenting `refresh_token` at `now`.
    ///
    /// # Examples
    /// ```
    /// use chrono::{Duration, Utc};
    /// use ledger::domain::{ErrorCode, Session, Username};
    /// use uuid::Uuid;
    ///
    /// let now = Utc::now();
    /// let username = Username::new("alice").expect("username");
    /// let session = Session {
    ///     id: Uuid::new_v4(),
    ///     username: username.clone(),
    ///     refresh_token: "token".into(),
    ///     user_agent: "curl".into(),
    ///     client_ip: "127.0.0.1".into(),
    ///     is_blocked: false,
    ///     expires_at: now + Duration::hours(1),
    ///     created_at: now,
    /// };
    /// assert!(session.check_refresh(&username, "token", now).is_ok());
    /// let err = session.check_refresh(&username, "other", now).expect_err("mismatch");
    /// assert_eq!(err.code(), ErrorCode::Unauthorized);
    /// ```
    pub fn check_refresh(
        &self,
        username: &Username,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        if self.is_blocked {
            return Err(Error::unauthorized("blocked session"));
        }
        if &self.username != username {
            return Err(Error::unauthorized("incorrect session user"));
        }
        if self.refresh_token != refresh_token {
            return Err(Error::unauthorized("mismatched session token"));
        }
        if now >= self.expires_at {
            return Err(Error::unauthorized("expired session"));
        }
        Ok(())
    }
}

/// Input for recording a login session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub id: Uuid,
    pub username: Username,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub expires_at: DateTime<Utc>,
}
