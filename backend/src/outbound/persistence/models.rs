//! Diesel row structs and their conversions to domain records.
//!
//! Rows are persistence details; only the converted domain types leave this
//! module. A stored value the domain rejects (an unknown role, a malformed
//! email) surfaces as a query error instead of a panic.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{accounts, entries, sessions, tasks, transfers, users, verify_emails};
use crate::domain::ports::{StoreError, TaskQueueError};
use crate::domain::task_queue::{TaskId, TaskRecord};
use crate::domain::{
    Account, AccountId, Currency, Email, EmailVerification, Entry, Role, SecretCode, Session,
    Transfer, User, UserChanges, Username,
};

fn corrupt(table: &str, error: impl Display) -> StoreError {
    StoreError::query(format!("corrupt {table} row: {error}"))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct UserRow {
    pub username: String,
    pub role: String,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
    pub is_email_verified: bool,
    pub avatar_url: Option<String>,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            username: Username::new(row.username).map_err(|err| corrupt("users", err))?,
            role: row.role.parse::<Role>().map_err(|err| corrupt("users", err))?,
            hashed_password: row.hashed_password,
            full_name: row.full_name,
            email: Email::new(row.email).map_err(|err| corrupt("users", err))?,
            is_email_verified: row.is_email_verified,
            avatar_url: row.avatar_url,
            password_changed_at: row.password_changed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub(crate) struct NewUserRow<'a> {
    pub username: &'a str,
    pub role: &'a str,
    pub hashed_password: &'a str,
    pub full_name: &'a str,
    pub email: &'a str,
}

/// Partial user update; `None` fields are left out of the `SET` list.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users)]
pub(crate) struct UserChangeset<'a> {
    pub full_name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub hashed_password: Option<&'a str>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub is_email_verified: Option<bool>,
    pub avatar_url: Option<&'a str>,
}

impl<'a> From<&'a UserChanges> for UserChangeset<'a> {
    fn from(changes: &'a UserChanges) -> Self {
        Self {
            full_name: changes.full_name.as_deref(),
            email: changes.email.as_ref().map(Email::as_str),
            hashed_password: changes.hashed_password.as_deref(),
            password_changed_at: changes.password_changed_at,
            is_email_verified: changes.is_email_verified,
            avatar_url: changes.avatar_url.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct AccountRow {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: AccountId::new(row.id),
            owner: Username::new(row.owner).map_err(|err| corrupt("accounts", err))?,
            balance: row.balance,
            currency: row.currency.parse::<Currency>().map_err(|err| corrupt("accounts", err))?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = accounts)]
pub(crate) struct NewAccountRow<'a> {
    pub owner: &'a str,
    pub currency: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = entries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct EntryRow {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Self {
            id: row.id,
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = entries)]
pub(crate) struct NewEntryRow {
    pub account_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = transfers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TransferRow {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Self {
            id: row.id,
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transfers)]
pub(crate) struct NewTransferRow {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct SessionRow {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            username: Username::new(row.username).map_err(|err| corrupt("sessions", err))?,
            refresh_token: row.refresh_token,
            user_agent: row.user_agent,
            client_ip: row.client_ip,
            is_blocked: row.is_blocked,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sessions)]
pub(crate) struct NewSessionRow<'a> {
    pub id: Uuid,
    pub username: &'a str,
    pub refresh_token: &'a str,
    pub user_agent: &'a str,
    pub client_ip: &'a str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = verify_emails)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct VerifyEmailRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub secret_code: String,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<VerifyEmailRow> for EmailVerification {
    type Error = StoreError;

    fn try_from(row: VerifyEmailRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            username: Username::new(row.username).map_err(|err| corrupt("verify_emails", err))?,
            email: Email::new(row.email).map_err(|err| corrupt("verify_emails", err))?,
            secret_code: SecretCode::from_stored(row.secret_code),
            is_used: row.is_used,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = verify_emails)]
pub(crate) struct NewVerifyEmailRow<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub secret_code: &'a str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TaskRow {
    pub id: Uuid,
    pub kind: String,
    pub payload: Vec<u8>,
    pub queue: String,
    pub state: String,
    pub retry_count: i32,
    pub max_retry: i32,
    pub next_visible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn counter(value: i32, column: &str) -> Result<u32, TaskQueueError> {
    u32::try_from(value).map_err(|_| TaskQueueError::query(format!("negative {column}: {value}")))
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = TaskQueueError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let invalid = |err: crate::domain::task_queue::UnknownTaskValue| {
            TaskQueueError::query(format!("corrupt tasks row: {err}"))
        };
        Ok(Self {
            id: TaskId::from_uuid(row.id),
            kind: row.kind,
            payload: row.payload,
            queue: row.queue.parse().map_err(invalid)?,
            state: row.state.parse().map_err(invalid)?,
            retry_count: counter(row.retry_count, "retry_count")?,
            max_retry: counter(row.max_retry, "max_retry")?,
            next_visible_at: row.next_visible_at,
            last_error: row.last_error,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tasks)]
pub(crate) struct NewTaskRow<'a> {
    pub id: Uuid,
    pub kind: &'a str,
    pub payload: &'a [u8],
    pub queue: &'a str,
    pub state: &'a str,
    pub max_retry: i32,
    pub next_visible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
