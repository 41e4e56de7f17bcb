//! Concrete background jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use scoped_futures::ScopedFutureExt;
use serde::de::DeserializeOwned;
use tracing::info;

use super::{PayloadDeleteOldAvatar, PayloadSendVerifyEmail, TaskRecord};
use crate::domain::ports::{
    BlobStore, BlobStoreError, HandlerError, LedgerOps, MailError, MailSender, OutgoingEmail,
    TaskHandler,
};
use crate::domain::transaction::{TxCoordinator, TxError};
use crate::domain::{
    EmailVerification, Error, ErrorCode, NewEmailVerification, SecretCode, User, Username,
};

/// How verification links are built and how long codes stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyEmailSettings {
    /// Page that redeems a code; `email_id` and `secret_code` are appended.
    pub link_base_url: String,
    pub code_ttl: Duration,
}

impl Default for VerifyEmailSettings {
    fn default() -> Self {
        Self {
            link_base_url: "http://localhost:8080/v1/verify_email".to_owned(),
            code_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Records a verification code for a new user and mails the link.
///
/// The verification row and the mail share one unit of work: if the mail
/// cannot be handed to the transport the row is rolled back and the task is
/// retried, so an unsent code is never left redeemable.
pub struct SendVerifyEmailHandler {
    coordinator: TxCoordinator,
    mail: Arc<dyn MailSender>,
    clock: Arc<dyn Clock>,
    settings: VerifyEmailSettings,
}

impl SendVerifyEmailHandler {
    pub fn new(
        coordinator: TxCoordinator,
        mail: Arc<dyn MailSender>,
        clock: Arc<dyn Clock>,
        settings: VerifyEmailSettings,
    ) -> Self {
        Self {
            coordinator,
            mail,
            clock,
            settings,
        }
    }
}

#[async_trait]
impl TaskHandler for SendVerifyEmailHandler {
    async fn handle(&self, task: &TaskRecord) -> Result<(), HandlerError> {
        let payload: PayloadSendVerifyEmail = decode(task)?;
        let username = Username::new(payload.username)
            .map_err(|err| HandlerError::skip_retry(err.to_string()))?;
        let ttl = TimeDelta::from_std(self.settings.code_ttl)
            .map_err(|err| HandlerError::skip_retry(format!("code ttl out of range: {err}")))?;
        let expires_at = self
            .clock
            .utc()
            .checked_add_signed(ttl)
            .ok_or_else(|| HandlerError::skip_retry("code ttl is past the last representable time"))?;
        let mail = Arc::clone(&self.mail);
        let link_base_url = self.settings.link_base_url.clone();

        let verification = self
            .coordinator
            .run_atomic(move |ops| {
                record_and_send(ops, username, expires_at, mail, link_base_url).scope_boxed()
            })
            .await
            .map_err(classify_verify_failure)?;

        info!(
            task_id = %task.id,
            kind = %task.kind,
            username = %verification.username,
            email_id = verification.id,
            "processed task"
        );
        Ok(())
    }
}

async fn record_and_send(
    ops: &mut dyn LedgerOps,
    username: Username,
    expires_at: DateTime<Utc>,
    mail: Arc<dyn MailSender>,
    link_base_url: String,
) -> Result<EmailVerification, Error> {
    let user = ops
        .get_user(&username)
        .await?
        .ok_or_else(|| Error::not_found(format!("user {username} not found")))?;
    let verification = ops
        .create_email_verification(NewEmailVerification {
            username: user.username.clone(),
            email: user.email.clone(),
            secret_code: SecretCode::generate(),
            expires_at,
        })
        .await?;
    let email = verification_email(&user, &verification, &link_base_url);
    mail.send(&email).await.map_err(|err| match err {
        MailError::Rejected { message } => Error::invalid_request(message),
        MailError::Unavailable { message } => Error::service_unavailable(message),
    })?;
    Ok(verification)
}

fn verification_email(
    user: &User,
    verification: &EmailVerification,
    link_base_url: &str,
) -> OutgoingEmail {
    let link = format!(
        "{link_base_url}?email_id={}&secret_code={}",
        verification.id,
        verification.secret_code.as_str()
    );
    let body = format!(
        "Hello {},<br/>\
         Thank you for opening an account with us!<br/>\
         Please <a href=\"{link}\">click here</a> to verify your email address.<br/>",
        user.full_name
    );
    OutgoingEmail {
        to: vec![verification.email.clone()],
        subject: "Verify your email address".to_owned(),
        body,
        attachments: Vec::new(),
    }
}

// A missing user is retried: the task can run before the transaction that
// created the user has committed.
fn classify_verify_failure(err: TxError) -> HandlerError {
    match err.code() {
        ErrorCode::InvalidRequest => HandlerError::skip_retry(err.to_string()),
        _ => HandlerError::retryable(err.to_string()),
    }
}

/// Deletes an avatar that was replaced.
pub struct DeleteOldAvatarHandler {
    blobs: Arc<dyn BlobStore>,
}

impl DeleteOldAvatarHandler {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl TaskHandler for DeleteOldAvatarHandler {
    async fn handle(&self, task: &TaskRecord) -> Result<(), HandlerError> {
        let payload: PayloadDeleteOldAvatar = decode(task)?;
        self.blobs
            .delete(std::slice::from_ref(&payload.location))
            .await
            .map_err(|err| match err {
                BlobStoreError::Io { .. } => {
                    HandlerError::retryable(format!("failed to delete avatar: {err}"))
                }
                BlobStoreError::InvalidName { .. } | BlobStoreError::ForeignLocation { .. } => {
                    HandlerError::skip_retry(err.to_string())
                }
            })?;
        info!(
            task_id = %task.id,
            kind = %task.kind,
            location = %payload.location,
            "processed task"
        );
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(task: &TaskRecord) -> Result<T, HandlerError> {
    serde_json::from_slice(&task.payload)
        .map_err(|err| HandlerError::skip_retry(format!("failed to unmarshal payload: {err}")))
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
