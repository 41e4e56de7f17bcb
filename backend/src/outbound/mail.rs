//! Mail transport that writes each message to the structured log.
//!
//! Useful for local runs and staging environments without SMTP; the log
//! line carries everything a developer needs to follow a verification link.

use async_trait::async_trait;
use tracing::info;

use crate::domain::ports::{MailError, MailSender, OutgoingEmail};

/// Logs outgoing mail at `info` instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if email.to.is_empty() {
            return Err(MailError::rejected("message has no recipients"));
        }
        let recipients = email
            .to
            .iter()
            .map(|address| address.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            to = %recipients,
            subject = %email.subject,
            body = %email.body,
            attachments = email.attachments.len(),
            "mail sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Email;

    fn email(to: Vec<Email>) -> OutgoingEmail {
        OutgoingEmail {
            to,
            subject: "hello".to_owned(),
            body: "<p>hi</p>".to_owned(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn messages_with_recipients_are_accepted() {
        let to = vec![Email::new("alice@example.com").expect("email")];
        LogMailSender.send(&email(to)).await.expect("sent");
    }

    #[tokio::test]
    async fn messages_without_recipients_are_rejected() {
        let err = LogMailSender.send(&email(Vec::new())).await.expect_err("rejected");
        assert!(err.is_rejected());
    }
}
