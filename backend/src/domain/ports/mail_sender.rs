//! Port abstraction for outbound email.
use async_trait::async_trait;

use crate::domain::Email;

use super::define_port_error;

define_port_error! {
    /// Errors raised by mail transports.
    pub enum MailError {
        /// The transport could not be reached.
        Unavailable { message: String } => "mail transport unavailable: {message}",
        /// The transport refused the message.
        Rejected { message: String } => "mail rejected: {message}",
    }
}

/// A fully rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Vec<Email>,
    pub subject: String,
    /// HTML body.
    pub body: String,
    /// Paths of files to attach.
    pub attachments: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Deliver `email` to the transport.
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}
