//! Side-effect capabilities injected into user lifecycle transactions.
//!
//! Both run while the database transaction is still open. A failure aborts
//! the transaction, but a side effect that succeeded is not undone if the
//! commit itself later fails.
use async_trait::async_trait;

use crate::domain::{Error, User};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AfterUserCreated: Send + Sync {
    /// Called with the inserted user before the insert commits.
    async fn after_create(&self, user: &User) -> Result<(), Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvatarUpload: Send + Sync {
    /// Store the avatar bytes under `filename` and return their location.
    async fn upload(&self, filename: &str) -> Result<String, Error>;
}
