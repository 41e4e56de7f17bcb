//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod blob_store;
mod ledger_store;
mod mail_sender;
mod task_handler;
mod task_queue;
mod user_hooks;

#[cfg(test)]
pub use blob_store::MockBlobStore;
pub use blob_store::{BlobStore, BlobStoreError, StoredBlob};
pub use ledger_store::{
    EMAIL_CONSTRAINT, LedgerOps, LedgerStore, LedgerTransaction, OWNER_CURRENCY_CONSTRAINT,
    StoreError, USERNAME_CONSTRAINT,
};
#[cfg(test)]
pub use mail_sender::MockMailSender;
pub use mail_sender::{MailError, MailSender, OutgoingEmail};
#[cfg(test)]
pub use task_handler::MockTaskHandler;
pub use task_handler::{HandlerError, TaskHandler};
#[cfg(test)]
pub use task_queue::MockTaskQueue;
pub use task_queue::{TaskQueue, TaskQueueError};
#[cfg(test)]
pub use user_hooks::{MockAfterUserCreated, MockAvatarUpload};
pub use user_hooks::{AfterUserCreated, AvatarUpload};
