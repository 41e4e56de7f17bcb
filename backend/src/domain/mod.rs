//! Domain primitives, services, and ports.
//!
//! Purpose: hold the ledger's business rules independent of storage and
//! transport. Services run every multi-row change through
//! [`TxCoordinator::run_atomic`]; adapters live in `crate::outbound` and
//! plug in through the traits in [`ports`].
//!
//! Public surface:
//! - Error / ErrorCode: failure taxonomy shared by every service.
//! - Account, Entry, Transfer, User, Session, EmailVerification: records.
//! - TransferEngine, AccountService, UserLifecycle, SessionService,
//!   EmailVerifier: use cases.
//! - task_queue: durable background jobs that follow committed writes.

mod account;
pub mod accounts;
mod email_verification;
pub mod error;
pub mod ports;
mod session;
pub mod sessions;
pub mod task_queue;
pub mod transaction;
pub mod transfer;
mod user;
pub mod user_lifecycle;
pub mod verify_email;

pub use self::account::{
    Account, AccountId, Currency, Entry, NewAccount, NewEntry, NewTransfer, PAGE_SIZE_MAX,
    PAGE_SIZE_MIN, Page, Transfer, UnsupportedCurrency,
};
pub use self::accounts::AccountService;
pub use self::email_verification::{
    EmailVerification, NewEmailVerification, SECRET_CODE_LEN, SecretCode,
};
pub use self::error::{Error, ErrorCode};
pub use self::session::{NewSession, Session};
pub use self::sessions::SessionService;
pub use self::transaction::{TxCoordinator, TxError};
pub use self::transfer::{TransferEngine, TransferRequest, TransferResult};
pub use self::user::{
    EMAIL_MAX, Email, FULL_NAME_MAX, NewUser, Role, USERNAME_MAX, USERNAME_MIN,
    UpdateUserRequest, User, UserChanges, UserValidationError, Username, avatar_filename,
};
pub use self::user_lifecycle::{
    AvatarReplacement, AvatarUpdate, BlobAvatarUpload, EnqueueVerifyEmail, UserLifecycle,
};
pub use self::verify_email::{EmailVerifier, VerifyEmailResult};
