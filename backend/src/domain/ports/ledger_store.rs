//! Port abstraction for the transactional record store.
//!
//! A [`LedgerStore`] opens transactions. Every read and write goes through
//! the [`LedgerOps`] handle of an open [`LedgerTransaction`]; there is no
//! autocommit path. The `lock_*` operations take a row lock that is held
//! until the transaction ends, with `SELECT ... FOR UPDATE` semantics.
//!
//! Implementations must roll back when a transaction is dropped without
//! calling [`LedgerTransaction::commit`]; this is how cancelled and panicking
//! units of work release their locks.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, EmailVerification, Entry, NewAccount, NewEmailVerification, NewEntry,
    NewSession, NewTransfer, NewUser, Page, Session, Transfer, User, UserChanges, Username,
};

use super::define_port_error;

/// Primary key constraint of the users table.
pub const USERNAME_CONSTRAINT: &str = "users_pkey";
/// Unique constraint on user emails.
pub const EMAIL_CONSTRAINT: &str = "users_email_key";
/// Unique constraint allowing one account per owner and currency.
pub const OWNER_CURRENCY_CONSTRAINT: &str = "owner_currency_key";

define_port_error! {
    /// Errors raised by record store adapters.
    pub enum StoreError {
        /// The store could not be reached or the connection dropped.
        Connection { message: String } => "record store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "record store query failed: {message}",
        /// A unique constraint rejected the write.
        UniqueViolation { constraint: String } => "unique constraint violated: {constraint}",
        /// A foreign key referenced a missing row.
        ForeignKeyViolation { constraint: String } => "foreign key constraint violated: {constraint}",
        /// A check constraint rejected the write.
        CheckViolation { constraint: String } => "check constraint violated: {constraint}",
        /// An update targeted a row that does not exist.
        RowNotFound { entity: String } => "{entity} not found",
    }
}

/// Row-level operations available inside an open transaction.
#[async_trait]
pub trait LedgerOps: Send {
    /// Insert an account with a zero balance.
    async fn create_account(&mut self, account: NewAccount) -> Result<Account, StoreError>;

    /// Read an account without locking it.
    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Read an account and hold its row lock until the transaction ends.
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Add `delta` to the balance and return the updated row.
    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError>;

    /// List an owner's accounts ordered by id.
    async fn list_accounts(
        &mut self,
        owner: &Username,
        page: Page,
    ) -> Result<Vec<Account>, StoreError>;

    /// Insert a transfer record.
    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer, StoreError>;

    /// Read a transfer record.
    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>, StoreError>;

    /// Insert an entry; the account must exist.
    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry, StoreError>;

    /// List an account's entries ordered by id.
    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, StoreError>;

    /// Insert a user.
    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError>;

    /// Read a user without locking it.
    async fn get_user(&mut self, username: &Username) -> Result<Option<User>, StoreError>;

    /// Read a user and hold its row lock until the transaction ends.
    async fn lock_user(&mut self, username: &Username) -> Result<Option<User>, StoreError>;

    /// Apply `changes` and return the updated row, or `None` when absent.
    async fn update_user(
        &mut self,
        username: &Username,
        changes: UserChanges,
    ) -> Result<Option<User>, StoreError>;

    /// Insert a session.
    async fn create_session(&mut self, session: NewSession) -> Result<Session, StoreError>;

    /// Read a session.
    async fn get_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Mark a session blocked and return it, or `None` when absent.
    async fn block_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Insert an email verification record.
    async fn create_email_verification(
        &mut self,
        verification: NewEmailVerification,
    ) -> Result<EmailVerification, StoreError>;

    /// Read a verification record and hold its row lock.
    async fn lock_email_verification(
        &mut self,
        id: i64,
    ) -> Result<Option<EmailVerification>, StoreError>;

    /// Flag a verification record as used.
    async fn mark_email_verification_used(
        &mut self,
        id: i64,
    ) -> Result<EmailVerification, StoreError>;
}

/// An open transaction. Exactly one of `commit` or `rollback` is called.
#[async_trait]
pub trait LedgerTransaction: LedgerOps {
    /// Borrow the row-level operations of this transaction.
    fn ops(&mut self) -> &mut dyn LedgerOps;

    /// Make every write of this transaction durable and release its locks.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every write of this transaction and release its locks.
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Factory for transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError>;
}
