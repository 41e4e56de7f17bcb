//! PostgreSQL-backed [`LedgerStore`].
//!
//! Each transaction owns one pooled connection from `BEGIN` until `COMMIT`
//! or `ROLLBACK`. Row locks use `SELECT ... FOR UPDATE`.
//!
//! A transaction dropped without finishing returns its connection to the
//! pool with the transaction still open; the pool's broken-connection check
//! sees the open transaction and discards the connection, and PostgreSQL
//! rolls the work back when the session closes.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use tracing::debug;
use uuid::Uuid;

use super::diesel_error_mapping::{map_diesel_error, map_pool_error};
use super::models::{
    AccountRow, EntryRow, NewAccountRow, NewEntryRow, NewSessionRow, NewTransferRow, NewUserRow,
    NewVerifyEmailRow, SessionRow, TransferRow, UserChangeset, UserRow, VerifyEmailRow,
};
use super::pool::{DbPool, OwnedConnection};
use super::schema::{accounts, entries, sessions, transfers, users, verify_emails};
use crate::domain::ports::{LedgerOps, LedgerStore, LedgerTransaction, StoreError};
use crate::domain::{
    Account, AccountId, EmailVerification, Entry, NewAccount, NewEmailVerification, NewEntry,
    NewSession, NewTransfer, NewUser, Page, Session, Transfer, User, UserChanges, Username,
};

type Manager = AnsiTransactionManager;

/// Diesel adapter for the ledger record store.
#[derive(Clone)]
pub struct DieselLedgerStore {
    pool: DbPool,
}

impl DieselLedgerStore {
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for DieselLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError> {
        let mut conn = self.pool.get_owned().await.map_err(map_pool_error)?;
        <Manager as TransactionManager<AsyncPgConnection>>::begin_transaction(&mut *conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(Box::new(DieselTransaction { conn }))
    }
}

struct DieselTransaction {
    conn: OwnedConnection,
}

impl DieselTransaction {
    fn conn(&mut self) -> &mut AsyncPgConnection {
        &mut self.conn
    }
}

fn missing(entity: &str) -> StoreError {
    StoreError::row_not_found(entity)
}

#[async_trait]
impl LedgerOps for DieselTransaction {
    async fn create_account(&mut self, account: NewAccount) -> Result<Account, StoreError> {
        let row = NewAccountRow {
            owner: account.owner.as_str(),
            currency: account.currency.as_str(),
        };
        diesel::insert_into(accounts::table)
            .values(&row)
            .returning(AccountRow::as_returning())
            .get_result::<AccountRow>(self.conn())
            .await
            .map_err(map_diesel_error)?
            .try_into()
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        accounts::table
            .find(id.get())
            .select(AccountRow::as_select())
            .first::<AccountRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(Account::try_from)
            .transpose()
    }

    /// `FOR NO KEY UPDATE` leaves the `FOR KEY SHARE` locks taken by foreign
    /// key checks on entries and transfers free to proceed.
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        accounts::table
            .find(id.get())
            .select(AccountRow::as_select())
            .for_no_key_update()
            .first::<AccountRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(Account::try_from)
            .transpose()
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        diesel::update(accounts::table.find(id.get()))
            .set(accounts::balance.eq(accounts::balance + delta))
            .returning(AccountRow::as_returning())
            .get_result::<AccountRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .ok_or_else(|| missing("account"))?
            .try_into()
    }

    async fn list_accounts(
        &mut self,
        owner: &Username,
        page: Page,
    ) -> Result<Vec<Account>, StoreError> {
        let rows = accounts::table
            .filter(accounts::owner.eq(owner.as_str()))
            .order(accounts::id.asc())
            .limit(page.limit())
            .offset(page.offset())
            .select(AccountRow::as_select())
            .load::<AccountRow>(self.conn())
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(Account::try_from).collect()
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer, StoreError> {
        let row = NewTransferRow {
            from_account_id: transfer.from_account_id.get(),
            to_account_id: transfer.to_account_id.get(),
            amount: transfer.amount,
        };
        diesel::insert_into(transfers::table)
            .values(&row)
            .returning(TransferRow::as_returning())
            .get_result::<TransferRow>(self.conn())
            .await
            .map(Transfer::from)
            .map_err(map_diesel_error)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>, StoreError> {
        transfers::table
            .find(id)
            .select(TransferRow::as_select())
            .first::<TransferRow>(self.conn())
            .await
            .optional()
            .map(|row| row.map(Transfer::from))
            .map_err(map_diesel_error)
    }

    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry, StoreError> {
        let row = NewEntryRow {
            account_id: entry.account_id.get(),
            amount: entry.amount,
        };
        diesel::insert_into(entries::table)
            .values(&row)
            .returning(EntryRow::as_returning())
            .get_result::<EntryRow>(self.conn())
            .await
            .map(Entry::from)
            .map_err(map_diesel_error)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, StoreError> {
        entries::table
            .filter(entries::account_id.eq(account_id.get()))
            .order(entries::id.asc())
            .select(EntryRow::as_select())
            .load::<EntryRow>(self.conn())
            .await
            .map(|rows| rows.into_iter().map(Entry::from).collect())
            .map_err(map_diesel_error)
    }

    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        let row = NewUserRow {
            username: user.username.as_str(),
            role: user.role.as_str(),
            hashed_password: &user.hashed_password,
            full_name: &user.full_name,
            email: user.email.as_str(),
        };
        diesel::insert_into(users::table)
            .values(&row)
            .returning(UserRow::as_returning())
            .get_result::<UserRow>(self.conn())
            .await
            .map_err(map_diesel_error)?
            .try_into()
    }

    async fn get_user(&mut self, username: &Username) -> Result<Option<User>, StoreError> {
        users::table
            .find(username.as_str())
            .select(UserRow::as_select())
            .first::<UserRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(User::try_from)
            .transpose()
    }

    async fn lock_user(&mut self, username: &Username) -> Result<Option<User>, StoreError> {
        users::table
            .find(username.as_str())
            .select(UserRow::as_select())
            .for_no_key_update()
            .first::<UserRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(User::try_from)
            .transpose()
    }

    async fn update_user(
        &mut self,
        username: &Username,
        changes: UserChanges,
    ) -> Result<Option<User>, StoreError> {
        // Diesel rejects an UPDATE with an empty SET list.
        if changes.is_empty() {
            return self.get_user(username).await;
        }
        let changeset = UserChangeset::from(&changes);
        diesel::update(users::table.find(username.as_str()))
            .set(&changeset)
            .returning(UserRow::as_returning())
            .get_result::<UserRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(User::try_from)
            .transpose()
    }

    async fn create_session(&mut self, session: NewSession) -> Result<Session, StoreError> {
        let row = NewSessionRow {
            id: session.id,
            username: session.username.as_str(),
            refresh_token: &session.refresh_token,
            user_agent: &session.user_agent,
            client_ip: &session.client_ip,
            expires_at: session.expires_at,
        };
        diesel::insert_into(sessions::table)
            .values(&row)
            .returning(SessionRow::as_returning())
            .get_result::<SessionRow>(self.conn())
            .await
            .map_err(map_diesel_error)?
            .try_into()
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        sessions::table
            .find(id)
            .select(SessionRow::as_select())
            .first::<SessionRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(Session::try_from)
            .transpose()
    }

    async fn block_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        diesel::update(sessions::table.find(id))
            .set(sessions::is_blocked.eq(true))
            .returning(SessionRow::as_returning())
            .get_result::<SessionRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(Session::try_from)
            .transpose()
    }

    async fn create_email_verification(
        &mut self,
        verification: NewEmailVerification,
    ) -> Result<EmailVerification, StoreError> {
        let row = NewVerifyEmailRow {
            username: verification.username.as_str(),
            email: verification.email.as_str(),
            secret_code: verification.secret_code.as_str(),
            expires_at: verification.expires_at,
        };
        diesel::insert_into(verify_emails::table)
            .values(&row)
            .returning(VerifyEmailRow::as_returning())
            .get_result::<VerifyEmailRow>(self.conn())
            .await
            .map_err(map_diesel_error)?
            .try_into()
    }

    async fn lock_email_verification(
        &mut self,
        id: i64,
    ) -> Result<Option<EmailVerification>, StoreError> {
        verify_emails::table
            .find(id)
            .select(VerifyEmailRow::as_select())
            .for_update()
            .first::<VerifyEmailRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .map(EmailVerification::try_from)
            .transpose()
    }

    async fn mark_email_verification_used(
        &mut self,
        id: i64,
    ) -> Result<EmailVerification, StoreError> {
        diesel::update(verify_emails::table.find(id))
            .set(verify_emails::is_used.eq(true))
            .returning(VerifyEmailRow::as_returning())
            .get_result::<VerifyEmailRow>(self.conn())
            .await
            .optional()
            .map_err(map_diesel_error)?
            .ok_or_else(|| missing("email verification"))?
            .try_into()
    }
}

#[async_trait]
impl LedgerTransaction for DieselTransaction {
    fn ops(&mut self) -> &mut dyn LedgerOps {
        self
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        <Manager as TransactionManager<AsyncPgConnection>>::commit_transaction(self.conn())
            .await
            .map_err(map_diesel_error)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        debug!("rolling back ledger transaction");
        <Manager as TransactionManager<AsyncPgConnection>>::rollback_transaction(self.conn())
            .await
            .map_err(map_diesel_error)
    }
}
