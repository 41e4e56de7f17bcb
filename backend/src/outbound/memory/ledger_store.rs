//! In-process [`LedgerStore`] with row locks and commit-time visibility.
//!
//! Writes are staged per transaction and become visible to other
//! transactions only at commit. `lock_*` calls and row updates take a
//! per-row `tokio::sync::Mutex` guard owned by the transaction, so two
//! transactions touching the same row serialize exactly as they would under
//! `SELECT ... FOR UPDATE`. Dropping a transaction drops its staged writes
//! and guards, which is the rollback.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use mockable::{Clock, DefaultClock};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{
    EMAIL_CONSTRAINT, LedgerOps, LedgerStore, LedgerTransaction, OWNER_CURRENCY_CONSTRAINT,
    StoreError, USERNAME_CONSTRAINT,
};
use crate::domain::{
    Account, AccountId, EmailVerification, Entry, NewAccount, NewEmailVerification, NewEntry,
    NewSession, NewTransfer, NewUser, Page, Session, Transfer, User, UserChanges, Username,
};

pub(crate) const ACCOUNT_OWNER_FKEY: &str = "accounts_owner_fkey";
pub(crate) const ENTRY_ACCOUNT_FKEY: &str = "entries_account_id_fkey";
pub(crate) const TRANSFER_FROM_FKEY: &str = "transfers_from_account_id_fkey";
pub(crate) const TRANSFER_TO_FKEY: &str = "transfers_to_account_id_fkey";
pub(crate) const SESSION_USER_FKEY: &str = "sessions_username_fkey";
pub(crate) const VERIFY_EMAIL_USER_FKEY: &str = "verify_emails_username_fkey";
pub(crate) const BALANCE_CHECK: &str = "accounts_balance_check";
pub(crate) const TRANSFER_AMOUNT_CHECK: &str = "transfers_amount_check";
pub(crate) const SESSION_PKEY: &str = "sessions_pkey";

/// Failure to simulate on the next matching transaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// `begin` fails.
    Begin,
    /// `commit` fails and the staged writes are discarded.
    Commit,
    /// `rollback` fails after the staged writes are discarded.
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Account(i64),
    User(String),
    Session(Uuid),
    EmailVerification(i64),
}

#[derive(Debug, Default, Clone)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    users: BTreeMap<String, User>,
    sessions: HashMap<Uuid, Session>,
    verifications: BTreeMap<i64, EmailVerification>,
}

#[derive(Debug, Default)]
struct Sequences {
    account: i64,
    entry: i64,
    transfer: i64,
    verification: i64,
}

impl Sequences {
    fn next(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

struct Shared {
    tables: Mutex<Tables>,
    sequences: Mutex<Sequences>,
    row_locks: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
    faults: Mutex<Vec<InjectedFault>>,
    clock: Arc<dyn Clock>,
}

fn lock_std<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::query(format!("{what} mutex poisoned")))
}

impl Shared {
    fn take_fault(&self, fault: InjectedFault) -> Result<bool, StoreError> {
        let mut faults = lock_std(&self.faults, "fault")?;
        Ok(match faults.iter().position(|queued| *queued == fault) {
            Some(index) => {
                faults.remove(index);
                true
            }
            None => false,
        })
    }

    fn row_lock(&self, key: RowKey) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        let mut locks = lock_std(&self.row_locks, "row lock")?;
        Ok(Arc::clone(locks.entry(key).or_default()))
    }

    fn next_id(&self, pick: fn(&mut Sequences) -> &mut i64) -> Result<i64, StoreError> {
        let mut sequences = lock_std(&self.sequences, "sequence")?;
        Ok(Sequences::next(pick(&mut sequences)))
    }
}

/// Thread-safe in-process record store.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new(Arc::new(DefaultClock))
    }
}

impl InMemoryLedgerStore {
    /// Build an empty store stamping rows with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                sequences: Mutex::new(Sequences::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(Vec::new()),
                clock,
            }),
        }
    }

    /// Make the next matching transaction boundary fail with a connection
    /// error. Faults queue up and are consumed one per boundary.
    pub fn inject_fault(&self, fault: InjectedFault) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.push(fault);
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError> {
        if self.shared.take_fault(InjectedFault::Begin)? {
            return Err(StoreError::connection("injected begin failure"));
        }
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged: Tables::default(),
            guards: HashMap::new(),
            inserted_users: HashSet::new(),
            finished: false,
        }))
    }
}

struct InMemoryTransaction {
    shared: Arc<Shared>,
    staged: Tables,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    inserted_users: HashSet<String>,
    finished: bool,
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                held_locks = self.guards.len(),
                "transaction dropped before completion; staged writes discarded"
            );
        }
    }
}

impl InMemoryTransaction {
    fn committed(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        lock_std(&self.shared.tables, "table")
    }

    async fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }
        let lock = self.shared.row_lock(key.clone())?;
        let guard = lock.lock_owned().await;
        self.guards.insert(key, guard);
        Ok(())
    }

    fn account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        if let Some(account) = self.staged.accounts.get(&id) {
            return Ok(Some(account.clone()));
        }
        Ok(self.committed()?.accounts.get(&id).cloned())
    }

    fn user(&self, username: &str) -> Result<Option<User>, StoreError> {
        if let Some(user) = self.staged.users.get(username) {
            return Ok(Some(user.clone()));
        }
        Ok(self.committed()?.users.get(username).cloned())
    }

    fn session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        if let Some(session) = self.staged.sessions.get(&id) {
            return Ok(Some(session.clone()));
        }
        Ok(self.committed()?.sessions.get(&id).cloned())
    }

    fn verification(&self, id: i64) -> Result<Option<EmailVerification>, StoreError> {
        if let Some(verification) = self.staged.verifications.get(&id) {
            return Ok(Some(verification.clone()));
        }
        Ok(self.committed()?.verifications.get(&id).cloned())
    }

    fn require_account(&self, id: AccountId, constraint: &str) -> Result<(), StoreError> {
        match self.account(id.get())? {
            Some(_) => Ok(()),
            None => Err(StoreError::foreign_key_violation(constraint)),
        }
    }

    fn require_user(&self, username: &Username, constraint: &str) -> Result<(), StoreError> {
        match self.user(username.as_str())? {
            Some(_) => Ok(()),
            None => Err(StoreError::foreign_key_violation(constraint)),
        }
    }

    fn email_taken(&self, email: &str, except: &str) -> Result<bool, StoreError> {
        let clash = |user: &User| user.email.as_str() == email && user.username.as_str() != except;
        if self.staged.users.values().any(clash) {
            return Ok(true);
        }
        let committed = self.committed()?;
        Ok(committed
            .users
            .values()
            .filter(|user| !self.staged.users.contains_key(user.username.as_str()))
            .any(clash))
    }

    fn release(&mut self) {
        self.staged = Tables::default();
        self.guards.clear();
        self.inserted_users.clear();
        self.finished = true;
    }

    /// Apply staged rows to the committed tables, re-checking the unique
    /// constraints that a concurrent commit may have claimed meanwhile.
    fn publish(&self) -> Result<(), StoreError> {
        let mut committed = self.committed()?;
        for (username, user) in &self.staged.users {
            if self.inserted_users.contains(username) && committed.users.contains_key(username) {
                return Err(StoreError::unique_violation(USERNAME_CONSTRAINT));
            }
            let email_clash = committed.users.values().any(|other| {
                other.username != user.username && other.email == user.email
                    && !self.staged.users.contains_key(other.username.as_str())
            });
            if email_clash {
                return Err(StoreError::unique_violation(EMAIL_CONSTRAINT));
            }
        }
        for (id, account) in &self.staged.accounts {
            if committed.accounts.contains_key(id) {
                continue;
            }
            let duplicate = committed.accounts.values().any(|other| {
                other.owner == account.owner && other.currency == account.currency
            });
            if duplicate {
                return Err(StoreError::unique_violation(OWNER_CURRENCY_CONSTRAINT));
            }
        }

        let staged = self.staged.clone();
        committed.accounts.extend(staged.accounts);
        committed.entries.extend(staged.entries);
        committed.transfers.extend(staged.transfers);
        committed.users.extend(staged.users);
        committed.sessions.extend(staged.sessions);
        committed.verifications.extend(staged.verifications);
        Ok(())
    }
}

#[async_trait]
impl LedgerOps for InMemoryTransaction {
    async fn create_account(&mut self, account: NewAccount) -> Result<Account, StoreError> {
        self.require_user(&account.owner, ACCOUNT_OWNER_FKEY)?;
        let duplicate = {
            let committed = self.committed()?;
            committed
                .accounts
                .values()
                .chain(self.staged.accounts.values())
                .any(|other| other.owner == account.owner && other.currency == account.currency)
        };
        if duplicate {
            return Err(StoreError::unique_violation(OWNER_CURRENCY_CONSTRAINT));
        }
        let id = self.shared.next_id(|seq| &mut seq.account)?;
        let row = Account {
            id: AccountId::new(id),
            owner: account.owner,
            balance: 0,
            currency: account.currency,
            created_at: self.shared.clock.utc(),
        };
        self.staged.accounts.insert(id, row.clone());
        Ok(row)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.account(id.get())
    }

    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.acquire(RowKey::Account(id.get())).await?;
        self.account(id.get())
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: i64,
    ) -> Result<Account, StoreError> {
        self.acquire(RowKey::Account(id.get())).await?;
        let mut account = self
            .account(id.get())?
            .ok_or_else(|| StoreError::row_not_found("account"))?;
        let balance = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::query("balance overflow"))?;
        if balance < 0 {
            return Err(StoreError::check_violation(BALANCE_CHECK));
        }
        account.balance = balance;
        self.staged.accounts.insert(id.get(), account.clone());
        Ok(account)
    }

    async fn list_accounts(
        &mut self,
        owner: &Username,
        page: Page,
    ) -> Result<Vec<Account>, StoreError> {
        let mut rows: BTreeMap<i64, Account> = self
            .committed()?
            .accounts
            .iter()
            .filter(|(_, account)| &account.owner == owner)
            .map(|(id, account)| (*id, account.clone()))
            .collect();
        rows.extend(
            self.staged
                .accounts
                .iter()
                .filter(|(_, account)| &account.owner == owner)
                .map(|(id, account)| (*id, account.clone())),
        );
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(0);
        Ok(rows.into_values().skip(offset).take(limit).collect())
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer, StoreError> {
        if transfer.amount <= 0 {
            return Err(StoreError::check_violation(TRANSFER_AMOUNT_CHECK));
        }
        self.require_account(transfer.from_account_id, TRANSFER_FROM_FKEY)?;
        self.require_account(transfer.to_account_id, TRANSFER_TO_FKEY)?;
        let id = self.shared.next_id(|seq| &mut seq.transfer)?;
        let row = Transfer {
            id,
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: self.shared.clock.utc(),
        };
        self.staged.transfers.insert(id, row.clone());
        Ok(row)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>, StoreError> {
        if let Some(transfer) = self.staged.transfers.get(&id) {
            return Ok(Some(transfer.clone()));
        }
        Ok(self.committed()?.transfers.get(&id).cloned())
    }

    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry, StoreError> {
        self.require_account(entry.account_id, ENTRY_ACCOUNT_FKEY)?;
        let id = self.shared.next_id(|seq| &mut seq.entry)?;
        let row = Entry {
            id,
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: self.shared.clock.utc(),
        };
        self.staged.entries.insert(id, row.clone());
        Ok(row)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>, StoreError> {
        let mut rows: BTreeMap<i64, Entry> = self
            .committed()?
            .entries
            .iter()
            .filter(|(_, entry)| entry.account_id == account_id)
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        rows.extend(
            self.staged
                .entries
                .iter()
                .filter(|(_, entry)| entry.account_id == account_id)
                .map(|(id, entry)| (*id, entry.clone())),
        );
        Ok(rows.into_values().collect())
    }

    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        if self.user(user.username.as_str())?.is_some() {
            return Err(StoreError::unique_violation(USERNAME_CONSTRAINT));
        }
        if self.email_taken(user.email.as_str(), user.username.as_str())? {
            return Err(StoreError::unique_violation(EMAIL_CONSTRAINT));
        }
        let now = self.shared.clock.utc();
        let row = User {
            username: user.username,
            role: user.role,
            hashed_password: user.hashed_password,
            full_name: user.full_name,
            email: user.email,
            is_email_verified: false,
            avatar_url: None,
            password_changed_at: now,
            created_at: now,
        };
        let key = row.username.as_str().to_owned();
        self.inserted_users.insert(key.clone());
        self.staged.users.insert(key, row.clone());
        Ok(row)
    }

    async fn get_user(&mut self, username: &Username) -> Result<Option<User>, StoreError> {
        self.user(username.as_str())
    }

    async fn lock_user(&mut self, username: &Username) -> Result<Option<User>, StoreError> {
        self.acquire(RowKey::User(username.as_str().to_owned()))
            .await?;
        self.user(username.as_str())
    }

    async fn update_user(
        &mut self,
        username: &Username,
        changes: UserChanges,
    ) -> Result<Option<User>, StoreError> {
        self.acquire(RowKey::User(username.as_str().to_owned()))
            .await?;
        let Some(mut user) = self.user(username.as_str())? else {
            return Ok(None);
        };
        if let Some(email) = &changes.email {
            if self.email_taken(email.as_str(), username.as_str())? {
                return Err(StoreError::unique_violation(EMAIL_CONSTRAINT));
            }
        }
        changes.apply_to(&mut user);
        self.staged
            .users
            .insert(username.as_str().to_owned(), user.clone());
        Ok(Some(user))
    }

    async fn create_session(&mut self, session: NewSession) -> Result<Session, StoreError> {
        self.require_user(&session.username, SESSION_USER_FKEY)?;
        if self.session(session.id)?.is_some() {
            return Err(StoreError::unique_violation(SESSION_PKEY));
        }
        let row = Session {
            id: session.id,
            username: session.username,
            refresh_token: session.refresh_token,
            user_agent: session.user_agent,
            client_ip: session.client_ip,
            is_blocked: false,
            expires_at: session.expires_at,
            created_at: self.shared.clock.utc(),
        };
        self.staged.sessions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        self.session(id)
    }

    async fn block_session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        self.acquire(RowKey::Session(id)).await?;
        let Some(mut session) = self.session(id)? else {
            return Ok(None);
        };
        session.is_blocked = true;
        self.staged.sessions.insert(id, session.clone());
        Ok(Some(session))
    }

    async fn create_email_verification(
        &mut self,
        verification: NewEmailVerification,
    ) -> Result<EmailVerification, StoreError> {
        self.require_user(&verification.username, VERIFY_EMAIL_USER_FKEY)?;
        let id = self.shared.next_id(|seq| &mut seq.verification)?;
        let row = EmailVerification {
            id,
            username: verification.username,
            email: verification.email,
            secret_code: verification.secret_code,
            is_used: false,
            created_at: self.shared.clock.utc(),
            expires_at: verification.expires_at,
        };
        self.staged.verifications.insert(id, row.clone());
        Ok(row)
    }

    async fn lock_email_verification(
        &mut self,
        id: i64,
    ) -> Result<Option<EmailVerification>, StoreError> {
        self.acquire(RowKey::EmailVerification(id)).await?;
        self.verification(id)
    }

    async fn mark_email_verification_used(
        &mut self,
        id: i64,
    ) -> Result<EmailVerification, StoreError> {
        self.acquire(RowKey::EmailVerification(id)).await?;
        let mut verification = self
            .verification(id)?
            .ok_or_else(|| StoreError::row_not_found("email verification"))?;
        verification.is_used = true;
        self.staged.verifications.insert(id, verification.clone());
        Ok(verification)
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    fn ops(&mut self) -> &mut dyn LedgerOps {
        self
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.shared.take_fault(InjectedFault::Commit)? {
            self.release();
            return Err(StoreError::connection("injected commit failure"));
        }
        let published = self.publish();
        self.release();
        published
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.release();
        if self.shared.take_fault(InjectedFault::Rollback)? {
            return Err(StoreError::connection("injected rollback failure"));
        }
        Ok(())
    }
}
