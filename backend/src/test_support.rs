//! Test utilities for the ledger crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Compiled for tests and under the `test-support` feature.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::{MailError, MailSender, OutgoingEmail};
use crate::domain::task_queue::BackoffJitter;

/// Clock that only moves when a test advances it.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let step = match TimeDelta::from_std(delta) {
            Ok(step) => step,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}")
            }
        };
        *self.lock_clock() += step;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    fn lock_clock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// Backoff without randomisation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _retry: u32) -> Duration {
        base
    }
}

/// Mail sender that keeps every message it accepts.
#[derive(Default)]
pub struct RecordingMailSender(Mutex<Vec<OutgoingEmail>>);

impl RecordingMailSender {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        match self.0.lock() {
            Ok(sent) => sent.clone(),
            Err(_) => panic!("mail sender mutex"),
        }
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        match self.0.lock() {
            Ok(mut sent) => sent.push(email.clone()),
            Err(_) => panic!("mail sender mutex"),
        }
        Ok(())
    }
}

pub mod ledger {
    //! Seeding and inspection helpers that go through the record store.

    use scoped_futures::ScopedFutureExt;

    use crate::domain::{
        Account, AccountId, Currency, Email, Entry, Error, NewAccount, NewUser, TxCoordinator,
        User, Username,
    };

    fn username(name: &str) -> Username {
        match Username::new(name) {
            Ok(username) => username,
            Err(error) => panic!("invalid seed username {name}: {error}"),
        }
    }

    /// Insert a depositor called `name` with address `{name}@example.com`.
    pub async fn seed_user(coordinator: &TxCoordinator, name: &str) -> User {
        let email = match Email::new(format!("{name}@example.com")) {
            Ok(email) => email,
            Err(error) => panic!("invalid seed email for {name}: {error}"),
        };
        let full_name = format!("{name} Example");
        let new_user = match NewUser::new(username(name), "hashed-secret", full_name, email) {
            Ok(user) => user,
            Err(error) => panic!("invalid seed user {name}: {error}"),
        };
        let result = coordinator
            .run_atomic(|ops| {
                async move { ops.create_user(new_user).await.map_err(Error::from) }.scope_boxed()
            })
            .await;
        match result {
            Ok(user) => user,
            Err(error) => panic!("seed user {name}: {error}"),
        }
    }

    /// Open an account for `owner` and fund it with `balance`.
    pub async fn seed_account(
        coordinator: &TxCoordinator,
        owner: &str,
        currency: Currency,
        balance: i64,
    ) -> Account {
        let new_account = NewAccount {
            owner: username(owner),
            currency,
        };
        let result = coordinator
            .run_atomic(|ops| {
                async move {
                    let opened = ops.create_account(new_account).await?;
                    if balance == 0 {
                        return Ok(opened);
                    }
                    Ok(ops.add_account_balance(opened.id, balance).await?)
                }
                .scope_boxed()
            })
            .await;
        match result {
            Ok(account) => account,
            Err(error) => panic!("seed account for {owner}: {error}"),
        }
    }

    /// Read an account in its own transaction.
    pub async fn account(coordinator: &TxCoordinator, id: AccountId) -> Account {
        let result = coordinator
            .run_atomic(|ops| {
                async move {
                    ops.get_account(id)
                        .await?
                        .ok_or_else(|| Error::not_found(format!("account {id} not found")))
                }
                .scope_boxed()
            })
            .await;
        match result {
            Ok(account) => account,
            Err(error) => panic!("read account {id}: {error}"),
        }
    }

    /// Every entry recorded against `id`, oldest first.
    pub async fn entries(coordinator: &TxCoordinator, id: AccountId) -> Vec<Entry> {
        let result = coordinator
            .run_atomic(|ops| {
                async move { ops.list_entries(id).await.map_err(Error::from) }.scope_boxed()
            })
            .await;
        match result {
            Ok(entries) => entries,
            Err(error) => panic!("list entries for {id}: {error}"),
        }
    }
}
