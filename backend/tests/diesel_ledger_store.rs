//! `DieselLedgerStore` against embedded PostgreSQL.
//!
//! These suites exercise the row locks, foreign keys and constraint names
//! the in-process store only imitates. Set `SKIP_TEST_CLUSTER=1` where the
//! embedded cluster cannot start.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use ledger::domain::ports::AfterUserCreated;
use ledger::domain::{
    AccountId, Currency, Email, Error, ErrorCode, NewUser, TransferEngine, TransferRequest,
    TxCoordinator, User, UserLifecycle, Username,
};
use ledger::outbound::persistence::{DbPool, DieselLedgerStore, PoolConfig};
use ledger::test_support::ledger::{account, entries, seed_account, seed_user};
use mockable::DefaultClock;
use pg_embedded_setup_unpriv::TemporaryDatabase;
use rstest::{fixture, rstest};
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::time::timeout;

#[path = "support/embedded_postgres.rs"]
mod embedded_postgres;

use embedded_postgres::{handle_cluster_setup_failure, provision_database};

const DEADLINE: Duration = Duration::from_secs(30);

struct TestContext {
    runtime: Runtime,
    coordinator: TxCoordinator,
    _database: TemporaryDatabase,
}

fn setup_context() -> Result<TestContext, String> {
    let runtime = Runtime::new().map_err(|err| err.to_string())?;
    let database = provision_database()?;
    let config = PoolConfig::new(database.url())
        .with_max_size(12)
        .with_min_idle(Some(1));
    let pool = runtime
        .block_on(async { DbPool::new(config).await })
        .map_err(|err| err.to_string())?;
    Ok(TestContext {
        runtime,
        coordinator: TxCoordinator::new(Arc::new(DieselLedgerStore::new(pool))),
        _database: database,
    })
}

#[fixture]
fn diesel_ledger() -> Option<TestContext> {
    match setup_context() {
        Ok(ctx) => Some(ctx),
        Err(reason) => handle_cluster_setup_failure(reason),
    }
}

impl TestContext {
    fn funded_pair(&self, first: i64, second: i64) -> (AccountId, AccountId) {
        self.runtime.block_on(async {
            seed_user(&self.coordinator, "alice").await;
            seed_user(&self.coordinator, "bob").await;
            let a = seed_account(&self.coordinator, "alice", Currency::Usd, first).await;
            let b = seed_account(&self.coordinator, "bob", Currency::Usd, second).await;
            (a.id, b.id)
        })
    }

    fn balance(&self, id: AccountId) -> i64 {
        self.runtime
            .block_on(account(&self.coordinator, id))
            .balance
    }
}

fn request(from: AccountId, to: AccountId, amount: i64) -> TransferRequest {
    TransferRequest {
        from_account_id: from,
        to_account_id: to,
        amount,
        currency: Some(Currency::Usd),
    }
}

struct NoFollowUp;

#[async_trait]
impl AfterUserCreated for NoFollowUp {
    async fn after_create(&self, _user: &User) -> Result<(), Error> {
        Ok(())
    }
}

fn new_user(name: &str, email: &str) -> NewUser {
    NewUser::new(
        Username::new(name).expect("username"),
        "$2a$10$hash",
        format!("{name} Example"),
        Email::new(email).expect("email"),
    )
    .expect("new user")
}

#[rstest]
fn transfers_move_balances_and_record_entries(diesel_ledger: Option<TestContext>) {
    let Some(ctx) = diesel_ledger else {
        return;
    };
    let (a, b) = ctx.funded_pair(100, 50);
    let engine = TransferEngine::new(ctx.coordinator.clone());

    let result = ctx
        .runtime
        .block_on(engine.transfer(request(a, b, 30)))
        .expect("transfer");

    assert_eq!(result.from_account.balance, 70);
    assert_eq!(result.to_account.balance, 80);
    assert_eq!(result.from_entry.amount, -30);
    assert_eq!(result.to_entry.amount, 30);
    assert_eq!(ctx.balance(a), 70);
    assert_eq!(ctx.balance(b), 80);
    let recorded = ctx.runtime.block_on(entries(&ctx.coordinator, a));
    assert_eq!(recorded.len(), 1);
}

#[rstest]
fn opposing_transfers_finish_without_deadlock(diesel_ledger: Option<TestContext>) {
    let Some(ctx) = diesel_ledger else {
        return;
    };
    let (a, b) = ctx.funded_pair(1_000, 1_000);
    let engine = TransferEngine::new(ctx.coordinator.clone());

    let results = ctx.runtime.block_on(async {
        let handles = (0..10).map(|i| {
            let worker = engine.clone();
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tokio::spawn(async move { worker.transfer(request(from, to, 10)).await })
        });
        timeout(DEADLINE, join_all(handles)).await
    });

    let failures: Vec<String> = results
        .expect("opposing transfers stalled")
        .into_iter()
        .filter_map(|joined| match joined.expect("transfer task panicked") {
            Ok(_) => None,
            Err(err) => Some(err.to_string()),
        })
        .collect();
    assert!(failures.is_empty(), "failed transfers: {failures:?}");
    assert_eq!(ctx.balance(a), 1_000);
    assert_eq!(ctx.balance(b), 1_000);
}

#[rstest]
fn concurrent_overdrafts_stop_at_zero(diesel_ledger: Option<TestContext>) {
    let Some(ctx) = diesel_ledger else {
        return;
    };
    let (a, b) = ctx.funded_pair(100, 0);
    let engine = TransferEngine::new(ctx.coordinator.clone());

    let results = ctx.runtime.block_on(async {
        let handles = (0..10).map(|_| {
            let worker = engine.clone();
            tokio::spawn(async move { worker.transfer(request(a, b, 30)).await })
        });
        timeout(DEADLINE, join_all(handles)).await
    });

    let mut succeeded = 0;
    for joined in results.expect("transfers stalled") {
        match joined.expect("transfer task panicked") {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(err.code(), ErrorCode::InsufficientFunds, "{err}"),
        }
    }
    assert_eq!(succeeded, 3);
    assert_eq!(ctx.balance(a), 10);
    assert_eq!(ctx.balance(b), 90);
}

#[rstest]
#[case::username(("carol", "carol.two@example.com"), "duplicate_username")]
#[case::email(("carla", "carol@example.com"), "duplicate_email")]
fn user_clashes_map_to_conflicts(
    diesel_ledger: Option<TestContext>,
    #[case] clash: (&str, &str),
    #[case] reason: &str,
) {
    let Some(ctx) = diesel_ledger else {
        return;
    };
    let users = UserLifecycle::new(ctx.coordinator.clone(), Arc::new(DefaultClock));
    ctx.runtime
        .block_on(users.create_user(new_user("carol", "carol@example.com"), &NoFollowUp))
        .expect("first user");

    let (name, email) = clash;
    let err = ctx
        .runtime
        .block_on(users.create_user(new_user(name, email), &NoFollowUp))
        .expect_err("clash");

    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(err.cause().details(), Some(&json!({ "reason": reason })));
}

#[rstest]
fn transfers_to_missing_accounts_write_nothing(diesel_ledger: Option<TestContext>) {
    let Some(ctx) = diesel_ledger else {
        return;
    };
    let (a, _) = ctx.funded_pair(100, 0);
    let engine = TransferEngine::new(ctx.coordinator.clone());

    let err = ctx
        .runtime
        .block_on(engine.transfer(request(a, AccountId::new(9_999), 10)))
        .expect_err("missing account");

    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(ctx.balance(a), 100);
    assert!(ctx.runtime.block_on(entries(&ctx.coordinator, a)).is_empty());
}
