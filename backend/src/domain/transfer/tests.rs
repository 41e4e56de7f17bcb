//! Transfer engine behaviour against the in-process store.

use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::domain::ErrorCode;
use crate::outbound::memory::InMemoryLedgerStore;
use crate::test_support::ledger::{account, entries, seed_account, seed_user};

struct Bank {
    coordinator: TxCoordinator,
    engine: TransferEngine,
}

#[fixture]
fn bank() -> Bank {
    let coordinator = TxCoordinator::new(Arc::new(InMemoryLedgerStore::default()));
    Bank {
        engine: TransferEngine::new(coordinator.clone()),
        coordinator,
    }
}

fn request(from: AccountId, to: AccountId, amount: i64) -> TransferRequest {
    TransferRequest {
        from_account_id: from,
        to_account_id: to,
        amount,
        currency: None,
    }
}

#[rstest]
#[tokio::test]
async fn transfers_move_money_then_refuse_overdrafts(bank: Bank) {
    seed_user(&bank.coordinator, "alice").await;
    seed_user(&bank.coordinator, "bob").await;
    let a = seed_account(&bank.coordinator, "alice", Currency::Usd, 100).await;
    let b = seed_account(&bank.coordinator, "bob", Currency::Usd, 50).await;

    let result = bank
        .engine
        .transfer(request(a.id, b.id, 30))
        .await
        .expect("transfer");

    assert_eq!(result.from_account.balance, 70);
    assert_eq!(result.to_account.balance, 80);
    assert_eq!(result.transfer.amount, 30);
    assert_eq!(result.from_entry.amount, -30);
    assert_eq!(result.to_entry.amount, 30);

    let err = bank
        .engine
        .transfer(request(a.id, b.id, 80))
        .await
        .expect_err("overdraft");

    assert_eq!(err.code(), ErrorCode::InsufficientFunds);
    assert_eq!(account(&bank.coordinator, a.id).await.balance, 70);
    assert_eq!(account(&bank.coordinator, b.id).await.balance, 80);
    assert_eq!(entries(&bank.coordinator, a.id).await.len(), 1);
    assert_eq!(entries(&bank.coordinator, b.id).await.len(), 1);
}

#[rstest]
#[tokio::test]
async fn transfers_towards_lower_ids_report_accounts_by_role(bank: Bank) {
    seed_user(&bank.coordinator, "alice").await;
    seed_user(&bank.coordinator, "bob").await;
    let low = seed_account(&bank.coordinator, "alice", Currency::Eur, 10).await;
    let high = seed_account(&bank.coordinator, "bob", Currency::Eur, 40).await;

    let result = bank
        .engine
        .transfer(request(high.id, low.id, 25))
        .await
        .expect("transfer");

    assert_eq!(result.from_account.id, high.id);
    assert_eq!(result.from_account.balance, 15);
    assert_eq!(result.to_account.id, low.id);
    assert_eq!(result.to_account.balance, 35);
    assert_eq!(result.from_entry.account_id, high.id);
    assert_eq!(result.to_entry.account_id, low.id);
}

#[rstest]
#[case(Currency::Cad, None)]
#[case(Currency::Usd, Some(Currency::Eur))]
#[tokio::test]
async fn currency_mismatches_conflict_and_write_nothing(
    bank: Bank,
    #[case] to_currency: Currency,
    #[case] requested: Option<Currency>,
) {
    seed_user(&bank.coordinator, "alice").await;
    seed_user(&bank.coordinator, "bob").await;
    let a = seed_account(&bank.coordinator, "alice", Currency::Usd, 100).await;
    let b = seed_account(&bank.coordinator, "bob", to_currency, 0).await;

    let err = bank
        .engine
        .transfer(TransferRequest {
            currency: requested,
            ..request(a.id, b.id, 10)
        })
        .await
        .expect_err("mismatch");

    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(account(&bank.coordinator, a.id).await.balance, 100);
    assert!(entries(&bank.coordinator, a.id).await.is_empty());
    assert!(entries(&bank.coordinator, b.id).await.is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_accounts_are_not_found(bank: Bank) {
    seed_user(&bank.coordinator, "alice").await;
    let a = seed_account(&bank.coordinator, "alice", Currency::Usd, 100).await;

    let err = bank
        .engine
        .transfer(request(a.id, AccountId::new(999), 10))
        .await
        .expect_err("missing");

    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(account(&bank.coordinator, a.id).await.balance, 100);
    assert!(entries(&bank.coordinator, a.id).await.is_empty());
}

#[rstest]
#[case(0, 2)]
#[case(-5, 2)]
#[case(10, 1)]
#[tokio::test]
async fn malformed_requests_are_rejected_before_any_write(
    bank: Bank,
    #[case] amount: i64,
    #[case] to: i64,
) {
    let err = bank
        .engine
        .transfer(request(AccountId::new(1), AccountId::new(to), amount))
        .await
        .expect_err("invalid");

    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}
