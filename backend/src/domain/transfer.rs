//! Money transfers between two accounts.
//!
//! A transfer locks both account rows in ascending id order whatever its
//! direction, then writes one transfer row, a debit entry, and a credit
//! entry, and finally moves the balances, all inside one transaction. No
//! row referencing an account is written before both locks are held, so two
//! transfers over the same pair can never wait on each other in a cycle.

use scoped_futures::ScopedFutureExt;
use serde::Serialize;
use tracing::info;

use super::ports::LedgerOps;
use super::transaction::{TxCoordinator, TxError};
use super::{Account, AccountId, Currency, Entry, Error, NewEntry, NewTransfer, Transfer};

/// Caller input for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Minor units; must be positive.
    pub amount: i64,
    /// When set, both accounts must hold this currency.
    pub currency: Option<Currency>,
}

/// Every row written by a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Executes transfers through a [`TxCoordinator`].
#[derive(Clone)]
pub struct TransferEngine {
    coordinator: TxCoordinator,
}

impl TransferEngine {
    /// Build an engine.
    #[must_use]
    pub const fn new(coordinator: TxCoordinator) -> Self {
        Self { coordinator }
    }

    /// Move `amount` from one account to another atomically.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a non-positive amount or identical accounts.
    /// - `NotFound` when either account is missing.
    /// - `Conflict` when the currencies differ from each other or from the
    ///   requested currency.
    /// - `InsufficientFunds` when the source balance would go negative.
    ///
    /// Any failure leaves every balance, entry, and transfer untouched.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferResult, TxError> {
        validate(&request)?;
        let result = self
            .coordinator
            .run_atomic(move |ops| apply_transfer(ops, request).scope_boxed())
            .await?;
        info!(
            transfer_id = result.transfer.id,
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = request.amount,
            "transfer committed"
        );
        Ok(result)
    }
}

fn validate(request: &TransferRequest) -> Result<(), Error> {
    if request.amount <= 0 {
        return Err(Error::invalid_request("transfer amount must be positive"));
    }
    if request.from_account_id == request.to_account_id {
        return Err(Error::invalid_request(
            "cannot transfer between the same account",
        ));
    }
    Ok(())
}

async fn apply_transfer(
    ops: &mut dyn LedgerOps,
    request: TransferRequest,
) -> Result<TransferResult, Error> {
    let TransferRequest {
        from_account_id,
        to_account_id,
        amount,
        ..
    } = request;

    let (first_id, second_id) = lock_order(from_account_id, to_account_id);
    check_accounts(ops, request, first_id, second_id).await?;

    let transfer = ops
        .create_transfer(NewTransfer {
            from_account_id,
            to_account_id,
            amount,
        })
        .await?;
    let from_entry = ops
        .create_entry(NewEntry {
            account_id: from_account_id,
            amount: -amount,
        })
        .await?;
    let to_entry = ops
        .create_entry(NewEntry {
            account_id: to_account_id,
            amount,
        })
        .await?;

    let first_delta = if first_id == from_account_id {
        -amount
    } else {
        amount
    };
    let updated_first = ops.add_account_balance(first_id, first_delta).await?;
    let updated_second = ops.add_account_balance(second_id, -first_delta).await?;
    let (from_account, to_account) = if updated_first.id == from_account_id {
        (updated_first, updated_second)
    } else {
        (updated_second, updated_first)
    };

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

const fn lock_order(from: AccountId, to: AccountId) -> (AccountId, AccountId) {
    if from.get() < to.get() { (from, to) } else { (to, from) }
}

/// Lock both accounts in id order and check they can carry the transfer.
///
/// Runs before any row referencing the accounts is written, so the only
/// locks a transfer takes on account rows are these, in this order.
async fn check_accounts(
    ops: &mut dyn LedgerOps,
    request: TransferRequest,
    first_id: AccountId,
    second_id: AccountId,
) -> Result<(), Error> {
    let first = lock_existing(ops, first_id).await?;
    let second = lock_existing(ops, second_id).await?;
    let (debtor, creditor) = if first.id == request.from_account_id {
        (&first, &second)
    } else {
        (&second, &first)
    };

    if debtor.currency != creditor.currency {
        return Err(Error::conflict(format!(
            "account {} holds {} but account {} holds {}",
            debtor.id, debtor.currency, creditor.id, creditor.currency
        )));
    }
    if let Some(expected) = request.currency.filter(|expected| *expected != debtor.currency) {
        return Err(Error::conflict(format!(
            "account {} currency mismatch: {} vs {expected}",
            debtor.id, debtor.currency
        )));
    }
    if debtor.balance < request.amount {
        return Err(Error::insufficient_funds(format!(
            "account {} balance {} cannot cover {}",
            debtor.id, debtor.balance, request.amount
        )));
    }
    Ok(())
}

async fn lock_existing(ops: &mut dyn LedgerOps, id: AccountId) -> Result<Account, Error> {
    ops.lock_account(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("account {id} does not exist")))
}

#[cfg(test)]
mod tests;
