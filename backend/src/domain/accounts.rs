//! Account opening and lookup.

use scoped_futures::ScopedFutureExt;
use tracing::info;

use super::ports::{LedgerOps, OWNER_CURRENCY_CONSTRAINT, StoreError};
use super::transaction::{TxCoordinator, TxError};
use super::{Account, AccountId, Currency, Error, NewAccount, Page, Username};

/// Account use cases backed by the record store.
#[derive(Clone)]
pub struct AccountService {
    coordinator: TxCoordinator,
}

impl AccountService {
    /// Build the service.
    #[must_use]
    pub const fn new(coordinator: TxCoordinator) -> Self {
        Self { coordinator }
    }

    /// Open a zero-balance account for `owner` in `currency`.
    ///
    /// `currency` is the raw ISO code supplied by the caller.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for unsupported currencies, `NotFound` when the
    /// owner does not exist, and `Conflict` when the owner already holds an
    /// account in that currency.
    pub async fn create_account(
        &self,
        owner: Username,
        currency: &str,
    ) -> Result<Account, TxError> {
        let currency: Currency = currency.parse().map_err(Error::from)?;
        let account = self
            .coordinator
            .run_atomic(move |ops| open_account(ops, NewAccount { owner, currency }).scope_boxed())
            .await?;
        info!(account_id = %account.id, owner = %account.owner, currency = %account.currency, "account opened");
        Ok(account)
    }

    /// Fetch one account.
    pub async fn get_account(&self, id: AccountId) -> Result<Account, TxError> {
        self.coordinator
            .run_atomic(move |ops| find_account(ops, id).scope_boxed())
            .await
    }

    /// List the accounts owned by `owner`, one page at a time.
    pub async fn list_accounts(
        &self,
        owner: Username,
        page: Page,
    ) -> Result<Vec<Account>, TxError> {
        self.coordinator
            .run_atomic(move |ops| {
                async move { ops.list_accounts(&owner, page).await.map_err(Error::from) }
                    .scope_boxed()
            })
            .await
    }
}

async fn find_account(ops: &mut dyn LedgerOps, id: AccountId) -> Result<Account, Error> {
    ops.get_account(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("account {id} does not exist")))
}

async fn open_account(ops: &mut dyn LedgerOps, account: NewAccount) -> Result<Account, Error> {
    let owner = account.owner.clone();
    let currency = account.currency;
    ops.create_account(account).await.map_err(|err| match err {
        StoreError::UniqueViolation { constraint } if constraint == OWNER_CURRENCY_CONSTRAINT => {
            Error::conflict(format!("{owner} already holds a {currency} account"))
        }
        StoreError::ForeignKeyViolation { .. } => {
            Error::not_found(format!("user {owner} does not exist"))
        }
        other => Error::from(other),
    })
}
