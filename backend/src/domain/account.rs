//! Accounts, ledger entries, and transfers.
//!
//! Balances are signed 64-bit integers in the currency's minor unit. An
//! account's balance only changes inside a transfer, and every transfer
//! writes exactly two entries whose amounts sum to zero.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Error, Username};

/// Identifier of an account row.
///
/// Ordering on this type is the global lock order used by transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raised when a currency code is not one the ledger supports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported currency: {0}")]
pub struct UnsupportedCurrency(pub String);

impl From<UnsupportedCurrency> for Error {
    fn from(value: UnsupportedCurrency) -> Self {
        Self::invalid_request(value.to_string())
    }
}

/// Supported account currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "&'static str", try_from = "String")]
pub enum Currency {
    Usd,
    Eur,
    Cad,
}

impl Currency {
    /// Every supported currency.
    pub const ALL: [Self; 3] = [Self::Usd, Self::Eur, Self::Cad];

    /// ISO 4217 code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Cad => "CAD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = UnsupportedCurrency;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|currency| currency.as_str() == value)
            .ok_or_else(|| UnsupportedCurrency(value.to_owned()))
    }
}

impl From<Currency> for &'static str {
    fn from(value: Currency) -> Self {
        value.as_str()
    }
}

impl TryFrom<String> for Currency {
    type Error = UnsupportedCurrency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Persisted account row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: Username,
    pub balance: i64,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

/// Input for opening an account; balance starts at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner: Username,
    pub currency: Currency,
}

/// One side of a balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: i64,
    pub account_id: AccountId,
    /// Negative when money leaves the account.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for recording an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: i64,
}

/// Record of money moved between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// Smallest accepted page size for account listings.
pub const PAGE_SIZE_MIN: i64 = 5;
/// Largest accepted page size for account listings.
pub const PAGE_SIZE_MAX: i64 = 10;

/// Limit/offset window over an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    limit: i64,
    offset: i64,
}

impl Page {
    /// Build a window from a 1-based page number and a page size.
    ///
    /// # Examples
    /// ```
    /// use ledger::domain::Page;
    ///
    /// let page = Page::new(3, 5).expect("valid page");
    /// assert_eq!((page.limit(), page.offset()), (5, 10));
    /// assert!(Page::new(0, 5).is_err());
    /// ```
    pub fn new(page_id: i64, page_size: i64) -> Result<Self, Error> {
        if page_id < 1 {
            return Err(Error::invalid_request("page_id must be at least 1"));
        }
        if !(PAGE_SIZE_MIN..=PAGE_SIZE_MAX).contains(&page_size) {
            return Err(Error::invalid_request(format!(
                "page_size must be between {PAGE_SIZE_MIN} and {PAGE_SIZE_MAX}"
            )));
        }
        let offset = (page_id - 1)
            .checked_mul(page_size)
            .ok_or_else(|| Error::invalid_request("page_id is too large"))?;
        Ok(Self {
            limit: page_size,
            offset,
        })
    }

    /// Maximum number of rows returned.
    #[must_use]
    pub const fn limit(self) -> i64 {
        self.limit
    }

    /// Number of rows skipped.
    #[must_use]
    pub const fn offset(self) -> i64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    //! Coverage for currency parsing and paging rules.

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("USD", Currency::Usd)]
    #[case("EUR", Currency::Eur)]
    #[case("CAD", Currency::Cad)]
    fn supported_currencies_parse(#[case] raw: &str, #[case] expected: Currency) {
        assert_eq!(raw.parse::<Currency>(), Ok(expected));
        assert_eq!(expected.to_string(), raw);
    }

    #[rstest]
    #[case("usd")]
    #[case("GBP")]
    #[case("")]
    fn unsupported_currencies_are_rejected(#[case] raw: &str) {
        let error = raw.parse::<Currency>().expect_err("must reject");
        assert_eq!(
            Error::from(error).code(),
            crate::domain::ErrorCode::InvalidRequest
        );
    }

    #[rstest]
    #[case(1, 5, 5, 0)]
    #[case(2, 10, 10, 10)]
    fn pages_translate_to_limit_and_offset(
        #[case] page_id: i64,
        #[case] size: i64,
        #[case] limit: i64,
        #[case] offset: i64,
    ) {
        let page = Page::new(page_id, size).expect("valid page");
        assert_eq!((page.limit(), page.offset()), (limit, offset));
    }

    #[rstest]
    #[case(0, 5)]
    #[case(1, 4)]
    #[case(1, 11)]
    fn out_of_range_pages_are_rejected(#[case] page_id: i64, #[case] size: i64) {
        assert!(Page::new(page_id, size).is_err());
    }
}
