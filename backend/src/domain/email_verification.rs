//! Email verification records and the single-use code that redeems them.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;

use super::{Email, Username};

/// Length of generated secret codes.
pub const SECRET_CODE_LEN: usize = 32;

/// Random code mailed to the user and presented back to verify the address.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretCode(String);

impl SecretCode {
    /// Draw a fresh alphanumeric code from the thread-local RNG.
    #[must_use]
    pub fn generate() -> Self {
        let code = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_CODE_LEN)
            .map(char::from)
            .collect();
        Self(code)
    }

    /// Wrap an existing code, e.g. one loaded from storage.
    pub fn from_stored(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Borrow the code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SecretCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretCode(..)")
    }
}

/// Persisted verification record created for each verification email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailVerification {
    pub id: i64,
    pub username: Username,
    pub email: Email,
    #[serde(skip_serializing)]
    pub secret_code: SecretCode,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EmailVerification {
    /// True when `code` may redeem this record at `now`.
    #[must_use]
    pub fn accepts(&self, code: &str, now: DateTime<Utc>) -> bool {
        !self.is_used && now < self.expires_at && self.secret_code.as_str() == code
    }
}

/// Input for recording a verification email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEmailVerification {
    pub username: Username,
    pub email: Email,
    pub secret_code: SecretCode,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    //! Coverage for code generation and redemption rules.

    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::{fixture, rstest};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).single().expect("time")
    }

    #[fixture]
    fn record(now: DateTime<Utc>) -> EmailVerification {
        EmailVerification {
            id: 1,
            username: Username::new("alice").expect("username"),
            email: Email::new("alice@example.com").expect("email"),
            secret_code: SecretCode::from_stored("abc"),
            is_used: false,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        }
    }

    #[rstest]
    fn generated_codes_are_alphanumeric_and_distinct() {
        let first = SecretCode::generate();
        let second = SecretCode::generate();
        assert_eq!(first.as_str().len(), SECRET_CODE_LEN);
        assert!(first.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }

    #[rstest]
    fn debug_output_hides_the_code() {
        assert_eq!(format!("{:?}", SecretCode::from_stored("abc")), "SecretCode(..)");
    }

    #[rstest]
    fn matching_unused_unexpired_code_is_accepted(record: EmailVerification, now: DateTime<Utc>) {
        assert!(record.accepts("abc", now));
    }

    #[rstest]
    fn wrong_code_is_rejected(record: EmailVerification, now: DateTime<Utc>) {
        assert!(!record.accepts("abd", now));
    }

    #[rstest]
    fn used_record_is_rejected(mut record: EmailVerification, now: DateTime<Utc>) {
        record.is_used = true;
        assert!(!record.accepts("abc", now));
    }

    #[rstest]
    fn expired_record_is_rejected(record: EmailVerification, now: DateTime<Utc>) {
        assert!(!record.accepts("abc", now + Duration::minutes(15)));
    }
}
