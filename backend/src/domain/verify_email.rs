//! Redeeming email verification codes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use scoped_futures::ScopedFutureExt;
use serde::Serialize;
use tracing::info;

use super::ports::LedgerOps;
use super::transaction::{TxCoordinator, TxError};
use super::{EmailVerification, Error, User, UserChanges};

/// Rows touched by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyEmailResult {
    pub user: User,
    pub verification: EmailVerification,
}

impl VerifyEmailResult {
    /// Verified flag of the updated user.
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        self.user.is_email_verified
    }
}

/// Redeems codes mailed by the verification job.
#[derive(Clone)]
pub struct EmailVerifier {
    coordinator: TxCoordinator,
    clock: Arc<dyn Clock>,
}

impl EmailVerifier {
    pub fn new(coordinator: TxCoordinator, clock: Arc<dyn Clock>) -> Self {
        Self { coordinator, clock }
    }

    /// Mark verification `id` used and flag its user's email as verified.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `InvalidCode` when the code does not
    /// match, was already used, or has expired. A code can be redeemed once.
    pub async fn verify_email(
        &self,
        id: i64,
        secret_code: String,
    ) -> Result<VerifyEmailResult, TxError> {
        let now = self.clock.utc();
        let result = self
            .coordinator
            .run_atomic(move |ops| {
                async move { redeem(ops, id, &secret_code, now).await }.scope_boxed()
            })
            .await?;
        info!(
            email_id = id,
            username = %result.user.username,
            "email verified"
        );
        Ok(result)
    }
}

async fn redeem(
    ops: &mut dyn LedgerOps,
    id: i64,
    secret_code: &str,
    now: DateTime<Utc>,
) -> Result<VerifyEmailResult, Error> {
    let pending = ops
        .lock_email_verification(id)
        .await?
        .ok_or_else(|| Error::not_found(format!("verification {id} does not exist")))?;
    if !pending.accepts(secret_code, now) {
        return Err(Error::invalid_code(
            "verification code is invalid, used, or expired",
        ));
    }
    let verification = ops.mark_email_verification_used(id).await?;
    let changes = UserChanges {
        is_email_verified: Some(true),
        ..UserChanges::default()
    };
    let user = ops
        .update_user(&verification.username, changes)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!("user {} does not exist", verification.username))
        })?;
    Ok(VerifyEmailResult { user, verification })
}
