//! Translation of Diesel and pool failures into port errors.
//!
//! Constraint violations keep the constraint name reported by PostgreSQL so
//! services can tell a duplicate username from a duplicate email.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use super::pool::PoolError;
use crate::domain::ports::{StoreError, TaskQueueError};

pub(super) fn map_pool_error(error: PoolError) -> StoreError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            StoreError::connection(message)
        }
    }
}

pub(super) fn map_queue_pool_error(error: PoolError) -> TaskQueueError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            TaskQueueError::connection(message)
        }
    }
}

fn constraint_of(info: &(dyn diesel::result::DatabaseErrorInformation + Send + Sync)) -> String {
    info.constraint_name().unwrap_or("unknown").to_owned()
}

pub(super) fn map_diesel_error(error: DieselError) -> StoreError {
    if let DieselError::DatabaseError(kind, info) = &error {
        debug!(?kind, message = info.message(), constraint = info.constraint_name(), "diesel operation failed");
    }
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            StoreError::unique_violation(constraint_of(info.as_ref()))
        }
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
            StoreError::foreign_key_violation(constraint_of(info.as_ref()))
        }
        DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
            StoreError::check_violation(constraint_of(info.as_ref()))
        }
        DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand,
            info,
        ) => StoreError::connection(info.message()),
        DieselError::NotFound => StoreError::row_not_found("record"),
        other => StoreError::query(other.to_string()),
    }
}

pub(super) fn map_queue_diesel_error(error: DieselError) -> TaskQueueError {
    match map_diesel_error(error) {
        StoreError::Connection { message } => TaskQueueError::connection(message),
        other => TaskQueueError::query(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    struct Info {
        constraint: Option<&'static str>,
    }

    impl diesel::result::DatabaseErrorInformation for Info {
        fn message(&self) -> &str {
            "violation"
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            None
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            self.constraint
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    fn database_error(kind: DatabaseErrorKind, constraint: Option<&'static str>) -> DieselError {
        DieselError::DatabaseError(kind, Box::new(Info { constraint }))
    }

    #[rstest]
    #[case(
        database_error(DatabaseErrorKind::UniqueViolation, Some("users_email_key")),
        StoreError::unique_violation("users_email_key")
    )]
    #[case(
        database_error(DatabaseErrorKind::ForeignKeyViolation, Some("accounts_owner_fkey")),
        StoreError::foreign_key_violation("accounts_owner_fkey")
    )]
    #[case(
        database_error(DatabaseErrorKind::CheckViolation, None),
        StoreError::check_violation("unknown")
    )]
    #[case(
        database_error(DatabaseErrorKind::ClosedConnection, None),
        StoreError::connection("violation")
    )]
    #[case(DieselError::NotFound, StoreError::row_not_found("record"))]
    fn database_errors_keep_their_category(#[case] error: DieselError, #[case] expected: StoreError) {
        assert_eq!(map_diesel_error(error), expected);
    }

    #[rstest]
    fn pool_errors_are_connection_failures() {
        assert!(map_pool_error(PoolError::checkout("timed out")).is_connection());
        assert!(map_queue_pool_error(PoolError::build("bad url")).is_connection());
    }
}
