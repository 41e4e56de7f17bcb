//! PostgreSQL adapters for the record store and the task queue.
//!
//! Row structs (`models.rs`) and table definitions (`schema.rs`) stay private
//! to this module; adapters convert them to domain records before returning.
//! Database failures are mapped to port errors in `diesel_error_mapping.rs`.
//!
//! ```ignore
//! use ledger::outbound::persistence::{DbPool, DieselLedgerStore, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/ledger")).await?;
//! let store = DieselLedgerStore::new(pool);
//! ```

mod diesel_error_mapping;
mod diesel_ledger_store;
mod diesel_task_queue;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_ledger_store::DieselLedgerStore;
pub use diesel_task_queue::DieselTaskQueue;
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbPool, OwnedConnection, PoolConfig, PoolError};
