//! In-process adapters for tests and database-free deployments.

mod ledger_store;
mod task_queue;

pub use ledger_store::{InMemoryLedgerStore, InjectedFault};
pub use task_queue::InMemoryTaskQueue;
