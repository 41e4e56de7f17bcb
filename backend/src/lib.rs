//! Transactional ledger core with a durable background task queue.
//!
//! `domain` holds the business rules and ports, `outbound` the adapters
//! (Diesel/PostgreSQL, in-process, filesystem, logging mail), and `config`
//! the runtime settings used by the worker binary.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
