//! Outbound adapters implementing domain ports.
//!
//! - **persistence**: PostgreSQL record store and task queue via Diesel
//! - **memory**: in-process record store and task queue
//! - **blob**: avatar storage on the local filesystem or in memory
//! - **mail**: outgoing mail
//!
//! Adapters translate between domain types and infrastructure
//! representations. They contain no business logic.

pub mod blob;
pub mod mail;
pub mod memory;
pub mod persistence;
