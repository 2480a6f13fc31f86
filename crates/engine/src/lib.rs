//! In-memory host storage engine for StowDB
//!
//! This crate implements the host-engine contract the access layer builds
//! on: versioned databases opened through upgrade transactions, store-set
//! scoped transactions that auto-commit when nothing can issue further
//! requests, key-range bounded cursors, and a per-transaction terminal
//! completion signal.
//!
//! The engine is deliberately small and fully in-memory. Durability, page
//! layout, and cross-process coordination are outside its contract.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cursor;
mod database;
mod error;
mod host;
mod testing;
mod transaction;

pub use cursor::Cursor;
pub use database::Database;
pub use error::{HostError, HostResult};
pub use host::{MemHost, UpgradeContext};
pub use testing::CommitGate;
pub use transaction::{Phase, Transaction, TxnHold, TxnStore};
