//! Typed access layer for StowDB
//!
//! This crate turns the host engine's raw transaction surface into the API
//! applications use: connections opened through versioned migrations,
//! repositories with CRUD and predicate queries over stores, and scoped
//! units of work that coordinate a single shared transaction across every
//! operation made inside them.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connection;
mod query;
mod repository;
mod scope;

pub use connection::{Connection, StoreAccess};
pub use repository::Repository;
