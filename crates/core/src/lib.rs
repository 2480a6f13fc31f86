//! Core types for StowDB
//!
//! This crate defines the foundational types used throughout the system:
//! - Key: ordered store/index key with cross-type precedence
//! - KeyRange: inclusive/exclusive bound pair for physical cursor ranges
//! - Condition, FieldPredicate, Operators: typed query predicates
//! - Mode, ConnectionConfig, Migration, SchemaEditor: configuration surface
//! - DomainError, ErrorKind, Severity: classified failure values

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod condition;
pub mod config;
pub mod error;
pub mod key;

pub use condition::{Condition, FieldPredicate, Operators};
pub use config::{ConnectionConfig, Migration, Mode, SchemaEditor, UpgradeFn};
pub use error::{BoxedCause, DomainError, ErrorKind, Result, Severity};
pub use key::{Key, KeyRange};

/// Record representation shared by every store.
///
/// Records are JSON objects; the primary key and index keys are extracted
/// from their fields by key path.
pub type Record = serde_json::Value;
