//! Error types for StowDB
//!
//! This module defines the classified failure value used by every other
//! component. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! Every `DomainError` carries a stable kind, a human-readable message, a
//! generated identifier for correlation, a creation timestamp, and an
//! optional wrapped cause. Errors are immutable after construction and are
//! never retried automatically.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for StowDB operations
pub type Result<T> = std::result::Result<T, DomainError>;

/// Boxed error type accepted as a wrapped cause
pub type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Stable classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Database open/close/blocked failures
    Connection,
    /// Scope creation, commit, abort, or internal transaction conflict
    Transaction,
    /// Single-record CRUD or scan failure
    Query,
    /// Migration failure
    Schema,
    /// Caller-supplied malformed input
    Validation,
    /// Schema-version mismatch
    Version,
}

impl ErrorKind {
    /// Severity classification intended for operational triage,
    /// not for control flow.
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::Connection | ErrorKind::Transaction | ErrorKind::Schema => Severity::High,
            ErrorKind::Query | ErrorKind::Validation | ErrorKind::Version => Severity::Medium,
        }
    }

    /// Stable uppercase name of this kind
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Transaction => "TRANSACTION",
            ErrorKind::Query => "QUERY",
            ErrorKind::Schema => "SCHEMA",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Version => "VERSION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational severity of an error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recoverable by the caller (bad input, missing record, stale version)
    Medium,
    /// Connection, transaction, or schema level failure
    High,
}

/// Classified failure value for StowDB
///
/// Distinct from host-engine-native errors, which it wraps as its source.
/// Construct through the per-kind constructors ([`DomainError::connection`],
/// [`DomainError::transaction`], ...) or their `*_with` variants when a
/// cause is available.
#[derive(Debug, Error)]
#[error("[stowdb:{kind}] {message}")]
pub struct DomainError {
    kind: ErrorKind,
    message: String,
    id: Uuid,
    timestamp: DateTime<Utc>,
    #[source]
    source: Option<BoxedCause>,
}

impl DomainError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        DomainError {
            kind,
            message: message.into(),
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// Create an error of the given kind wrapping an original cause
    ///
    /// The cause is preserved and reachable through [`StdError::source`];
    /// it is never discarded or flattened into the message.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxedCause>,
    ) -> Self {
        DomainError {
            kind,
            message: message.into(),
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: Some(source.into()),
        }
    }

    /// `CONNECTION` error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// `CONNECTION` error with a cause
    pub fn connection_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        Self::with_source(ErrorKind::Connection, message, source)
    }

    /// `TRANSACTION` error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    /// `TRANSACTION` error with a cause
    pub fn transaction_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        Self::with_source(ErrorKind::Transaction, message, source)
    }

    /// `QUERY` error
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }

    /// `QUERY` error with a cause
    pub fn query_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        Self::with_source(ErrorKind::Query, message, source)
    }

    /// `SCHEMA` error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
    }

    /// `SCHEMA` error with a cause
    pub fn schema_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        Self::with_source(ErrorKind::Schema, message, source)
    }

    /// `VALIDATION` error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// `VALIDATION` error with a cause
    pub fn validation_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        Self::with_source(ErrorKind::Validation, message, source)
    }

    /// `VERSION` error
    pub fn version(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Version, message)
    }

    /// `VERSION` error with a cause
    pub fn version_with(message: impl Into<String>, source: impl Into<BoxedCause>) -> Self {
        Self::with_source(ErrorKind::Version, message, source)
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Check whether this error is of a specific kind
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Human-readable message, without the kind prefix
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Generated identifier for log correlation
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time of this error
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Severity of this error's kind
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Full message including the wrapped cause chain, one cause per line
    pub fn full_message(&self) -> String {
        let mut out = self.to_string();
        let mut cause: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(err) = cause {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}
