//! Host-engine-native error types
//!
//! These are the failures the storage engine itself reports. The access
//! layer above never exposes them directly; it wraps them into classified
//! `DomainError`s with the host error preserved as the source.

use stow_core::{DomainError, Key};
use thiserror::Error;

/// Result type alias for host engine operations
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Failure reported by the host storage engine
#[derive(Debug, Error)]
pub enum HostError {
    /// An upgrade open was requested while another connection holds the
    /// database at an older version
    #[error("database is blocked by another open connection")]
    Blocked,

    /// The requested version is below the stored schema version
    #[error("requested version {requested} is below stored version {stored}")]
    VersionMismatch {
        /// Version the open asked for
        requested: u32,
        /// Version currently stored
        stored: u32,
    },

    /// A migration failed inside the upgrade transaction; schema changes
    /// made by the failed upgrade were rolled back
    #[error("upgrade aborted")]
    UpgradeAborted(#[source] DomainError),

    /// The named object store does not exist in the current schema
    #[error("unknown object store: {0}")]
    UnknownStore(String),

    /// The named index does not exist on the store
    #[error("unknown index {index} on store {store}")]
    UnknownIndex {
        /// Store the lookup targeted
        store: String,
        /// Index name that was not found
        index: String,
    },

    /// An `add` targeted a key that already exists
    #[error("duplicate key: {0}")]
    DuplicateKey(Key),

    /// The record has no key-compatible value at the store's key path
    #[error("record has no usable key at path {0:?}")]
    InvalidKey(String),

    /// A mutation was attempted on a read-only transaction
    #[error("write attempted on a read-only transaction")]
    ReadOnly,

    /// The transaction has already committed, aborted, or begun finalizing
    #[error("transaction is no longer active")]
    TransactionFinished,

    /// A transaction was requested with an empty store set
    #[error("store set must not be empty")]
    EmptyStoreSet,

    /// The database handle was closed
    #[error("database handle is closed")]
    ConnectionClosed,

    /// Fault injected by a test control
    #[error("injected fault: {0}")]
    Injected(String),
}
