//! Database handle and shared state
//!
//! A [`Database`] is one open handle onto a named database. Handles are
//! cheap to clone; all of them share the same underlying state. Closing a
//! handle releases its connection slot but leaves in-flight transactions
//! to run to their own completion.

use crate::error::{HostError, HostResult};
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stow_core::{Key, Mode, Record};
use tokio::sync::watch;

/// Schema of one object store
#[derive(Debug, Clone)]
pub(crate) struct StoreSchema {
    /// Field the primary key is extracted from
    pub key_path: String,
    /// Index name to index key path
    pub indexes: BTreeMap<String, String>,
}

/// Fault-injection and instrumentation state, all test-facing
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub fail_write_at: Option<u64>,
    pub write_count: u64,
    pub fail_cursor_at: Option<u64>,
    pub cursor_count: u64,
    pub fail_commit: Option<String>,
    pub commit_gate: Option<watch::Receiver<bool>>,
}

/// Shared state of one named database
pub(crate) struct DatabaseState {
    pub name: String,
    pub version: u32,
    pub schemas: BTreeMap<String, StoreSchema>,
    pub data: BTreeMap<String, BTreeMap<Key, Record>>,
    pub connections: usize,
    pub txns_opened: u64,
    pub faults: Faults,
}

impl DatabaseState {
    pub fn new(name: &str) -> Self {
        DatabaseState {
            name: name.to_string(),
            version: 0,
            schemas: BTreeMap::new(),
            data: BTreeMap::new(),
            connections: 0,
            txns_opened: 0,
            faults: Faults::default(),
        }
    }
}

/// One open handle onto a named database
#[derive(Clone)]
pub struct Database {
    pub(crate) state: Arc<Mutex<DatabaseState>>,
    closed: Arc<AtomicBool>,
}

impl Database {
    pub(crate) fn new(state: Arc<Mutex<DatabaseState>>) -> Self {
        Database {
            state,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Database name
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Stored schema version
    pub fn version(&self) -> u32 {
        self.state.lock().version
    }

    /// Names of all object stores in the current schema
    pub fn store_names(&self) -> Vec<String> {
        self.state.lock().schemas.keys().cloned().collect()
    }

    /// Create a transaction scoped to `stores` in `mode`.
    ///
    /// Store names are deduplicated preserving first occurrence. Fails for
    /// an empty set, an unknown store, or a closed handle.
    pub fn transaction(&self, stores: &[&str], mode: Mode) -> HostResult<Transaction> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::ConnectionClosed);
        }
        if stores.is_empty() {
            return Err(HostError::EmptyStoreSet);
        }
        let mut deduped: Vec<String> = Vec::with_capacity(stores.len());
        for name in stores {
            if !deduped.iter().any(|s| s == name) {
                deduped.push((*name).to_string());
            }
        }
        let id = {
            let mut state = self.state.lock();
            for name in &deduped {
                if !state.schemas.contains_key(name) {
                    return Err(HostError::UnknownStore(name.clone()));
                }
            }
            state.txns_opened += 1;
            state.txns_opened
        };
        Ok(Transaction::begin(self.state.clone(), deduped, mode, id))
    }

    /// Close this handle. Idempotent.
    ///
    /// Transactions created before close continue to their own completion;
    /// no new transaction may be created through this handle.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut state = self.state.lock();
            state.connections = state.connections.saturating_sub(1);
            tracing::debug!(db = %state.name, "database handle closed");
        }
    }

    /// Whether this handle has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Database")
            .field("name", &state.name)
            .field("version", &state.version)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
