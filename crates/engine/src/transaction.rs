//! Engine transactions
//!
//! A transaction buffers writes and applies them to the database only when
//! it finalizes. Reads observe the transaction's own buffered writes.
//!
//! ## Auto-commit boundary
//!
//! The host commits a transaction as soon as nothing can issue further
//! requests against it: concretely, when the number of live [`TxnHold`]
//! guards and in-flight requests both reach zero. A caller that needs the
//! transaction to survive across suspension points takes a hold and drops
//! it when its unit of work is done.
//!
//! ## State transitions
//!
//! - `Active` → `Committing` (holds and pending requests drained)
//! - `Committing` → `Committed` (writes applied, terminal signal fired)
//! - `Active` → `Aborted` (explicit abort or injected commit failure)
//!
//! Terminal states (no transitions allowed): `Committed`, `Aborted`.
//! The terminal outcome is published on a watch channel; [`Transaction::completion`]
//! resolves only once a terminal phase is reached.

use crate::cursor::Cursor;
use crate::database::DatabaseState;
use crate::error::{HostError, HostResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use stow_core::{Key, KeyRange, Mode, Record};
use tokio::sync::watch;

/// Externally observable outcome of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Not yet finalized
    Pending,
    /// Writes durably applied
    Committed,
    /// Buffer discarded; carries a human-readable reason
    Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Active,
    Committing,
    Committed,
    Aborted,
}

pub(crate) struct TxnState {
    pub status: Status,
    pub holds: usize,
    pub pending: usize,
    /// Buffered mutations per store; `None` marks a delete
    pub writes: BTreeMap<String, BTreeMap<Key, Option<Record>>>,
}

pub(crate) struct TxnInner {
    pub db: Arc<Mutex<DatabaseState>>,
    pub stores: Vec<String>,
    pub mode: Mode,
    pub id: u64,
    pub state: Mutex<TxnState>,
    pub phase_tx: watch::Sender<Phase>,
    pub phase_rx: watch::Receiver<Phase>,
}

/// A transaction over one or more object stores
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

impl Transaction {
    pub(crate) fn begin(
        db: Arc<Mutex<DatabaseState>>,
        stores: Vec<String>,
        mode: Mode,
        id: u64,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(Phase::Pending);
        Transaction {
            inner: Arc::new(TxnInner {
                db,
                stores,
                mode,
                id,
                state: Mutex::new(TxnState {
                    status: Status::Active,
                    holds: 0,
                    pending: 0,
                    writes: BTreeMap::new(),
                }),
                phase_tx,
                phase_rx,
            }),
        }
    }

    /// Engine-assigned transaction identifier
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Transaction mode
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Stores this transaction is scoped to, deduplicated, in declaration
    /// order
    pub fn store_names(&self) -> &[String] {
        &self.inner.stores
    }

    /// Bind a store handle to this transaction
    pub fn store(&self, name: &str) -> HostResult<TxnStore> {
        if !self.inner.stores.iter().any(|s| s == name) {
            return Err(HostError::UnknownStore(name.to_string()));
        }
        let key_path = {
            let db = self.inner.db.lock();
            match db.schemas.get(name) {
                Some(schema) => schema.key_path.clone(),
                None => return Err(HostError::UnknownStore(name.to_string())),
            }
        };
        Ok(TxnStore {
            inner: self.inner.clone(),
            store: name.to_string(),
            key_path,
        })
    }

    /// Keep the transaction open until the returned guard is dropped
    pub fn hold(&self) -> HostResult<TxnHold> {
        let mut state = self.inner.state.lock();
        if state.status != Status::Active {
            return Err(HostError::TransactionFinished);
        }
        state.holds += 1;
        Ok(TxnHold {
            inner: self.inner.clone(),
        })
    }

    /// Abort the transaction, discarding all buffered writes.
    ///
    /// Fails with [`HostError::TransactionFinished`] if the transaction has
    /// already begun finalizing or reached a terminal state.
    pub fn abort(&self) -> HostResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.status != Status::Active {
                return Err(HostError::TransactionFinished);
            }
            state.status = Status::Aborted;
            state.writes.clear();
        }
        tracing::debug!(txn = self.inner.id, "transaction aborted");
        let _ = self
            .inner
            .phase_tx
            .send(Phase::Aborted("transaction aborted".to_string()));
        Ok(())
    }

    /// Current phase snapshot
    pub fn phase(&self) -> Phase {
        self.inner.phase_rx.borrow().clone()
    }

    /// Wait for the terminal outcome of this transaction
    pub async fn completion(&self) -> Phase {
        let mut rx = self.inner.phase_rx.clone();
        loop {
            let phase = rx.borrow_and_update().clone();
            if phase != Phase::Pending {
                return phase;
            }
            if rx.changed().await.is_err() {
                // Sender lives in TxnInner, which we hold; unreachable in
                // practice, but return the last published phase anyway.
                return rx.borrow().clone();
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("stores", &self.inner.stores)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Guard keeping a transaction open across suspension points
pub struct TxnHold {
    inner: Arc<TxnInner>,
}

impl Drop for TxnHold {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.holds = state.holds.saturating_sub(1);
        }
        maybe_finalize(&self.inner);
    }
}

/// In-flight request accounting; dropping the guard re-checks the
/// auto-commit boundary
pub(crate) struct RequestGuard {
    inner: Arc<TxnInner>,
}

impl RequestGuard {
    pub(crate) fn begin(inner: &Arc<TxnInner>) -> HostResult<Self> {
        let mut state = inner.state.lock();
        if state.status != Status::Active {
            return Err(HostError::TransactionFinished);
        }
        state.pending += 1;
        Ok(RequestGuard {
            inner: inner.clone(),
        })
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.pending = state.pending.saturating_sub(1);
        }
        maybe_finalize(&self.inner);
    }
}

/// Check the auto-commit boundary and finalize when it is crossed.
///
/// When a commit gate is installed (test control), finalization moves to a
/// spawned task that waits for the gate to open; the terminal signal fires
/// only after that.
pub(crate) fn maybe_finalize(inner: &Arc<TxnInner>) {
    {
        let mut state = inner.state.lock();
        if state.status != Status::Active || state.holds > 0 || state.pending > 0 {
            return;
        }
        state.status = Status::Committing;
    }
    let gate = inner.db.lock().faults.commit_gate.clone();
    match gate {
        Some(rx) if !*rx.borrow() => {
            let inner = inner.clone();
            tokio::spawn(async move {
                let mut rx = rx;
                while !*rx.borrow_and_update() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
                finalize_now(&inner);
            });
        }
        _ => finalize_now(inner),
    }
}

fn finalize_now(inner: &Arc<TxnInner>) {
    let injected = inner.db.lock().faults.fail_commit.take();
    if let Some(reason) = injected {
        {
            let mut state = inner.state.lock();
            state.writes.clear();
            state.status = Status::Aborted;
        }
        tracing::debug!(txn = inner.id, reason = %reason, "commit failed");
        let _ = inner.phase_tx.send(Phase::Aborted(reason));
        return;
    }

    let writes = {
        let mut state = inner.state.lock();
        std::mem::take(&mut state.writes)
    };
    {
        let mut db = inner.db.lock();
        for (store, entries) in writes {
            if let Some(records) = db.data.get_mut(&store) {
                for (key, value) in entries {
                    match value {
                        Some(record) => {
                            records.insert(key, record);
                        }
                        None => {
                            records.remove(&key);
                        }
                    }
                }
            }
        }
    }
    inner.state.lock().status = Status::Committed;
    tracing::debug!(txn = inner.id, "transaction committed");
    let _ = inner.phase_tx.send(Phase::Committed);
}

/// A store handle bound to one transaction
pub struct TxnStore {
    pub(crate) inner: Arc<TxnInner>,
    pub(crate) store: String,
    key_path: String,
}

impl TxnStore {
    /// Field the store's primary key is extracted from
    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    /// Insert a new record; fails if its key already exists
    pub async fn add(&self, record: Record) -> HostResult<Key> {
        self.write(record, true).await
    }

    /// Insert or overwrite a record
    pub async fn put(&self, record: Record) -> HostResult<Key> {
        self.write(record, false).await
    }

    /// Fetch a record by primary key, observing this transaction's own
    /// buffered writes
    pub async fn get(&self, key: &Key) -> HostResult<Option<Record>> {
        let _req = RequestGuard::begin(&self.inner)?;
        tokio::task::yield_now().await;
        let db = self.inner.db.lock();
        let state = self.inner.state.lock();
        if let Some(overlay) = state.writes.get(&self.store).and_then(|m| m.get(key)) {
            return Ok(overlay.clone());
        }
        Ok(db.data.get(&self.store).and_then(|m| m.get(key)).cloned())
    }

    /// Delete a record by primary key; deleting a missing key succeeds
    pub async fn delete(&self, key: &Key) -> HostResult<()> {
        let _req = RequestGuard::begin(&self.inner)?;
        if !self.inner.mode.is_write() {
            return Err(HostError::ReadOnly);
        }
        tokio::task::yield_now().await;
        self.check_write_fault()?;
        let mut state = self.inner.state.lock();
        state
            .writes
            .entry(self.store.clone())
            .or_default()
            .insert(key.clone(), None);
        Ok(())
    }

    /// Open an ascending cursor over the store, optionally restricted to a
    /// key range. The cursor counts as an in-flight request: the
    /// transaction cannot auto-commit while it is live.
    pub async fn open_cursor(&self, range: Option<KeyRange>) -> HostResult<Cursor> {
        let req = RequestGuard::begin(&self.inner)?;
        tokio::task::yield_now().await;
        let items: Vec<Record> = self
            .merged_entries()
            .into_iter()
            .filter(|(key, _)| range.as_ref().map_or(true, |r| r.contains(key)))
            .map(|(_, record)| record)
            .collect();
        Ok(Cursor::new(self.inner.clone(), req, items))
    }

    /// Open an ascending cursor over a secondary index.
    ///
    /// Records lacking a key-compatible value at the index's key path are
    /// not part of the index. Entries order by index key, then primary key.
    pub async fn open_index_cursor(
        &self,
        index: &str,
        range: Option<KeyRange>,
    ) -> HostResult<Cursor> {
        let req = RequestGuard::begin(&self.inner)?;
        tokio::task::yield_now().await;
        let index_path = {
            let db = self.inner.db.lock();
            let schema = db
                .schemas
                .get(&self.store)
                .ok_or_else(|| HostError::UnknownStore(self.store.clone()))?;
            schema
                .indexes
                .get(index)
                .cloned()
                .ok_or_else(|| HostError::UnknownIndex {
                    store: self.store.clone(),
                    index: index.to_string(),
                })?
        };
        let mut entries: Vec<(Key, Key, Record)> = self
            .merged_entries()
            .into_iter()
            .filter_map(|(primary, record)| {
                let index_key = record.get(&index_path).and_then(Key::from_value)?;
                Some((index_key, primary, record))
            })
            .filter(|(index_key, _, _)| range.as_ref().map_or(true, |r| r.contains(index_key)))
            .collect();
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        let items = entries.into_iter().map(|(_, _, record)| record).collect();
        Ok(Cursor::new(self.inner.clone(), req, items))
    }

    async fn write(&self, record: Record, require_absent: bool) -> HostResult<Key> {
        let _req = RequestGuard::begin(&self.inner)?;
        if !self.inner.mode.is_write() {
            return Err(HostError::ReadOnly);
        }
        tokio::task::yield_now().await;
        let key = record
            .get(&self.key_path)
            .and_then(Key::from_value)
            .ok_or_else(|| HostError::InvalidKey(self.key_path.clone()))?;
        self.check_write_fault()?;
        {
            let db = self.inner.db.lock();
            let mut state = self.inner.state.lock();
            if require_absent {
                let exists = match state.writes.get(&self.store).and_then(|m| m.get(&key)) {
                    Some(Some(_)) => true,
                    Some(None) => false,
                    None => db
                        .data
                        .get(&self.store)
                        .map_or(false, |m| m.contains_key(&key)),
                };
                if exists {
                    return Err(HostError::DuplicateKey(key));
                }
            }
            state
                .writes
                .entry(self.store.clone())
                .or_default()
                .insert(key.clone(), Some(record));
        }
        Ok(key)
    }

    fn check_write_fault(&self) -> HostResult<()> {
        let mut db = self.inner.db.lock();
        db.faults.write_count += 1;
        if db.faults.fail_write_at == Some(db.faults.write_count) {
            return Err(HostError::Injected("write failure".to_string()));
        }
        Ok(())
    }

    /// Committed records merged with this transaction's buffered writes,
    /// ascending by primary key
    fn merged_entries(&self) -> Vec<(Key, Record)> {
        let db = self.inner.db.lock();
        let state = self.inner.state.lock();
        let mut merged: BTreeMap<Key, Option<Record>> = db
            .data
            .get(&self.store)
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.clone(), Some(v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(overlay) = state.writes.get(&self.store) {
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
            .into_iter()
            .filter_map(|(key, value)| value.map(|record| (key, record)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemHost;
    use serde_json::json;
    use stow_core::SchemaEditor;

    async fn setup() -> crate::database::Database {
        let host = MemHost::new();
        host.open("app", 1, |ctx, _| {
            ctx.create_store("items", "id")?;
            ctx.create_index("items", "by_age", "age")
        })
        .await
        .expect("open")
    }

    #[tokio::test]
    async fn single_request_auto_commits_without_holds() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 1, "age": 20})).await.unwrap();
        assert_eq!(txn.completion().await, Phase::Committed);

        // Committed data is visible to a fresh transaction.
        let txn = db.transaction(&["items"], Mode::ReadOnly).unwrap();
        let store = txn.store("items").unwrap();
        let record = store.get(&Key::Int(1)).await.unwrap();
        assert_eq!(record, Some(json!({"id": 1, "age": 20})));
    }

    #[tokio::test]
    async fn hold_keeps_transaction_open_across_requests() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let hold = txn.hold().unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 1})).await.unwrap();
        assert_eq!(txn.phase(), Phase::Pending);
        store.add(json!({"id": 2})).await.unwrap();
        assert_eq!(txn.phase(), Phase::Pending);
        drop(hold);
        assert_eq!(txn.completion().await, Phase::Committed);
    }

    #[tokio::test]
    async fn reads_observe_buffered_writes() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let _hold = txn.hold().unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 7, "age": 70})).await.unwrap();
        let record = store.get(&Key::Int(7)).await.unwrap();
        assert_eq!(record, Some(json!({"id": 7, "age": 70})));
    }

    #[tokio::test]
    async fn abort_discards_buffered_writes() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let hold = txn.hold().unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 1})).await.unwrap();
        txn.abort().unwrap();
        drop(hold);
        assert!(matches!(txn.completion().await, Phase::Aborted(_)));

        let txn = db.transaction(&["items"], Mode::ReadOnly).unwrap();
        let store = txn.store("items").unwrap();
        assert_eq!(store.get(&Key::Int(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn abort_after_finalize_fails() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 1})).await.unwrap();
        txn.completion().await;
        assert!(matches!(txn.abort(), Err(HostError::TransactionFinished)));
    }

    #[tokio::test]
    async fn add_rejects_duplicate_keys() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let _hold = txn.hold().unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 1})).await.unwrap();
        let err = store.add(json!({"id": 1})).await.unwrap_err();
        assert!(matches!(err, HostError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn put_overwrites() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let _hold = txn.hold().unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 1, "age": 20})).await.unwrap();
        store.put(json!({"id": 1, "age": 21})).await.unwrap();
        let record = store.get(&Key::Int(1)).await.unwrap();
        assert_eq!(record, Some(json!({"id": 1, "age": 21})));
    }

    #[tokio::test]
    async fn writes_require_readwrite_mode() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadOnly).unwrap();
        // Without a hold the first rejected request would drain the
        // transaction across its auto-commit boundary.
        let _hold = txn.hold().unwrap();
        let store = txn.store("items").unwrap();
        assert!(matches!(
            store.add(json!({"id": 1})).await,
            Err(HostError::ReadOnly)
        ));
        assert!(matches!(
            store.delete(&Key::Int(1)).await,
            Err(HostError::ReadOnly)
        ));
    }

    #[tokio::test]
    async fn rejected_request_still_drains_the_auto_commit_boundary() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadOnly).unwrap();
        let store = txn.store("items").unwrap();
        assert!(matches!(
            store.add(json!({"id": 1})).await,
            Err(HostError::ReadOnly)
        ));
        // The failed request was this transaction's only activity, so it
        // finalizes; later requests see a finished transaction.
        assert_eq!(txn.completion().await, Phase::Committed);
        assert!(matches!(
            store.delete(&Key::Int(1)).await,
            Err(HostError::TransactionFinished)
        ));
    }

    #[tokio::test]
    async fn records_without_usable_key_are_rejected() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let store = txn.store("items").unwrap();
        assert!(matches!(
            store.add(json!({"name": "keyless"})).await,
            Err(HostError::InvalidKey(_))
        ));
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let store = txn.store("items").unwrap();
        assert!(matches!(
            store.add(json!({"id": null})).await,
            Err(HostError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn cursor_iterates_ascending_within_range() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        {
            let _hold = txn.hold().unwrap();
            let store = txn.store("items").unwrap();
            for id in [3, 1, 2, 5, 4] {
                store.add(json!({"id": id})).await.unwrap();
            }
        }
        txn.completion().await;

        let txn = db.transaction(&["items"], Mode::ReadOnly).unwrap();
        let store = txn.store("items").unwrap();
        let range = KeyRange::bound(2i64, 4i64, false, true).unwrap();
        let mut cursor = store.open_cursor(Some(range)).await.unwrap();
        let mut ids = Vec::new();
        while let Some(record) = cursor.next().await.unwrap() {
            ids.push(record["id"].as_i64().unwrap());
        }
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn index_cursor_orders_by_index_key_then_primary() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        {
            let _hold = txn.hold().unwrap();
            let store = txn.store("items").unwrap();
            store.add(json!({"id": 1, "age": 30})).await.unwrap();
            store.add(json!({"id": 2, "age": 20})).await.unwrap();
            store.add(json!({"id": 3, "age": 30})).await.unwrap();
            store.add(json!({"id": 4})).await.unwrap(); // not in index
        }
        txn.completion().await;

        let txn = db.transaction(&["items"], Mode::ReadOnly).unwrap();
        let store = txn.store("items").unwrap();
        let mut cursor = store.open_index_cursor("by_age", None).await.unwrap();
        let mut ids = Vec::new();
        while let Some(record) = cursor.next().await.unwrap() {
            ids.push(record["id"].as_i64().unwrap());
        }
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn unknown_index_is_rejected() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadOnly).unwrap();
        let store = txn.store("items").unwrap();
        assert!(matches!(
            store.open_index_cursor("by_ghost", None).await,
            Err(HostError::UnknownIndex { .. })
        ));
    }

    #[tokio::test]
    async fn store_binding_is_limited_to_declared_scope() {
        let host = MemHost::new();
        let db = host
            .open("app", 1, |ctx, _| {
                ctx.create_store("a", "id")?;
                ctx.create_store("b", "id")
            })
            .await
            .unwrap();
        let txn = db.transaction(&["a"], Mode::ReadOnly).unwrap();
        assert!(matches!(txn.store("b"), Err(HostError::UnknownStore(_))));
    }

    #[tokio::test]
    async fn requests_after_terminal_state_fail() {
        let db = setup().await;
        let txn = db.transaction(&["items"], Mode::ReadWrite).unwrap();
        let store = txn.store("items").unwrap();
        store.add(json!({"id": 1})).await.unwrap();
        txn.completion().await;
        assert!(matches!(
            store.add(json!({"id": 2})).await,
            Err(HostError::TransactionFinished)
        ));
    }
}
