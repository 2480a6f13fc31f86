//! Typed store access
//!
//! A [`Repository`] wraps one named store on a connection. Every operation
//! binds the store through the connection's active-transaction slot, so the
//! same repository call participates in a surrounding scope when one is
//! running and falls back to a short-lived auto-committing transaction when
//! none is.

use crate::connection::Connection;
use stow_core::{Condition, DomainError, Key, Mode, Record, Result};
use stow_engine::HostError;

/// CRUD and query surface over one store
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
    store: String,
}

impl Repository {
    pub(crate) fn new(conn: Connection, store: String) -> Self {
        Repository { conn, store }
    }

    /// Name of the underlying store
    pub fn store_name(&self) -> &str {
        &self.store
    }

    /// Insert a record, failing if its primary key already exists.
    ///
    /// Returns the key extracted from the record.
    pub async fn add(&self, record: Record) -> Result<Key> {
        let access = self.conn.scoped_store(&self.store, Mode::ReadWrite)?;
        access.store().add(record).await.map_err(map_write_err)
    }

    /// Insert or overwrite a record, returning its key
    pub async fn put(&self, record: Record) -> Result<Key> {
        let access = self.conn.scoped_store(&self.store, Mode::ReadWrite)?;
        access.store().put(record).await.map_err(map_write_err)
    }

    /// Fetch one record by primary key
    pub async fn get(&self, key: &Key) -> Result<Option<Record>> {
        let access = self.conn.scoped_store(&self.store, Mode::ReadOnly)?;
        access
            .store()
            .get(key)
            .await
            .map_err(|err| DomainError::query_with("failed to fetch record", err))
    }

    /// Shallow-merge `patch` into the record stored under `key` and return
    /// the merged record.
    ///
    /// The read and the write happen in one transaction. Fails with `QUERY`
    /// when no record exists under `key`, and with `VALIDATION` when the
    /// patch is not an object or tries to change the primary key.
    pub async fn update(&self, key: &Key, patch: Record) -> Result<Record> {
        let Some(patch_fields) = patch.as_object() else {
            return Err(DomainError::validation("update patch must be an object"));
        };
        let access = self.conn.scoped_store(&self.store, Mode::ReadWrite)?;
        let store = access.store();

        let existing = store
            .get(key)
            .await
            .map_err(|err| DomainError::query_with("failed to fetch record for update", err))?;
        let Some(mut record) = existing else {
            return Err(DomainError::query(format!("record {} not found", key)));
        };

        if let Some(patched_key) = patch_fields.get(store.key_path()) {
            if Key::from_value(patched_key).as_ref() != Some(key) {
                return Err(DomainError::validation(
                    "update patch may not change the primary key",
                ));
            }
        }

        let Some(fields) = record.as_object_mut() else {
            return Err(DomainError::query("stored record is not an object"));
        };
        for (name, value) in patch_fields {
            fields.insert(name.clone(), value.clone());
        }
        store
            .put(record.clone())
            .await
            .map_err(|err| DomainError::query_with("failed to write updated record", err))?;
        Ok(record)
    }

    /// Delete the record under `key`; deleting a missing key succeeds
    pub async fn delete(&self, key: &Key) -> Result<()> {
        let access = self.conn.scoped_store(&self.store, Mode::ReadWrite)?;
        access
            .store()
            .delete(key)
            .await
            .map_err(|err| DomainError::query_with("failed to delete record", err))
    }

    /// All records in the store, ascending by primary key
    pub async fn get_all(&self) -> Result<Vec<Record>> {
        self.query(None, None).await
    }

    /// Records matching `condition`, optionally scanned through `index`.
    ///
    /// A predicate on the scan target (the condition entry keyed by the
    /// index name, or by the primary key path when no index is named) that
    /// expresses a range or equality is pushed down to a bounded cursor;
    /// all remaining predicates are evaluated per record as a conjunction.
    pub async fn query(
        &self,
        condition: Option<&Condition>,
        index: Option<&str>,
    ) -> Result<Vec<Record>> {
        let access = self.conn.scoped_store(&self.store, Mode::ReadOnly)?;
        crate::query::scan(&access, condition, index).await
    }
}

fn map_write_err(err: HostError) -> DomainError {
    match err {
        HostError::InvalidKey(_) => {
            DomainError::validation_with("record has no usable primary key", err)
        }
        other => DomainError::query_with("failed to write record", other),
    }
}
