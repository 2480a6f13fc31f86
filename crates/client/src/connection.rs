//! Connection handle
//!
//! A [`Connection`] owns one open host database handle and the single
//! reusable active-transaction slot. The slot is an explicit field, never
//! ambient state: only the scope coordinator writes it, always through a
//! paired install/clear bracketing one unit of work, and installing over
//! an occupied slot fails fast instead of silently overwriting.

use crate::repository::Repository;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use stow_core::{ConnectionConfig, DomainError, Mode, Result};
use stow_engine::{Database, HostError, MemHost, Transaction, TxnHold, TxnStore};

/// The transaction currently installed for reuse by nested operations
#[derive(Clone)]
pub(crate) struct ActiveTxn {
    pub txn: Transaction,
    pub stores: Vec<String>,
    pub mode: Mode,
}

pub(crate) struct ConnInner {
    name: String,
    db: Mutex<Option<Database>>,
    active: Mutex<Option<ActiveTxn>>,
}

/// Handle onto one open database
///
/// Cheap to clone; clones share the underlying handle and active slot.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// Open the configured database, applying pending migrations in
    /// ascending version order.
    ///
    /// Each migration runs only if its version exceeds the previously
    /// stored schema version, inside the host's implicit upgrade
    /// transaction.
    ///
    /// # Errors
    /// - `CONNECTION` when the host reports the open blocked or failed
    /// - `SCHEMA` when a migration fails (its schema changes are rolled back)
    /// - `VERSION` when the stored schema version is newer than requested
    pub async fn open(host: &MemHost, config: ConnectionConfig) -> Result<Connection> {
        let version = config.resolved_version();
        let migrations = config.sorted_migrations();
        let db = host
            .open(config.name(), version, |ctx, old_version| {
                for migration in &migrations {
                    if migration.version() > old_version {
                        tracing::info!(
                            db = config.name(),
                            version = migration.version(),
                            "applying migration"
                        );
                        migration.apply(ctx)?;
                    }
                }
                Ok(())
            })
            .await
            .map_err(|err| match err {
                HostError::VersionMismatch { .. } => DomainError::version_with(
                    "stored schema version is newer than the requested version",
                    err,
                ),
                HostError::UpgradeAborted(cause) => {
                    DomainError::schema_with("migration failed during upgrade", cause)
                }
                HostError::Blocked => DomainError::connection_with(
                    "database open is blocked by another open connection",
                    err,
                ),
                other => DomainError::connection_with("failed to open database", other),
            })?;
        tracing::info!(db = config.name(), version, "connection opened");
        Ok(Connection {
            inner: Arc::new(ConnInner {
                name: config.name().to_string(),
                db: Mutex::new(Some(db)),
                active: Mutex::new(None),
            }),
        })
    }

    /// Database name this connection was opened with
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the connection is still open
    pub fn is_open(&self) -> bool {
        self.inner.db.lock().is_some()
    }

    /// Create a transaction covering `stores` in `mode`.
    ///
    /// Does not touch the active-transaction slot; reuse is layered on top
    /// by [`Connection::run_scoped`](crate::scope).
    pub fn transaction(&self, stores: &[&str], mode: Mode) -> Result<Transaction> {
        let db = self.db()?;
        db.transaction(stores, mode)
            .map_err(|err| DomainError::transaction_with("failed to create transaction", err))
    }

    /// Bind a store for one operation.
    ///
    /// If an active transaction is installed, the returned access is bound
    /// to it and `mode` is ignored; the active transaction's mode governs.
    /// Otherwise a fresh single-store transaction is opened; it behaves as
    /// an auto-committing single-operation unit, finalizing when the access
    /// is dropped.
    pub fn scoped_store(&self, name: &str, mode: Mode) -> Result<StoreAccess> {
        if let Some(active) = self.inner.active.lock().as_ref() {
            let store = active.txn.store(name).map_err(|err| {
                DomainError::transaction_with(
                    format!("store {:?} is not part of the active scope", name),
                    err,
                )
            })?;
            return Ok(StoreAccess { store, _hold: None });
        }
        let txn = self.transaction(&[name], mode)?;
        let hold = txn
            .hold()
            .map_err(|err| DomainError::transaction_with("failed to hold transaction", err))?;
        let store = txn
            .store(name)
            .map_err(|err| DomainError::transaction_with("failed to bind store", err))?;
        Ok(StoreAccess {
            store,
            _hold: Some(hold),
        })
    }

    /// Repository over one named store
    pub fn repository(&self, store: impl Into<String>) -> Repository {
        Repository::new(self.clone(), store.into())
    }

    /// Close the connection. Idempotent.
    ///
    /// Any in-flight scope created before close continues to its own
    /// completion per host semantics; no new scope may be created.
    pub fn close(&self) {
        let taken = self.inner.db.lock().take();
        if let Some(db) = taken {
            db.close();
            tracing::info!(db = %self.inner.name, "connection closed");
        }
        self.inner.active.lock().take();
    }

    /// The underlying host database handle.
    ///
    /// Exposed for instrumentation and test controls; application code
    /// normally stays on the repository and scope surfaces.
    pub fn db(&self) -> Result<Database> {
        self.inner
            .db
            .lock()
            .clone()
            .ok_or_else(|| DomainError::transaction("connection is not open"))
    }

    /// Install the active transaction for one unit of work.
    ///
    /// Fails fast if a unit of work already holds the slot; the slot is
    /// never silently overwritten.
    pub(crate) fn install_active(&self, active: ActiveTxn) -> Result<()> {
        let mut slot = self.inner.active.lock();
        if slot.is_some() {
            return Err(DomainError::transaction(
                "another scoped unit of work already holds the active transaction",
            ));
        }
        *slot = Some(active);
        Ok(())
    }

    /// Clear the active transaction slot
    pub(crate) fn clear_active(&self) {
        self.inner.active.lock().take();
    }

    /// Snapshot of the currently installed active transaction, if any
    pub(crate) fn active_snapshot(&self) -> Option<ActiveTxn> {
        self.inner.active.lock().clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("open", &self.is_open())
            .field("active_scope", &self.inner.active.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// A store bound either to the active transaction or to a fresh ad hoc one
///
/// In the ad hoc case the access owns the hold that keeps the transaction
/// open; dropping the access crosses the auto-commit boundary.
pub struct StoreAccess {
    store: TxnStore,
    _hold: Option<TxnHold>,
}

impl StoreAccess {
    /// The bound store handle
    pub fn store(&self) -> &TxnStore {
        &self.store
    }
}
