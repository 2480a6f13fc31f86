//! In-memory host engine
//!
//! [`MemHost`] is a registry of named, versioned databases. Opening at a
//! higher version than stored runs the caller's upgrade callback inside an
//! implicit upgrade transaction: schema changes made by a failed upgrade
//! are rolled back and the stored version is left untouched.

use crate::database::{Database, DatabaseState, StoreSchema};
use crate::error::{HostError, HostResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use stow_core::{DomainError, SchemaEditor};

/// In-memory registry of named databases
#[derive(Clone, Default)]
pub struct MemHost {
    dbs: Arc<Mutex<HashMap<String, Arc<Mutex<DatabaseState>>>>>,
}

impl MemHost {
    /// Create an empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the database `name` at schema `version`.
    ///
    /// A fresh database starts at version 0, so the first open always runs
    /// `upgrade` with `old_version == 0`. Opening below the stored version
    /// fails with [`HostError::VersionMismatch`]; opening above it while
    /// another connection is open fails with [`HostError::Blocked`].
    pub async fn open<F>(&self, name: &str, version: u32, upgrade: F) -> HostResult<Database>
    where
        F: FnOnce(&mut UpgradeContext<'_>, u32) -> stow_core::Result<()>,
    {
        tokio::task::yield_now().await;

        let state_arc = {
            let mut dbs = self.dbs.lock();
            dbs.entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(DatabaseState::new(name))))
                .clone()
        };

        {
            let mut state = state_arc.lock();
            if version < state.version {
                return Err(HostError::VersionMismatch {
                    requested: version,
                    stored: state.version,
                });
            }
            if version > state.version {
                if state.connections > 0 {
                    return Err(HostError::Blocked);
                }
                let old_version = state.version;
                let schema_snapshot = state.schemas.clone();
                let data_snapshot = state.data.clone();
                let mut ctx = UpgradeContext { state: &mut *state };
                if let Err(err) = upgrade(&mut ctx, old_version) {
                    state.schemas = schema_snapshot;
                    state.data = data_snapshot;
                    return Err(HostError::UpgradeAborted(err));
                }
                state.version = version;
                tracing::info!(db = name, from = old_version, to = version, "schema upgraded");
            }
            state.connections += 1;
        }

        Ok(Database::new(state_arc))
    }
}

/// Schema editing surface handed to migrations while the implicit upgrade
/// transaction is open
pub struct UpgradeContext<'a> {
    state: &'a mut DatabaseState,
}

impl SchemaEditor for UpgradeContext<'_> {
    fn create_store(&mut self, name: &str, key_path: &str) -> stow_core::Result<()> {
        if self.state.schemas.contains_key(name) {
            return Err(DomainError::validation(format!(
                "object store {:?} already exists",
                name
            )));
        }
        self.state.schemas.insert(
            name.to_string(),
            StoreSchema {
                key_path: key_path.to_string(),
                indexes: BTreeMap::new(),
            },
        );
        self.state.data.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    fn create_index(&mut self, store: &str, index: &str, key_path: &str) -> stow_core::Result<()> {
        let schema = self.state.schemas.get_mut(store).ok_or_else(|| {
            DomainError::validation(format!("object store {:?} does not exist", store))
        })?;
        if schema.indexes.contains_key(index) {
            return Err(DomainError::validation(format!(
                "index {:?} already exists on store {:?}",
                index, store
            )));
        }
        schema
            .indexes
            .insert(index.to_string(), key_path.to_string());
        Ok(())
    }

    fn delete_store(&mut self, name: &str) -> stow_core::Result<()> {
        if self.state.schemas.remove(name).is_none() {
            return Err(DomainError::validation(format!(
                "object store {:?} does not exist",
                name
            )));
        }
        self.state.data.remove(name);
        Ok(())
    }
}
