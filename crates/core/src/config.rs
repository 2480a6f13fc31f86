//! Connection configuration and schema migrations
//!
//! A [`ConnectionConfig`] names the database, pins an optional schema
//! version, and carries an ordered list of [`Migration`]s. Migrations run
//! inside the host engine's implicit upgrade transaction through the
//! [`SchemaEditor`] seam; this layer never initiates host-level schema
//! changes outside that callback.

use crate::error::Result;
use std::fmt;

/// Transaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Reads only; writes are rejected by the host
    ReadOnly,
    /// Reads and writes
    ReadWrite,
}

impl Mode {
    /// Whether this mode permits writes
    pub fn is_write(self) -> bool {
        matches!(self, Mode::ReadWrite)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ReadOnly => f.write_str("readonly"),
            Mode::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// Schema operations available to a migration while the host's upgrade
/// transaction is open
pub trait SchemaEditor {
    /// Create an object store keyed by the field at `key_path`
    fn create_store(&mut self, name: &str, key_path: &str) -> Result<()>;

    /// Create a secondary index over `store` on the field at `key_path`
    fn create_index(&mut self, store: &str, index: &str, key_path: &str) -> Result<()>;

    /// Delete an object store and all of its records
    fn delete_store(&mut self, name: &str) -> Result<()>;
}

/// Upgrade callback type for a migration
pub type UpgradeFn = Box<dyn Fn(&mut dyn SchemaEditor) -> Result<()> + Send + Sync>;

/// One schema migration step
///
/// Applied only when its version exceeds the previously stored schema
/// version; migrations are sorted ascending before application.
pub struct Migration {
    version: u32,
    upgrade: UpgradeFn,
}

impl Migration {
    /// Create a migration targeting `version`
    pub fn new(
        version: u32,
        upgrade: impl Fn(&mut dyn SchemaEditor) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Migration {
            version,
            upgrade: Box::new(upgrade),
        }
    }

    /// Schema version this migration upgrades to
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Run the upgrade callback
    pub fn apply(&self, editor: &mut dyn SchemaEditor) -> Result<()> {
        (self.upgrade)(editor)
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Configuration for opening a connection
#[derive(Debug, Default)]
pub struct ConnectionConfig {
    name: String,
    version: Option<u32>,
    migrations: Vec<Migration>,
}

impl ConnectionConfig {
    /// Configuration for the database called `name`
    pub fn new(name: impl Into<String>) -> Self {
        ConnectionConfig {
            name: name.into(),
            version: None,
            migrations: Vec::new(),
        }
    }

    /// Pin the schema version to open at.
    ///
    /// When unset, the highest migration version is used (or 1 when there
    /// are no migrations).
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Register a migration step
    pub fn migration(
        mut self,
        version: u32,
        upgrade: impl Fn(&mut dyn SchemaEditor) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.migrations.push(Migration::new(version, upgrade));
        self
    }

    /// Database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version to open at, resolving the default from migrations
    pub fn resolved_version(&self) -> u32 {
        self.version.unwrap_or_else(|| {
            self.migrations
                .iter()
                .map(Migration::version)
                .max()
                .unwrap_or(1)
                .max(1)
        })
    }

    /// Migrations sorted ascending by version
    pub fn sorted_migrations(&self) -> Vec<&Migration> {
        let mut sorted: Vec<&Migration> = self.migrations.iter().collect();
        sorted.sort_by_key(|m| m.version());
        sorted
    }
}
