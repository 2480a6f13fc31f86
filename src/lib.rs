//! StowDB: a typed transactional access layer over a versioned object store
//!
//! StowDB wraps an asynchronous host engine (an in-memory one ships with
//! the workspace) behind three cooperating surfaces:
//!
//! - [`Connection`]: one open database handle, created through versioned
//!   migrations, carrying the single reusable active-transaction slot.
//! - [`Repository`]: CRUD and predicate queries over one store. Operations
//!   join a surrounding scoped unit of work automatically, or run in their
//!   own short-lived auto-committing transaction.
//! - [`Connection::run_scoped`]: brackets an async closure with one shared
//!   transaction and resolves only after the host reports the terminal
//!   commit (or abort) for it.
//!
//! ```no_run
//! use serde_json::json;
//! use stowdb::{Condition, ConnectionConfig, Key, MemHost, Mode, Operators};
//!
//! # async fn demo() -> stowdb::Result<()> {
//! let host = MemHost::new();
//! let config = ConnectionConfig::new("app").migration(1, |schema| {
//!     schema.create_store("users", "id")?;
//!     schema.create_index("users", "by_age", "age")
//! });
//! let conn = stowdb::open(&host, config).await?;
//!
//! conn.run_scoped(&["users"], Mode::ReadWrite, |c| async move {
//!     let users = c.repository("users");
//!     users.add(json!({"id": 1, "name": "ada", "age": 36})).await?;
//!     users.update(&Key::Int(1), json!({"age": 37})).await?;
//!     Ok(())
//! })
//! .await?;
//!
//! let cond = Condition::new().ops("age", Operators::new().gte(json!(30)));
//! let adults = conn.repository("users").query(Some(&cond), None).await?;
//! # let _ = adults;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use stow_client::{Connection, Repository, StoreAccess};
pub use stow_core::{
    Condition, ConnectionConfig, DomainError, ErrorKind, FieldPredicate, Key, KeyRange, Migration,
    Mode, Operators, Record, Result, SchemaEditor, Severity,
};
pub use stow_engine::{CommitGate, Cursor, Database, MemHost, Phase, Transaction, TxnStore};

/// Open (or create) the named database on `host` and return a connection.
///
/// Migrations in the config run in ascending version order inside the
/// host's upgrade transaction; a failed migration rolls the upgrade back.
pub async fn open(host: &MemHost, config: ConnectionConfig) -> Result<Connection> {
    Connection::open(host, config).await
}
