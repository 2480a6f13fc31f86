//! Connection lifecycle, migrations, and error taxonomy.

use serde_json::json;
use stowdb::{ConnectionConfig, DomainError, ErrorKind, Key, MemHost, Severity};

#[tokio::test]
async fn migrations_run_in_ascending_order_regardless_of_registration() {
    let host = MemHost::new();
    // Registered out of order; v2 depends on the store v1 creates.
    let config = ConnectionConfig::new("app")
        .migration(2, |schema| schema.create_index("users", "by_age", "age"))
        .migration(1, |schema| schema.create_store("users", "id"));
    let conn = stowdb::open(&host, config).await.expect("open");

    conn.repository("users").add(json!({"id": 1, "age": 9})).await.unwrap();
    let hits = conn.repository("users").query(None, Some("by_age")).await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn reopening_at_a_higher_version_runs_only_new_migrations() {
    let host = MemHost::new();
    {
        let config = ConnectionConfig::new("app")
            .migration(1, |schema| schema.create_store("users", "id"));
        stowdb::open(&host, config).await.expect("first open").close();
    }

    let config = ConnectionConfig::new("app")
        .migration(1, |_| Err(DomainError::schema("v1 ran twice")))
        .migration(2, |schema| schema.create_store("audit", "seq"));
    let conn = stowdb::open(&host, config).await.expect("reopen");
    conn.repository("audit").add(json!({"seq": 1})).await.unwrap();
    conn.repository("users").add(json!({"id": 1})).await.unwrap();
}

#[tokio::test]
async fn failed_migration_rolls_back_its_schema_changes() {
    let host = MemHost::new();
    let config = ConnectionConfig::new("app")
        .migration(1, |schema| {
            schema.create_store("users", "id")?;
            Err(DomainError::validation("bad index spec"))
        });
    let err = stowdb::open(&host, config).await.unwrap_err();
    assert!(err.is_kind(ErrorKind::Schema));

    // The aborted upgrade left nothing behind; version 1 runs again and
    // succeeds on retry.
    let config = ConnectionConfig::new("app")
        .migration(1, |schema| schema.create_store("users", "id"));
    let conn = stowdb::open(&host, config).await.expect("retry");
    conn.repository("users").add(json!({"id": 1})).await.unwrap();
}

#[tokio::test]
async fn opening_below_the_stored_version_is_a_version_error() {
    let host = MemHost::new();
    {
        let config = ConnectionConfig::new("app")
            .version(3)
            .migration(3, |schema| schema.create_store("users", "id"));
        stowdb::open(&host, config).await.expect("open").close();
    }
    let err = stowdb::open(&host, ConnectionConfig::new("app").version(1))
        .await
        .unwrap_err();
    assert!(err.is_kind(ErrorKind::Version));
    assert_eq!(err.severity(), Severity::Medium);
}

#[tokio::test]
async fn upgrade_blocked_by_an_open_connection_is_a_connection_error() {
    let host = MemHost::new();
    let held = {
        let config = ConnectionConfig::new("app")
            .migration(1, |schema| schema.create_store("users", "id"));
        stowdb::open(&host, config).await.expect("open")
    };

    let config = ConnectionConfig::new("app")
        .version(2)
        .migration(2, |schema| schema.create_store("audit", "seq"));
    let err = stowdb::open(&host, config).await.unwrap_err();
    assert!(err.is_kind(ErrorKind::Connection));
    assert_eq!(err.severity(), Severity::High);

    // With the holder closed, the upgrade proceeds.
    held.close();
    let config = ConnectionConfig::new("app")
        .version(2)
        .migration(2, |schema| schema.create_store("audit", "seq"));
    stowdb::open(&host, config).await.expect("open after close");
}

#[tokio::test]
async fn close_is_idempotent_and_rejects_further_work() {
    let host = MemHost::new();
    let config = ConnectionConfig::new("app")
        .migration(1, |schema| schema.create_store("users", "id"));
    let conn = stowdb::open(&host, config).await.expect("open");
    conn.repository("users").add(json!({"id": 1})).await.unwrap();

    conn.close();
    conn.close();
    assert!(!conn.is_open());

    let err = conn.repository("users").get(&Key::Int(1)).await.unwrap_err();
    assert!(err.is_kind(ErrorKind::Transaction));
}

#[tokio::test]
async fn errors_carry_identity_classification_and_cause_chain() {
    let host = MemHost::new();
    let config = ConnectionConfig::new("app")
        .migration(1, |schema| schema.create_store("users", "id"));
    let conn = stowdb::open(&host, config).await.expect("open");
    let users = conn.repository("users");

    users.add(json!({"id": 1})).await.unwrap();
    let a = users.add(json!({"id": 1})).await.unwrap_err();
    let b = users.add(json!({"id": 1})).await.unwrap_err();

    assert!(a.is_kind(ErrorKind::Query));
    assert_eq!(a.severity(), Severity::Medium);
    assert_ne!(a.id(), b.id());
    assert!(a.timestamp() <= b.timestamp());

    // Display carries the bracketed classification tag.
    assert!(a.to_string().starts_with("[stowdb:QUERY]"));
    // The full chain renders the host-level cause.
    assert!(a.full_message().contains("duplicate key"));
}
