//! Predicate query planning and evaluation
//!
//! A query splits into a physical key range pushed down to the host cursor
//! and a residual conjunction evaluated per record. At most one predicate
//! is pushed down: the condition entry keyed by the queried index's name
//! (or by the store's primary key path when no index is named) when it is
//! a range or equality. Everything else stays residual; a record matches
//! only when every residual field predicate holds.

use crate::connection::StoreAccess;
use serde_json::Value;
use std::cmp::Ordering;
use stow_core::{Condition, DomainError, FieldPredicate, Key, KeyRange, Operators, Record, Result};

pub(crate) async fn scan(
    access: &StoreAccess,
    condition: Option<&Condition>,
    index: Option<&str>,
) -> Result<Vec<Record>> {
    let store = access.store();
    let plan = plan(condition, index, store.key_path());

    let mut cursor = match index {
        Some(name) => store.open_index_cursor(name, plan.range).await,
        None => store.open_cursor(plan.range).await,
    }
    .map_err(|err| DomainError::query_with("failed to open cursor", err))?;

    let mut results = Vec::new();
    loop {
        let record = cursor
            .next()
            .await
            .map_err(|err| DomainError::query_with("cursor scan failed", err))?;
        let Some(record) = record else { break };
        let keep = plan
            .residual
            .iter()
            .all(|(field, pred)| matches(pred, record.get(*field)));
        if keep {
            results.push(record);
        }
    }
    Ok(results)
}

struct ScanPlan<'c> {
    range: Option<KeyRange>,
    residual: Vec<(&'c str, &'c FieldPredicate)>,
}

fn plan<'c>(
    condition: Option<&'c Condition>,
    index: Option<&str>,
    key_path: &str,
) -> ScanPlan<'c> {
    let mut plan = ScanPlan {
        range: None,
        residual: Vec::new(),
    };
    let Some(condition) = condition else {
        return plan;
    };
    let target = index.unwrap_or(key_path);
    for (field, pred) in condition.iter() {
        if plan.range.is_none() && field == target {
            match pred {
                FieldPredicate::Range(range) => {
                    plan.range = Some(range.clone());
                    continue;
                }
                FieldPredicate::Equals(value) => {
                    if let Some(key) = Key::from_value(value) {
                        plan.range = Some(KeyRange::only(key));
                        continue;
                    }
                }
                FieldPredicate::Ops(_) => {}
            }
        }
        plan.residual.push((field.as_str(), pred));
    }
    plan
}

fn matches(pred: &FieldPredicate, value: Option<&Value>) -> bool {
    match pred {
        FieldPredicate::Equals(expected) => value == Some(expected),
        FieldPredicate::Range(range) => value
            .and_then(Key::from_value)
            .map_or(false, |key| range.contains(&key)),
        FieldPredicate::Ops(ops) => ops_match(ops, value),
    }
}

fn ops_match(ops: &Operators, value: Option<&Value>) -> bool {
    if let Some(expected) = &ops.eq {
        if value != Some(expected) {
            return false;
        }
    }
    // A missing field is "not equal" to any literal.
    if let Some(excluded) = &ops.ne {
        if value == Some(excluded) {
            return false;
        }
    }
    if !ordered_ok(&ops.gt, value, |ord| ord == Ordering::Greater) {
        return false;
    }
    if !ordered_ok(&ops.gte, value, |ord| ord != Ordering::Less) {
        return false;
    }
    if !ordered_ok(&ops.lt, value, |ord| ord == Ordering::Less) {
        return false;
    }
    if !ordered_ok(&ops.lte, value, |ord| ord != Ordering::Greater) {
        return false;
    }
    if let Some(candidates) = &ops.is_in {
        match value {
            Some(value) if candidates.iter().any(|c| c == value) => {}
            _ => return false,
        }
    }
    if let Some(excluded) = &ops.not_in {
        if let Some(value) = value {
            if excluded.iter().any(|c| c == value) {
                return false;
            }
        }
    }
    true
}

/// Ordered comparisons require a present, comparable value; incomparable
/// pairs (such as a string against a number) never match.
fn ordered_ok(bound: &Option<Value>, value: Option<&Value>, accept: fn(Ordering) -> bool) -> bool {
    let Some(bound) = bound else {
        return true;
    };
    let Some(value) = value else {
        return false;
    };
    match Key::compare_values(value, bound) {
        Some(ord) => accept(ord),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::Connection;
    use serde_json::json;
    use stow_core::{Condition, ConnectionConfig, ErrorKind, KeyRange, Mode, Operators};
    use stow_engine::MemHost;

    async fn seeded(host: &MemHost) -> Connection {
        let config = ConnectionConfig::new("app").migration(1, |ctx| {
            ctx.create_store("users", "id")?;
            ctx.create_index("users", "by_age", "age")
        });
        let conn = Connection::open(host, config).await.expect("open");
        let rows = [
            json!({"id": 1, "name": "ada", "age": 20, "city": "london"}),
            json!({"id": 2, "name": "grace", "age": 25, "city": "arlington"}),
            json!({"id": 3, "name": "edsger", "age": 30, "city": "austin"}),
            json!({"id": 4, "name": "alan", "age": 30}),
        ];
        conn.run_scoped(&["users"], Mode::ReadWrite, |c| async move {
            let users = c.repository("users");
            for row in rows {
                users.add(row).await?;
            }
            Ok(())
        })
        .await
        .expect("seed");
        conn
    }

    fn ids(records: &[serde_json::Value]) -> Vec<i64> {
        records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn no_condition_returns_everything_in_key_order() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let all = conn.repository("users").get_all().await.unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn gte_operator_filters_and_preserves_order() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let cond = Condition::new().ops("age", Operators::new().gte(json!(25)));
        let hits = conn.repository("users").query(Some(&cond), None).await.unwrap();
        assert_eq!(ids(&hits), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn primary_key_range_is_pushed_down() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let cond = Condition::new().range("id", KeyRange::bound(2, 3, false, false).unwrap());
        let hits = conn.repository("users").query(Some(&cond), None).await.unwrap();
        assert_eq!(ids(&hits), vec![2, 3]);
    }

    #[tokio::test]
    async fn index_scan_orders_by_index_key() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let hits = conn
            .repository("users")
            .query(None, Some("by_age"))
            .await
            .unwrap();
        // Ties on the index key fall back to primary-key order.
        assert_eq!(ids(&hits), vec![1, 2, 3, 4]);
        assert_eq!(hits[0]["age"], 20);
    }

    #[tokio::test]
    async fn index_equality_is_pushed_down_as_a_range() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        // The pushdown entry is keyed by the index name, not its key path.
        let cond = Condition::new().eq("by_age", json!(30));
        let hits = conn
            .repository("users")
            .query(Some(&cond), Some("by_age"))
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec![3, 4]);
    }

    #[tokio::test]
    async fn conjunction_combines_pushdown_and_residual() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let cond = Condition::new()
            .range("by_age", KeyRange::lower_bound(25, false))
            .eq("city", json!("austin"));
        let hits = conn
            .repository("users")
            .query(Some(&cond), Some("by_age"))
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec![3]);
    }

    #[tokio::test]
    async fn missing_field_fails_ordered_predicates_but_passes_ne() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let users = conn.repository("users");

        let cond = Condition::new().ops("city", Operators::new().gt(json!("a")));
        let hits = users.query(Some(&cond), None).await.unwrap();
        assert_eq!(ids(&hits), vec![1, 2, 3]);

        let cond = Condition::new().ops("city", Operators::new().ne(json!("london")));
        let hits = users.query(Some(&cond), None).await.unwrap();
        assert_eq!(ids(&hits), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn in_and_nin_check_membership() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let users = conn.repository("users");

        let cond = Condition::new().ops(
            "name",
            Operators::new().is_in(vec![json!("ada"), json!("alan")]),
        );
        assert_eq!(ids(&users.query(Some(&cond), None).await.unwrap()), vec![1, 4]);

        let cond = Condition::new().ops(
            "name",
            Operators::new().not_in(vec![json!("ada"), json!("alan")]),
        );
        assert_eq!(ids(&users.query(Some(&cond), None).await.unwrap()), vec![2, 3]);
    }

    #[tokio::test]
    async fn unknown_index_is_a_query_error() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        let err = conn
            .repository("users")
            .query(None, Some("by_height"))
            .await
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::Query));
    }

    #[tokio::test]
    async fn injected_cursor_failure_surfaces_as_query_error() {
        let host = MemHost::new();
        let conn = seeded(&host).await;
        conn.db().unwrap().fail_cursor_at(2);
        let err = conn.repository("users").get_all().await.unwrap_err();
        assert!(err.is_kind(ErrorKind::Query));
    }
}
