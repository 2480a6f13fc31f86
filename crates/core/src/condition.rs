//! Ad-hoc query conditions
//!
//! A [`Condition`] maps field names to predicates. Each field carries
//! exactly one [`FieldPredicate`]: a literal equality, a key range, or an
//! operator set. A record matches a condition only if every field
//! predicate matches (logical AND across fields).
//!
//! The map is ordered (`BTreeMap`) so residual predicate evaluation is
//! deterministic. During a scan, at most one entry is consumed as the
//! cursor's physical range; the query engine decides which.

use crate::key::KeyRange;
use serde_json::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Per-field predicate
#[derive(Debug, Clone)]
pub enum FieldPredicate {
    /// Strict equality against a literal value
    Equals(Value),
    /// Inclusion test against a key range
    Range(KeyRange),
    /// Conjunction of every operator present
    Ops(Operators),
}

/// Operator set for a single field
///
/// Each present operator must match for the field to match. Ordered
/// comparisons (`gt`/`gte`/`lt`/`lte`) go through key conversion; a pair
/// that is not key-comparable never matches.
#[derive(Debug, Clone, Default)]
pub struct Operators {
    /// Equality (`$eq`)
    pub eq: Option<Value>,
    /// Inequality (`$ne`)
    pub ne: Option<Value>,
    /// Strictly greater (`$gt`)
    pub gt: Option<Value>,
    /// Greater or equal (`$gte`)
    pub gte: Option<Value>,
    /// Strictly less (`$lt`)
    pub lt: Option<Value>,
    /// Less or equal (`$lte`)
    pub lte: Option<Value>,
    /// Membership in the supplied list (`$in`)
    pub is_in: Option<Vec<Value>>,
    /// Absence from the supplied list (`$nin`)
    pub not_in: Option<Vec<Value>>,
}

impl Operators {
    /// Empty operator set; matches everything until narrowed
    pub fn new() -> Self {
        Self::default()
    }

    /// Require equality
    pub fn eq(mut self, value: Value) -> Self {
        self.eq = Some(value);
        self
    }

    /// Require inequality
    pub fn ne(mut self, value: Value) -> Self {
        self.ne = Some(value);
        self
    }

    /// Require strictly greater
    pub fn gt(mut self, value: Value) -> Self {
        self.gt = Some(value);
        self
    }

    /// Require greater or equal
    pub fn gte(mut self, value: Value) -> Self {
        self.gte = Some(value);
        self
    }

    /// Require strictly less
    pub fn lt(mut self, value: Value) -> Self {
        self.lt = Some(value);
        self
    }

    /// Require less or equal
    pub fn lte(mut self, value: Value) -> Self {
        self.lte = Some(value);
        self
    }

    /// Require membership in the list
    pub fn is_in(mut self, values: Vec<Value>) -> Self {
        self.is_in = Some(values);
        self
    }

    /// Require absence from the list
    pub fn not_in(mut self, values: Vec<Value>) -> Self {
        self.not_in = Some(values);
        self
    }
}

/// Mapping from field name to predicate, evaluated as a conjunction
#[derive(Debug, Clone, Default)]
pub struct Condition {
    fields: BTreeMap<String, FieldPredicate>,
}

impl Condition {
    /// Empty condition; matches every record
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal equality predicate
    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields
            .insert(field.into(), FieldPredicate::Equals(value));
        self
    }

    /// Add a key-range predicate
    pub fn range(mut self, field: impl Into<String>, range: KeyRange) -> Self {
        self.fields
            .insert(field.into(), FieldPredicate::Range(range));
        self
    }

    /// Add an operator-set predicate
    pub fn ops(mut self, field: impl Into<String>, ops: Operators) -> Self {
        self.fields.insert(field.into(), FieldPredicate::Ops(ops));
        self
    }

    /// Predicate for a field, if present
    pub fn get(&self, field: &str) -> Option<&FieldPredicate> {
        self.fields.get(field)
    }

    /// Iterate predicates in field-name order
    pub fn iter(&self) -> btree_map::Iter<'_, String, FieldPredicate> {
        self.fields.iter()
    }

    /// Number of field predicates
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether this condition has no predicates
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_replaces_duplicate_fields() {
        let cond = Condition::new()
            .eq("age", json!(20))
            .ops("age", Operators::new().gte(json!(25)));
        assert_eq!(cond.len(), 1);
        assert!(matches!(cond.get("age"), Some(FieldPredicate::Ops(_))));
    }

    #[test]
    fn iteration_is_in_field_name_order() {
        let cond = Condition::new()
            .eq("zeta", json!(1))
            .eq("alpha", json!(2))
            .eq("mid", json!(3));
        let order: Vec<&str> = cond.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(order, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn empty_condition() {
        let cond = Condition::new();
        assert!(cond.is_empty());
        assert!(cond.get("anything").is_none());
    }
}
