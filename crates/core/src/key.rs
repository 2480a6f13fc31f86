//! Ordered keys and key ranges
//!
//! Keys are the values a record may be indexed by: numbers, strings, raw
//! bytes, and arrays of those. Unlike record values, keys carry a total
//! order so they can drive cursor iteration and physical range bounds.
//!
//! Cross-type ordering precedence: numbers < strings < bytes < arrays.
//! Integers and floats order together numerically, compared exactly (a
//! lossy `i64 as f64` cast would make equality non-transitive above 2^53).
//! To keep the order total, every NaN falls in one class above all other
//! numbers, and negative and positive zero are equal.

use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// An ordered key for a store or index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    /// 64-bit signed integer key
    Int(i64),
    /// 64-bit floating point key
    Float(f64),
    /// UTF-8 string key
    String(String),
    /// Raw byte key
    Bytes(Vec<u8>),
    /// Composite key, ordered lexicographically
    Array(Vec<Key>),
}

impl Key {
    /// Convert a record value into a key, if the value is key-compatible.
    ///
    /// Numbers, strings, and arrays of key-compatible values convert;
    /// null, booleans, and objects do not.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Key::Int(i))
                } else {
                    n.as_f64().map(Key::Float)
                }
            }
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Compare two record values through their key conversions.
    ///
    /// Returns `None` when either side is not key-compatible; callers treat
    /// an incomparable pair as a non-match, never as an error.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        Some(Key::from_value(a)?.cmp(&Key::from_value(b)?))
    }

    fn type_rank(&self) -> u8 {
        match self {
            Key::Int(_) | Key::Float(_) => 0,
            Key::String(_) => 1,
            Key::Bytes(_) => 2,
            Key::Array(_) => 3,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Float(a), Key::Float(b)) => cmp_floats(*a, *b),
            // Mixed numeric keys order together: Int(1) and Float(1.0)
            // are the same key.
            (Key::Int(a), Key::Float(b)) => cmp_int_float(*a, *b),
            (Key::Float(a), Key::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Bytes(a), Key::Bytes(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

/// Total order over float keys: numeric order with negative and positive
/// zero equal, and every NaN in a single class above all other numbers.
fn cmp_floats(a: f64, b: f64) -> Ordering {
    if let Some(ord) = a.partial_cmp(&b) {
        return ord;
    }
    // partial_cmp is None only when a NaN is involved.
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, _) => Ordering::Greater,
        _ => Ordering::Less,
    }
}

/// Exact comparison of an integer key against a float key. Casting the
/// integer to `f64` is lossy above 2^53, which would make keys that differ
/// by one compare equal and break transitivity.
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() || f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    // In range, truncation converts to i64 exactly.
    let trunc = f.trunc();
    let whole = trunc as i64;
    match i.cmp(&whole) {
        Ordering::Equal if f > trunc => Ordering::Less,
        Ordering::Equal if f < trunc => Ordering::Greater,
        ord => ord,
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Float(x) => write!(f, "{}", x),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

/// An ordered lower/upper bound pair, each independently inclusive or
/// exclusive, used to physically restrict cursor iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// Range matching exactly one key
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        KeyRange {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// Range bounded below only
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        KeyRange {
            lower: Some(key.into()),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// Range bounded above only
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        KeyRange {
            lower: None,
            upper: Some(key.into()),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Range bounded on both sides.
    ///
    /// # Errors
    /// `VALIDATION` if the lower bound is greater than the upper bound, or
    /// the bounds are equal but either side is exclusive (an empty range).
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self> {
        let lower = lower.into();
        let upper = upper.into();
        match lower.cmp(&upper) {
            Ordering::Greater => Err(DomainError::validation(format!(
                "key range lower bound {} is greater than upper bound {}",
                lower, upper
            ))),
            Ordering::Equal if lower_open || upper_open => Err(DomainError::validation(
                "key range bounds are equal but a bound is exclusive",
            )),
            _ => Ok(KeyRange {
                lower: Some(lower),
                upper: Some(upper),
                lower_open,
                upper_open,
            }),
        }
    }

    /// Lower bound, if any
    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    /// Upper bound, if any
    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Inclusion test against both bounds
    pub fn contains(&self, key: &Key) -> bool {
        if let Some(lower) = &self.lower {
            match key.cmp(lower) {
                Ordering::Less => return false,
                Ordering::Equal if self.lower_open => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match key.cmp(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if self.upper_open => return false,
                _ => {}
            }
        }
        true
    }
}
