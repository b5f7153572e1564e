//! Key values with a total, type-bracketed ordering
//!
//! Documents are plain JSON values. Anything that is compared, indexed or
//! sorted is first lowered into a `KeyValue`, whose ordering is:
//!
//! MinKey < Null < Number < String < Object < Array < Bool < MaxKey
//!
//! Within a type the ordering is natural. Numbers compare numerically with NaN
//! below every other number. Objects compare field by field (name, then value).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single component of an index or sort key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyValue {
    /// Sorts before everything
    MinKey,
    /// JSON null, also used for missing fields
    Null,
    /// Any JSON number
    Number(f64),
    /// String value
    String(String),
    /// Embedded object, fields in document order
    Object(Vec<(String, KeyValue)>),
    /// Embedded array (only produced for nested arrays)
    Array(Vec<KeyValue>),
    /// Boolean value (false < true)
    Bool(bool),
    /// Sorts after everything
    MaxKey,
}

impl KeyValue {
    /// Lowers a JSON value into a key value.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => KeyValue::Null,
            Value::Bool(b) => KeyValue::Bool(*b),
            Value::Number(n) => KeyValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => KeyValue::String(s.clone()),
            Value::Array(items) => KeyValue::Array(items.iter().map(KeyValue::from_json).collect()),
            Value::Object(map) => KeyValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), KeyValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts back into JSON. MinKey and MaxKey use their extended-JSON form.
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::MinKey => serde_json::json!({ "$minKey": 1 }),
            KeyValue::MaxKey => serde_json::json!({ "$maxKey": 1 }),
            KeyValue::Null => Value::Null,
            KeyValue::Bool(b) => Value::Bool(*b),
            KeyValue::Number(n) => number_to_json(*n),
            KeyValue::String(s) => Value::String(s.clone()),
            KeyValue::Array(items) => Value::Array(items.iter().map(KeyValue::to_json).collect()),
            KeyValue::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
        }
    }

    /// Rank of the value's type in the canonical ordering.
    pub fn type_rank(&self) -> u8 {
        match self {
            KeyValue::MinKey => 0,
            KeyValue::Null => 1,
            KeyValue::Number(_) => 2,
            KeyValue::String(_) => 3,
            KeyValue::Object(_) => 4,
            KeyValue::Array(_) => 5,
            KeyValue::Bool(_) => 6,
            KeyValue::MaxKey => 7,
        }
    }

    /// Returns true if both values share a canonical type.
    pub fn same_type(&self, other: &KeyValue) -> bool {
        self.type_rank() == other.type_rank()
    }

    /// Smallest value of this value's type, with its inclusivity.
    pub fn type_min(&self) -> (KeyValue, bool) {
        match self {
            KeyValue::Number(_) => (KeyValue::Number(f64::NEG_INFINITY), true),
            KeyValue::String(_) => (KeyValue::String(String::new()), true),
            KeyValue::Object(_) => (KeyValue::Object(Vec::new()), true),
            KeyValue::Array(_) => (KeyValue::Array(Vec::new()), true),
            KeyValue::Bool(_) => (KeyValue::Bool(false), true),
            other => (other.clone(), true),
        }
    }

    /// Largest value of this value's type, with its inclusivity.
    ///
    /// Strings and objects have no largest member, so the bound is the
    /// smallest value of the next type, exclusive.
    pub fn type_max(&self) -> (KeyValue, bool) {
        match self {
            KeyValue::Number(_) => (KeyValue::Number(f64::INFINITY), true),
            KeyValue::String(_) => (KeyValue::Object(Vec::new()), false),
            KeyValue::Object(_) => (KeyValue::Array(Vec::new()), false),
            KeyValue::Array(_) => (KeyValue::Bool(false), false),
            KeyValue::Bool(_) => (KeyValue::Bool(true), true),
            other => (other.clone(), true),
        }
    }

    /// Approximate encoded size in bytes.
    pub fn approx_size(&self) -> usize {
        match self {
            KeyValue::MinKey | KeyValue::MaxKey | KeyValue::Null => 1,
            KeyValue::Bool(_) => 2,
            KeyValue::Number(_) => 9,
            KeyValue::String(s) => 6 + s.len(),
            KeyValue::Array(items) => 5 + items.iter().map(|v| v.approx_size() + 2).sum::<usize>(),
            KeyValue::Object(fields) => {
                5 + fields
                    .iter()
                    .map(|(k, v)| k.len() + 1 + v.approx_size())
                    .sum::<usize>()
            }
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (KeyValue::Number(a), KeyValue::Number(b)) => compare_numbers(*a, *b),
            (KeyValue::String(a), KeyValue::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (KeyValue::Bool(a), KeyValue::Bool(b)) => a.cmp(b),
            (KeyValue::Array(a), KeyValue::Array(b)) => a.cmp(b),
            (KeyValue::Object(a), KeyValue::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = va
                        .type_rank()
                        .cmp(&vb.type_rank())
                        .then_with(|| ka.cmp(kb))
                        .then_with(|| va.cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl std::hash::Hash for KeyValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Must agree with Eq: zero and NaN have several bit patterns.
        self.type_rank().hash(state);
        match self {
            KeyValue::Number(n) => {
                if *n == 0.0 || n.is_nan() {
                    n.is_nan().hash(state)
                } else {
                    n.to_bits().hash(state)
                }
            }
            KeyValue::String(s) => s.hash(state),
            KeyValue::Bool(b) => b.hash(state),
            KeyValue::Array(items) => items.hash(state),
            KeyValue::Object(fields) => fields.hash(state),
            _ => {}
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::MinKey => write!(f, "MinKey"),
            KeyValue::MaxKey => write!(f, "MaxKey"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Number(v as f64)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Number(v as f64)
    }
}

impl From<f64> for KeyValue {
    fn from(v: f64) -> Self {
        KeyValue::Number(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::String(v.to_string())
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

/// Approximate stored size of a document, used for memory accounting.
pub fn approx_document_size(doc: &Value) -> usize {
    match doc {
        Value::Null => 1,
        Value::Bool(_) => 2,
        Value::Number(_) => 9,
        Value::String(s) => 6 + s.len(),
        Value::Array(items) => 5 + items.iter().map(|v| approx_document_size(v) + 2).sum::<usize>(),
        Value::Object(map) => {
            5 + map
                .iter()
                .map(|(k, v)| k.len() + 1 + approx_document_size(v))
                .sum::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_ordering() {
        let values = vec![
            KeyValue::MinKey,
            KeyValue::Null,
            KeyValue::from(-100),
            KeyValue::from(0),
            KeyValue::from(2.5),
            KeyValue::from("aaa"),
            KeyValue::from("zzz"),
            KeyValue::Object(Vec::new()),
            KeyValue::Array(Vec::new()),
            KeyValue::Bool(false),
            KeyValue::Bool(true),
            KeyValue::MaxKey,
        ];

        for i in 1..values.len() {
            assert!(values[i - 1] < values[i], "{} should sort before {}", values[i - 1], values[i]);
        }
    }

    #[test]
    fn test_int_and_float_compare_numerically() {
        assert!(KeyValue::from(1) < KeyValue::from(1.5));
        assert_eq!(KeyValue::from(2), KeyValue::from(2.0));
        assert!(KeyValue::Number(f64::NAN) < KeyValue::Number(f64::NEG_INFINITY));
    }

    #[test]
    fn test_from_json_preserves_structure() {
        let kv = KeyValue::from_json(&json!({"a": [1, "x"], "b": null}));
        assert_eq!(kv.to_json(), json!({"a": [1, "x"], "b": null}));
    }

    #[test]
    fn test_type_brackets() {
        let (max, inclusive) = KeyValue::from("abc").type_max();
        assert!(!inclusive);
        assert!(KeyValue::from("zzzz") < max);
        assert!(KeyValue::from(5) > KeyValue::from(1).type_min().0);
    }

    #[test]
    fn test_approx_size_grows_with_content() {
        let small = approx_document_size(&json!({"a": 1}));
        let large = approx_document_size(&json!({"a": 1, "b": "a long string value"}));
        assert!(large > small);
    }
}
