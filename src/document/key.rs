//! Index keys and key patterns
//!
//! An `IndexKey` is the ordered list of values an index stores for one entry.
//! A `KeyPattern` names the fields that make up the key and the direction each
//! field is ordered in, which together define the order of the index.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::value::KeyValue;

/// Ordering direction, used both for key pattern fields and for scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Ascending / forward
    Forward,
    /// Descending / backward
    Backward,
}

impl Direction {
    /// Builds a direction from a sign; anything negative is backward.
    pub fn from_sign(sign: i64) -> Self {
        if sign < 0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    /// Returns 1 or -1
    pub fn sign(&self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }

    /// Applies this direction to an ascending comparison.
    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Direction::Forward => ordering,
            Direction::Backward => ordering.reverse(),
        }
    }

    /// Composes two directions (backward twice is forward).
    pub fn combine(&self, other: Direction) -> Direction {
        if *self == other {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// The opposite direction
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// The values of one index entry, in key pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexKey(Vec<KeyValue>);

impl IndexKey {
    /// Creates a key from its values
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// The empty key
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Builds a key from JSON values
    pub fn from_json_values(values: &[Value]) -> Self {
        Self(values.iter().map(KeyValue::from_json).collect())
    }

    /// Returns true if the key has no values
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of values in the key
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Value at position `i`
    pub fn get(&self, i: usize) -> Option<&KeyValue> {
        self.0.get(i)
    }

    /// All values
    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// Consumes the key, returning its values
    pub fn into_values(self) -> Vec<KeyValue> {
        self.0
    }

    /// Approximate encoded size in bytes
    pub fn approx_size(&self) -> usize {
        5 + self.0.iter().map(KeyValue::approx_size).sum::<usize>()
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "}}")
    }
}

impl From<Vec<KeyValue>> for IndexKey {
    fn from(values: Vec<KeyValue>) -> Self {
        Self(values)
    }
}

/// One field of a key pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    /// Dotted path of the field
    pub path: String,
    /// Ordering of the field within the index
    pub direction: Direction,
}

/// Ordered list of fields and directions describing an index (or sort) order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyPattern {
    fields: Vec<KeyField>,
}

impl KeyPattern {
    /// Creates a pattern from (path, direction) pairs
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = (S, Direction)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(path, direction)| KeyField {
                    path: path.into(),
                    direction,
                })
                .collect(),
        }
    }

    /// All-ascending pattern over the given paths
    pub fn ascending(paths: &[&str]) -> Self {
        Self::new(paths.iter().map(|p| (*p, Direction::Forward)))
    }

    /// Parses a pattern of the form `{"a": 1, "b": -1}`.
    ///
    /// Returns None if the value is not an object or a direction is not numeric.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut fields = Vec::with_capacity(map.len());
        for (path, dir) in map {
            let sign = dir.as_f64()?;
            fields.push(KeyField {
                path: path.clone(),
                direction: Direction::from_sign(if sign < 0.0 { -1 } else { 1 }),
            });
        }
        Some(Self { fields })
    }

    /// Renders the pattern as `{"a": 1, "b": -1}`
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for field in &self.fields {
            map.insert(field.path.clone(), Value::from(field.direction.sign()));
        }
        Value::Object(map)
    }

    /// Pattern fields in order
    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the pattern has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field paths in order
    pub fn paths(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.path.clone()).collect()
    }

    /// Position of a field path within the pattern
    pub fn position(&self, path: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.path == path)
    }

    /// Direction of field `i`; positions past the pattern are ascending.
    pub fn direction_at(&self, i: usize) -> Direction {
        self.fields
            .get(i)
            .map(|f| f.direction)
            .unwrap_or(Direction::Forward)
    }

    /// Per-field directions as seen by a scan in `scan` direction.
    pub fn scan_directions(&self, scan: Direction) -> Vec<Direction> {
        self.fields.iter().map(|f| f.direction.combine(scan)).collect()
    }

    /// Compares two keys in index order.
    ///
    /// Field names are ignored; values are compared positionally and a key that
    /// is a prefix of another sorts first.
    pub fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        compare_values_with(a.values(), b.values(), |i| self.direction_at(i))
    }

    /// Projects a key into a JSON object keyed by this pattern's paths.
    pub fn key_to_json(&self, key: &IndexKey) -> Value {
        let mut map = Map::new();
        for (i, field) in self.fields.iter().enumerate() {
            let value = key.get(i).map(KeyValue::to_json).unwrap_or(Value::Null);
            map.insert(field.path.clone(), value);
        }
        Value::Object(map)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Positional comparison of two value lists with a per-position direction.
pub fn compare_values_with(
    a: &[KeyValue],
    b: &[KeyValue],
    direction_at: impl Fn(usize) -> Direction,
) -> Ordering {
    for (i, (va, vb)) in a.iter().zip(b.iter()).enumerate() {
        let ord = direction_at(i).apply(va.cmp(vb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}
