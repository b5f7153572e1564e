//! B-tree key generation
//!
//! Turns a document into the set of keys an index over `pattern` stores for
//! it. Arrays along an indexed path produce one key per element, which makes
//! the index multikey. At most one indexed field may traverse an array.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::document::{Document, IndexKey, KeyPattern, KeyValue};

use super::errors::{IndexError, IndexResult};

/// Keys generated for one document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeneratedKeys {
    /// Distinct keys, ascending
    pub keys: Vec<IndexKey>,
    /// True if an indexed path traversed an array
    pub multikey: bool,
}

/// Values found for one pattern field
struct FieldValues {
    values: Vec<KeyValue>,
    traversed_array: bool,
    missing: bool,
}

/// Key generator shared by index maintenance and sort key computation.
#[derive(Debug, Clone)]
pub struct BtreeKeyGenerator {
    pattern: KeyPattern,
    sparse: bool,
}

impl BtreeKeyGenerator {
    /// Creates a generator for `pattern`.
    ///
    /// With `sparse`, documents missing every indexed field produce no keys.
    pub fn new(pattern: KeyPattern, sparse: bool) -> IndexResult<Self> {
        if pattern.is_empty() {
            return Err(IndexError::InvalidKeyPattern("empty key pattern".into()));
        }
        if pattern.fields().iter().any(|f| f.path.is_empty()) {
            return Err(IndexError::InvalidKeyPattern(format!(
                "empty field path in {}",
                pattern
            )));
        }
        Ok(Self { pattern, sparse })
    }

    /// The pattern keys are generated for
    pub fn pattern(&self) -> &KeyPattern {
        &self.pattern
    }

    /// Generates the keys for `doc`.
    pub fn get_keys(&self, doc: &Document) -> IndexResult<GeneratedKeys> {
        let mut per_field = Vec::with_capacity(self.pattern.len());
        let mut array_field: Option<&str> = None;

        for field in self.pattern.fields() {
            let found = extract(doc, &field.path);
            if found.traversed_array {
                if let Some(first) = array_field {
                    return Err(IndexError::ParallelArrays {
                        first: first.to_string(),
                        second: field.path.clone(),
                    });
                }
                array_field = Some(field.path.as_str());
            }
            per_field.push(found);
        }

        if self.sparse && per_field.iter().all(|f| f.missing) {
            return Ok(GeneratedKeys::default());
        }

        let multikey = array_field.is_some();
        let mut keys: BTreeSet<Vec<KeyValue>> = BTreeSet::new();
        keys.insert(Vec::with_capacity(per_field.len()));
        for field in per_field {
            keys = keys
                .into_iter()
                .flat_map(|prefix| {
                    field.values.iter().map(move |v| {
                        let mut key = prefix.clone();
                        key.push(v.clone());
                        key
                    })
                })
                .collect();
        }

        Ok(GeneratedKeys {
            keys: keys.into_iter().map(IndexKey::new).collect(),
            multikey,
        })
    }
}

fn extract(doc: &Value, path: &str) -> FieldValues {
    let segments: Vec<&str> = path.split('.').collect();
    let mut values = Vec::new();
    let mut traversed_array = false;
    walk(doc, &segments, &mut values, &mut traversed_array);

    let missing = values.is_empty();
    if missing {
        values.push(KeyValue::Null);
    }
    FieldValues {
        values,
        traversed_array,
        missing,
    }
}

fn walk(value: &Value, segments: &[&str], out: &mut Vec<KeyValue>, traversed: &mut bool) {
    let Some((head, rest)) = segments.split_first() else {
        match value {
            Value::Array(items) if items.is_empty() => {
                *traversed = true;
                out.push(KeyValue::Null);
            }
            Value::Array(items) => {
                *traversed = true;
                out.extend(items.iter().map(KeyValue::from_json));
            }
            other => out.push(KeyValue::from_json(other)),
        }
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                walk(child, rest, out, traversed);
            }
        }
        Value::Array(items) => {
            if let Ok(idx) = head.parse::<usize>() {
                if let Some(child) = items.get(idx) {
                    walk(child, rest, out, traversed);
                    return;
                }
            }
            *traversed = true;
            for item in items.iter().filter(|item| item.is_object()) {
                walk(item, segments, out, traversed);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Direction;
    use serde_json::json;

    fn keys_of(pattern: &[&str], doc: Value) -> IndexResult<GeneratedKeys> {
        BtreeKeyGenerator::new(KeyPattern::ascending(pattern), false)?.get_keys(&doc)
    }

    fn key(values: Vec<KeyValue>) -> IndexKey {
        IndexKey::new(values)
    }

    #[test]
    fn test_scalar_fields() {
        let generated = keys_of(&["a", "b.c"], json!({"a": 1, "b": {"c": "x"}})).unwrap();
        assert_eq!(generated.keys, vec![key(vec![KeyValue::from(1), KeyValue::from("x")])]);
        assert!(!generated.multikey);
    }

    #[test]
    fn test_missing_field_is_null() {
        let generated = keys_of(&["a"], json!({"b": 1})).unwrap();
        assert_eq!(generated.keys, vec![key(vec![KeyValue::Null])]);
    }

    #[test]
    fn test_array_expands_and_dedups() {
        let generated = keys_of(&["a"], json!({"a": [3, 1, 3]})).unwrap();
        assert_eq!(
            generated.keys,
            vec![key(vec![KeyValue::from(1)]), key(vec![KeyValue::from(3)])]
        );
        assert!(generated.multikey);
    }

    #[test]
    fn test_empty_array_is_null() {
        let generated = keys_of(&["a"], json!({"a": []})).unwrap();
        assert_eq!(generated.keys, vec![key(vec![KeyValue::Null])]);
        assert!(generated.multikey);
    }

    #[test]
    fn test_array_of_subdocuments() {
        let generated = keys_of(&["a.b"], json!({"a": [{"b": 2}, {"b": 1}, {"c": 0}]})).unwrap();
        assert_eq!(
            generated.keys,
            vec![key(vec![KeyValue::from(1)]), key(vec![KeyValue::from(2)])]
        );
    }

    #[test]
    fn test_parallel_arrays_rejected() {
        let err = keys_of(&["a", "b"], json!({"a": [1, 2], "b": [3]})).unwrap_err();
        assert_eq!(err.code(), "AERO_INDEX_PARALLEL_ARRAYS");
    }

    #[test]
    fn test_sparse_skips_missing_documents() {
        let gen = BtreeKeyGenerator::new(
            KeyPattern::new(vec![("a", Direction::Forward)]),
            true,
        )
        .unwrap();
        assert!(gen.get_keys(&json!({"z": 1})).unwrap().keys.is_empty());
        assert_eq!(gen.get_keys(&json!({"a": 1})).unwrap().keys.len(), 1);
    }

    #[test]
    fn test_generation_is_stable() {
        let doc = json!({"a": [2, 1], "b": 5});
        let first = keys_of(&["a", "b"], doc.clone()).unwrap();
        let second = keys_of(&["a", "b"], doc.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(doc, json!({"a": [2, 1], "b": 5}));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(BtreeKeyGenerator::new(KeyPattern::default(), false).is_err());
    }
}
