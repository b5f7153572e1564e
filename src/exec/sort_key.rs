//! Sort patterns and sort key generation
//!
//! A sort pattern mixes ordinary fields with the text score meta term. The
//! ordinary fields form an index-style key pattern and go through the B-tree
//! key generator, so array fields sort the way an index over them would.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};

use crate::document::{compare_values_with, Direction, Document, IndexKey, KeyPattern, KeyValue};
use crate::index::{BtreeKeyGenerator, IndexBounds};
use crate::matcher::Predicate;
use crate::observability::Logger;

use super::errors::{ExecError, ExecResult};
use super::working_set::WorkingSetMember;

/// One term of a sort pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortTerm {
    /// Ordinary field
    Field { path: String, direction: Direction },
    /// Text relevance score, highest first
    TextScore,
}

/// Ordered list of sort terms
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortPattern {
    terms: Vec<SortTerm>,
}

impl SortPattern {
    /// Creates a pattern from terms
    pub fn new(terms: Vec<SortTerm>) -> Self {
        Self { terms }
    }

    /// Parses `{"a": 1, "b": -1, "score": {"$meta": "textScore"}}`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut terms = Vec::with_capacity(map.len());
        for (path, term) in map {
            if let Some(sign) = term.as_f64() {
                terms.push(SortTerm::Field {
                    path: path.clone(),
                    direction: if sign < 0.0 { Direction::Backward } else { Direction::Forward },
                });
            } else if term.get("$meta").and_then(Value::as_str) == Some("textScore") {
                terms.push(SortTerm::TextScore);
            } else {
                return None;
            }
        }
        Some(Self { terms })
    }

    /// Sort terms in order
    pub fn terms(&self) -> &[SortTerm] {
        &self.terms
    }

    /// The ordinary fields as an index key pattern
    pub fn btree_pattern(&self) -> KeyPattern {
        KeyPattern::new(self.terms.iter().filter_map(|t| match t {
            SortTerm::Field { path, direction } => Some((path.clone(), *direction)),
            SortTerm::TextScore => None,
        }))
    }

    /// Direction of each sort key position
    pub fn directions(&self) -> Vec<Direction> {
        self.terms
            .iter()
            .map(|t| match t {
                SortTerm::Field { direction, .. } => *direction,
                SortTerm::TextScore => Direction::Backward,
            })
            .collect()
    }

    /// Returns true if a term sorts by text score
    pub fn has_text_score(&self) -> bool {
        self.terms.iter().any(|t| matches!(t, SortTerm::TextScore))
    }
}

impl fmt::Display for SortPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = Map::new();
        for term in &self.terms {
            match term {
                SortTerm::Field { path, direction } => {
                    map.insert(path.clone(), Value::from(direction.sign()));
                }
                SortTerm::TextScore => {
                    map.insert("$textScore".into(), serde_json::json!({"$meta": "textScore"}));
                }
            }
        }
        write!(f, "{}", Value::Object(map))
    }
}

/// Computes sort keys for working set members.
#[derive(Debug, Clone)]
pub struct SortStageKeyGenerator {
    pattern: SortPattern,
    btree_pattern: KeyPattern,
    key_gen: Option<BtreeKeyGenerator>,
    bounds: Option<IndexBounds>,
    directions: Vec<Direction>,
}

impl SortStageKeyGenerator {
    /// Builds a generator for `pattern`. `query` narrows which candidate key
    /// an array field sorts by.
    pub fn new(pattern: &SortPattern, query: &[Predicate]) -> ExecResult<Self> {
        let btree_pattern = pattern.btree_pattern();
        let (key_gen, bounds) = if btree_pattern.is_empty() {
            (None, None)
        } else {
            let key_gen = BtreeKeyGenerator::new(btree_pattern.clone(), false)
                .map_err(|err| ExecError::stage_failure("SORT", err.to_string()))?;
            (Some(key_gen), IndexBounds::from_predicates(&btree_pattern, query))
        };
        Ok(Self {
            pattern: pattern.clone(),
            btree_pattern,
            key_gen,
            bounds,
            directions: pattern.directions(),
        })
    }

    /// Compares two sort keys in sort order
    pub fn compare(&self, a: &[KeyValue], b: &[KeyValue]) -> Ordering {
        compare_values_with(a, b, |i| {
            self.directions.get(i).copied().unwrap_or(Direction::Forward)
        })
    }

    /// The full sort key for a member: B-tree part merged with meta terms.
    pub fn get_sort_key(&self, member: &WorkingSetMember) -> Vec<KeyValue> {
        let btree_key = match member.obj() {
            Some(obj) => self.get_btree_key(obj),
            None => Vec::new(),
        };
        if !self.pattern.has_text_score() {
            return btree_key;
        }

        let mut btree_values = btree_key.into_iter();
        self.pattern
            .terms()
            .iter()
            .map(|term| match term {
                SortTerm::Field { .. } => btree_values.next().unwrap_or(KeyValue::Null),
                SortTerm::TextScore => KeyValue::Number(member.text_score().unwrap_or(0.0)),
            })
            .collect()
    }

    /// Chooses the key an index over the ordinary sort fields would sort
    /// `doc` by.
    fn get_btree_key(&self, doc: &Document) -> Vec<KeyValue> {
        let Some(key_gen) = &self.key_gen else {
            return Vec::new();
        };

        let mut keys = match key_gen.get_keys(doc) {
            Ok(generated) if !generated.keys.is_empty() => generated.keys,
            Ok(_) => return self.fallback_key(doc, "no keys generated"),
            Err(err) => return self.fallback_key(doc, &err.to_string()),
        };
        keys.sort_by(|a, b| self.btree_pattern.compare(a, b));

        // Only keys inside the query's bounds belong to a matching document.
        let chosen = match &self.bounds {
            Some(bounds) => keys
                .iter()
                .position(|k| bounds.is_valid_key(k))
                .unwrap_or(0),
            None => 0,
        };
        keys.swap_remove(chosen).into_values()
    }

    fn fallback_key(&self, doc: &Document, reason: &str) -> Vec<KeyValue> {
        Logger::trace(
            "SORT_KEY_FALLBACK",
            &[("pattern", &self.pattern.to_string()), ("reason", reason)],
        );
        IndexKey::new(vec![KeyValue::from_json(doc)]).into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::working_set::ComputedData;
    use serde_json::json;

    fn member(doc: Value) -> WorkingSetMember {
        let mut member = WorkingSetMember::default();
        member.set_owned_obj(None, doc);
        member
    }

    fn generator(value: Value, query: &[Predicate]) -> SortStageKeyGenerator {
        SortStageKeyGenerator::new(&SortPattern::from_json(&value).unwrap(), query).unwrap()
    }

    #[test]
    fn test_parse_pattern() {
        let pattern = SortPattern::from_json(&json!({"a": 1, "s": {"$meta": "textScore"}, "b": -1})).unwrap();
        assert_eq!(pattern.terms().len(), 3);
        assert_eq!(pattern.btree_pattern(), KeyPattern::new(vec![("a", Direction::Forward), ("b", Direction::Backward)]));
        assert_eq!(
            pattern.directions(),
            vec![Direction::Forward, Direction::Backward, Direction::Backward]
        );
        assert!(SortPattern::from_json(&json!({"a": "up"})).is_none());
    }

    #[test]
    fn test_array_uses_smallest_key_ascending() {
        let gen = generator(json!({"a": 1}), &[]);
        assert_eq!(gen.get_sort_key(&member(json!({"a": [10, 1]}))), vec![KeyValue::from(1)]);
    }

    #[test]
    fn test_array_uses_largest_key_descending() {
        let gen = generator(json!({"a": -1}), &[]);
        assert_eq!(gen.get_sort_key(&member(json!({"a": [10, 1]}))), vec![KeyValue::from(10)]);
    }

    #[test]
    fn test_bounds_narrow_candidate_keys() {
        let gen = generator(json!({"a": 1}), &[Predicate::gte("a", json!(5))]);
        assert_eq!(gen.get_sort_key(&member(json!({"a": [1, 10]}))), vec![KeyValue::from(10)]);
    }

    #[test]
    fn test_parallel_arrays_fall_back_to_document() {
        let doc = json!({"a": [1], "b": [2]});
        let gen = generator(json!({"a": 1, "b": 1}), &[]);
        assert_eq!(gen.get_sort_key(&member(doc.clone())), vec![KeyValue::from_json(&doc)]);
    }

    #[test]
    fn test_text_score_merged_in_order() {
        let gen = generator(json!({"s": {"$meta": "textScore"}, "a": 1}), &[]);
        let mut m = member(json!({"a": 3}));
        m.add_computed(ComputedData::TextScore(2.5));
        assert_eq!(gen.get_sort_key(&m), vec![KeyValue::from(2.5), KeyValue::from(3)]);

        let higher = vec![KeyValue::from(4.0), KeyValue::from(3)];
        assert_eq!(gen.compare(&higher, &gen.get_sort_key(&m)), Ordering::Less);
    }

    #[test]
    fn test_key_generation_is_repeatable() {
        let gen = generator(json!({"a": 1, "b": -1}), &[]);
        let m = member(json!({"a": [3, 2], "b": 1}));
        assert_eq!(gen.get_sort_key(&m), gen.get_sort_key(&m));
        assert_eq!(m.obj(), Some(&json!({"a": [3, 2], "b": 1})));
    }
}
