//! Residual predicate evaluation
//!
//! A `MatchExpression` is a conjunction of predicates. It can be evaluated
//! against a full document or against the projection of an index key, which
//! lets index scans filter without touching the record.

use serde::{Deserialize, Serialize};

use crate::document::{collect_dotted, Document, IndexKey, KeyPattern, KeyValue};

use super::predicate::Predicate;

/// Anything a predicate can be evaluated against
pub trait MatchableDocument {
    /// Candidate values at `path`; arrays contribute themselves and their elements.
    fn values_at(&self, path: &str) -> Vec<KeyValue>;
}

impl MatchableDocument for Document {
    fn values_at(&self, path: &str) -> Vec<KeyValue> {
        collect_dotted(self, path)
            .into_iter()
            .map(KeyValue::from_json)
            .collect()
    }
}

/// An index key seen as a document whose fields are the key pattern's paths.
#[derive(Debug, Clone, Copy)]
pub struct IndexKeyMatchable<'a> {
    pattern: &'a KeyPattern,
    key: &'a IndexKey,
}

impl<'a> IndexKeyMatchable<'a> {
    /// Wraps a key and the pattern describing it
    pub fn new(pattern: &'a KeyPattern, key: &'a IndexKey) -> Self {
        Self { pattern, key }
    }
}

impl MatchableDocument for IndexKeyMatchable<'_> {
    fn values_at(&self, path: &str) -> Vec<KeyValue> {
        self.pattern
            .position(path)
            .and_then(|i| self.key.get(i))
            .cloned()
            .into_iter()
            .collect()
    }
}

/// Conjunction of predicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchExpression {
    predicates: Vec<Predicate>,
}

impl MatchExpression {
    /// Creates an expression matching when every predicate matches
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    /// The predicates of the conjunction
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Returns true if there is nothing to test
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Checks a document against all predicates (AND semantics).
    ///
    /// Missing fields never match.
    pub fn matches<D: MatchableDocument + ?Sized>(&self, doc: &D) -> bool {
        self.predicates.iter().all(|pred| {
            doc.values_at(&pred.field)
                .iter()
                .any(|value| pred.op.test(value))
        })
    }
}
