//! Predicate structures
//!
//! A predicate compares one dotted field path against a literal. Predicates are
//! shared by the residual matcher and by index bounds derivation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::KeyValue;

/// Filter operation types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equality: field = value
    Eq(Value),
    /// Greater than or equal: field >= value
    Gte(Value),
    /// Greater than: field > value
    Gt(Value),
    /// Less than or equal: field <= value
    Lte(Value),
    /// Less than: field < value
    Lt(Value),
    /// Membership: field equals any listed value
    In(Vec<Value>),
}

impl FilterOp {
    /// Returns true if this is an equality or membership operation
    pub fn is_equality(&self) -> bool {
        matches!(self, FilterOp::Eq(_) | FilterOp::In(_))
    }

    /// Returns true if this is a range operation
    pub fn is_range(&self) -> bool {
        matches!(self, FilterOp::Gte(_) | FilterOp::Gt(_) | FilterOp::Lte(_) | FilterOp::Lt(_))
    }

    /// Returns the operation name for explain output
    pub fn op_name(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "eq",
            FilterOp::Gte(_) => "gte",
            FilterOp::Gt(_) => "gt",
            FilterOp::Lte(_) => "lte",
            FilterOp::Lt(_) => "lt",
            FilterOp::In(_) => "in",
        }
    }

    /// Tests a single (non-array-expanded) value.
    ///
    /// No type coercion: range comparisons only hold between values of the
    /// same canonical type. Null never matches.
    pub fn test(&self, actual: &KeyValue) -> bool {
        if matches!(actual, KeyValue::Null) {
            return false;
        }
        match self {
            FilterOp::Eq(expected) => *actual == KeyValue::from_json(expected),
            FilterOp::In(list) => list.iter().any(|v| *actual == KeyValue::from_json(v)),
            FilterOp::Gte(bound) => compare_same_type(actual, bound, |o| o.is_ge()),
            FilterOp::Gt(bound) => compare_same_type(actual, bound, |o| o.is_gt()),
            FilterOp::Lte(bound) => compare_same_type(actual, bound, |o| o.is_le()),
            FilterOp::Lt(bound) => compare_same_type(actual, bound, |o| o.is_lt()),
        }
    }
}

fn compare_same_type(
    actual: &KeyValue,
    bound: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let bound = KeyValue::from_json(bound);
    actual.same_type(&bound) && accept(actual.cmp(&bound))
}

/// A single predicate (field + operation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Dotted field path
    pub field: String,
    /// Filter operation
    pub op: FilterOp,
}

impl Predicate {
    /// Create an equality predicate
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq(value),
        }
    }

    /// Create a range predicate (gte)
    pub fn gte(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Gte(value),
        }
    }

    /// Create a range predicate (lte)
    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Lte(value),
        }
    }

    /// Create a range predicate (gt)
    pub fn gt(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Gt(value),
        }
    }

    /// Create a range predicate (lt)
    pub fn lt(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Lt(value),
        }
    }

    /// Create a membership predicate
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::In(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_type_coercion() {
        let op = FilterOp::Eq(json!("123"));
        assert!(!op.test(&KeyValue::from(123)));
        assert!(FilterOp::Eq(json!(123)).test(&KeyValue::from(123)));
    }

    #[test]
    fn test_ranges_stay_within_type() {
        assert!(FilterOp::Gt(json!(5)).test(&KeyValue::from(6)));
        assert!(!FilterOp::Gt(json!(5)).test(&KeyValue::from("zzz")));
        assert!(FilterOp::Lte(json!("b")).test(&KeyValue::from("a")));
    }

    #[test]
    fn test_null_never_matches() {
        assert!(!FilterOp::Eq(Value::Null).test(&KeyValue::Null));
    }

    #[test]
    fn test_in_matches_any() {
        let op = FilterOp::In(vec![json!(1), json!("x")]);
        assert!(op.test(&KeyValue::from("x")));
        assert!(!op.test(&KeyValue::from(2)));
        assert!(op.is_equality());
    }

    #[test]
    fn test_predicate_serde() {
        let pred: Predicate = serde_json::from_value(json!({"field": "ts", "op": {"lte": 50}})).unwrap();
        assert_eq!(pred, Predicate::lte("ts", json!(50)));
    }
}
