//! Index bounds
//!
//! Bounds describe which part of an index a scan covers. A simple range is a
//! contiguous start/end key pair; interval bounds hold an ordered list of
//! intervals per key pattern field and need a bounds checker to walk.
//!
//! Intervals are always stored in ascending value order regardless of the
//! field or scan direction. The checker orients them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{IndexKey, KeyPattern, KeyValue};
use crate::matcher::{FilterOp, Predicate};

/// A range of values for one key field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower bound
    pub start: KeyValue,
    /// Whether `start` itself is in the interval
    pub start_inclusive: bool,
    /// Upper bound
    pub end: KeyValue,
    /// Whether `end` itself is in the interval
    pub end_inclusive: bool,
}

impl Interval {
    /// Creates an interval
    pub fn new(start: KeyValue, start_inclusive: bool, end: KeyValue, end_inclusive: bool) -> Self {
        Self {
            start,
            start_inclusive,
            end,
            end_inclusive,
        }
    }

    /// The single-value interval [v, v]
    pub fn point(value: KeyValue) -> Self {
        Self::new(value.clone(), true, value, true)
    }

    /// [MinKey, MaxKey]
    pub fn all_values() -> Self {
        Self::new(KeyValue::MinKey, true, KeyValue::MaxKey, true)
    }

    /// Returns true if no value can fall in the interval
    pub fn is_empty(&self) -> bool {
        match self.start.cmp(&self.end) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => !(self.start_inclusive && self.end_inclusive),
            std::cmp::Ordering::Less => false,
        }
    }

    /// Returns true if `value` lies in the interval
    pub fn contains(&self, value: &KeyValue) -> bool {
        let above_start = match value.cmp(&self.start) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.start_inclusive,
            std::cmp::Ordering::Less => false,
        };
        let below_end = match value.cmp(&self.end) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.end_inclusive,
            std::cmp::Ordering::Greater => false,
        };
        above_start && below_end
    }

    /// Intersection of two intervals, None if empty
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let (start, start_inclusive) = match self.start.cmp(&other.start) {
            std::cmp::Ordering::Greater => (self.start.clone(), self.start_inclusive),
            std::cmp::Ordering::Less => (other.start.clone(), other.start_inclusive),
            std::cmp::Ordering::Equal => {
                (self.start.clone(), self.start_inclusive && other.start_inclusive)
            }
        };
        let (end, end_inclusive) = match self.end.cmp(&other.end) {
            std::cmp::Ordering::Less => (self.end.clone(), self.end_inclusive),
            std::cmp::Ordering::Greater => (other.end.clone(), other.end_inclusive),
            std::cmp::Ordering::Equal => (self.end.clone(), self.end_inclusive && other.end_inclusive),
        };
        let interval = Interval::new(start, start_inclusive, end, end_inclusive);
        (!interval.is_empty()).then_some(interval)
    }

    fn from_op(op: &FilterOp) -> Vec<Interval> {
        let bracket = |v: &serde_json::Value| {
            let value = KeyValue::from_json(v);
            let (min, min_incl) = value.type_min();
            let (max, max_incl) = value.type_max();
            (value, min, min_incl, max, max_incl)
        };

        let mut intervals = match op {
            FilterOp::Eq(v) => vec![Interval::point(KeyValue::from_json(v))],
            FilterOp::In(values) => values
                .iter()
                .map(|v| Interval::point(KeyValue::from_json(v)))
                .collect(),
            FilterOp::Gt(v) => {
                let (value, _, _, max, max_incl) = bracket(v);
                vec![Interval::new(value, false, max, max_incl)]
            }
            FilterOp::Gte(v) => {
                let (value, _, _, max, max_incl) = bracket(v);
                vec![Interval::new(value, true, max, max_incl)]
            }
            FilterOp::Lt(v) => {
                let (value, min, min_incl, _, _) = bracket(v);
                vec![Interval::new(min, min_incl, value, false)]
            }
            FilterOp::Lte(v) => {
                let (value, min, min_incl, _, _) = bracket(v);
                vec![Interval::new(min, min_incl, value, true)]
            }
        };
        intervals.retain(|i| !i.is_empty());
        intervals.sort_by(|a, b| a.start.cmp(&b.start));
        intervals.dedup();
        intervals
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}, {}{}",
            if self.start_inclusive { "[" } else { "(" },
            self.start,
            self.end,
            if self.end_inclusive { "]" } else { ")" }
        )
    }
}

/// Ascending, non-overlapping intervals for one key pattern field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedIntervalList {
    /// Field path
    pub name: String,
    /// Intervals, ascending
    pub intervals: Vec<Interval>,
}

impl OrderedIntervalList {
    /// Creates a list covering every value
    pub fn all_values(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intervals: vec![Interval::all_values()],
        }
    }

    /// Returns true if `value` falls in any interval
    pub fn contains(&self, value: &KeyValue) -> bool {
        self.intervals.iter().any(|i| i.contains(value))
    }

    fn intersect(&mut self, other: &[Interval]) {
        let mut out = Vec::new();
        for a in &self.intervals {
            for b in other {
                if let Some(i) = a.intersect(b) {
                    out.push(i);
                }
            }
        }
        out.sort_by(|a, b| a.start.cmp(&b.start));
        self.intervals = out;
    }
}

impl fmt::Display for OrderedIntervalList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, " U ")?;
            }
            write!(f, "{}", interval)?;
        }
        Ok(())
    }
}

/// Interval bounds, one list per key pattern field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBounds {
    /// Per-field interval lists, in key pattern order
    pub fields: Vec<OrderedIntervalList>,
}

impl IndexBounds {
    /// Bounds covering the whole index
    pub fn all_values(pattern: &KeyPattern) -> Self {
        Self {
            fields: pattern
                .fields()
                .iter()
                .map(|f| OrderedIntervalList::all_values(f.path.clone()))
                .collect(),
        }
    }

    /// Derives bounds for `pattern` from conjunctive predicates.
    ///
    /// Range predicates are bracketed to the type of their operand, so
    /// `a > 5` covers numbers above five and nothing else. Returns None when
    /// no predicate constrains the leading field, since such bounds would not
    /// narrow a scan.
    pub fn from_predicates(pattern: &KeyPattern, predicates: &[Predicate]) -> Option<Self> {
        let leading = pattern.fields().first()?;
        if !predicates.iter().any(|p| p.field == leading.path) {
            return None;
        }

        let mut bounds = Self::all_values(pattern);
        for list in bounds.fields.iter_mut() {
            let name = list.name.clone();
            for pred in predicates.iter().filter(|p| p.field == name) {
                list.intersect(&Interval::from_op(&pred.op));
            }
        }
        Some(bounds)
    }

    /// Returns true if every value of `key` falls in its field's intervals.
    pub fn is_valid_key(&self, key: &IndexKey) -> bool {
        key.len() == self.fields.len()
            && self
                .fields
                .iter()
                .zip(key.values())
                .all(|(list, value)| list.contains(value))
    }

    /// Returns true if some field has no intervals left
    pub fn is_empty(&self) -> bool {
        self.fields.iter().any(|f| f.intervals.is_empty())
    }
}

impl fmt::Display for IndexBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, "}}")
    }
}

/// What an index scan covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanBounds {
    /// Contiguous range. An empty end key scans to the end of the index.
    SimpleRange {
        start_key: IndexKey,
        end_key: IndexKey,
        end_key_inclusive: bool,
    },
    /// Per-field intervals walked with a bounds checker
    Intervals(IndexBounds),
}

impl fmt::Display for ScanBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanBounds::SimpleRange {
                start_key,
                end_key,
                end_key_inclusive,
            } => write!(
                f,
                "{} -> {}{}",
                start_key,
                end_key,
                if *end_key_inclusive { " (inclusive)" } else { "" }
            ),
            ScanBounds::Intervals(bounds) => write!(f, "{}", bounds),
        }
    }
}
