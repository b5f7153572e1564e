//! Residual predicate matching
//!
//! Filters strictly according to predicates: no type coercion, no
//! expressions. Used by scans and fetches to drop non-matching candidates and
//! by index bounds derivation.

mod filter;
mod predicate;

pub use filter::{IndexKeyMatchable, MatchExpression, MatchableDocument};
pub use predicate::{FilterOp, Predicate};
