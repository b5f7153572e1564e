//! Document model for aeroexec
//!
//! Documents are opaque `serde_json::Value` objects; the engine never interprets
//! them beyond field access. Keys extracted from documents are `KeyValue`s with
//! a total ordering so indexes, bounds and sorts agree on one order.

mod key;
mod path;
mod value;

pub use key::{compare_values_with, Direction, IndexKey, KeyField, KeyPattern};
pub use path::{collect_dotted, get_dotted};
pub use value::{approx_document_size, KeyValue};

/// The opaque document type flowing through the engine
pub type Document = serde_json::Value;
