//! aeroexec - pull-based query execution for AeroDB
//!
//! Stage trees pulled one `work()` call at a time, sharing a working set of
//! candidate results. Storage, indexes and matching are in-memory reference
//! implementations of the interfaces the stages consume.

pub mod config;
pub mod document;
pub mod exec;
pub mod index;
pub mod matcher;
pub mod observability;
pub mod storage;
