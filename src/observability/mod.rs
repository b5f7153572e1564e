//! Observability subsystem
//!
//! - Structured JSON logging with a process-wide minimum severity
//! - Executor counters
//!
//! ```ignore
//! use aeroexec::observability::{ExecMetrics, Logger};
//!
//! Logger::info("OPLOG_START_EXTENT_HOPPING", &[("extents", "12")]);
//!
//! let metrics = ExecMetrics::new();
//! metrics.increment_queries_executed();
//! ```

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::{ExecMetrics, ExecMetricsSnapshot};
