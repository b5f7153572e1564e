//! Executor counters
//!
//! Counters only, monotonic, reset on process start. Relaxed atomics: a
//! snapshot taken while queries run may mix values from different moments.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Registry of plan execution counters, shared by every executor.
#[derive(Debug, Default)]
pub struct ExecMetrics {
    queries_executed: AtomicU64,
    queries_failed: AtomicU64,
    queries_interrupted: AtomicU64,
    documents_returned: AtomicU64,
    yields: AtomicU64,
    fetch_requests: AtomicU64,
    works: AtomicU64,
}

impl ExecMetrics {
    /// Creates a registry with every counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// A query ran to EOF
    pub fn increment_queries_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// A query ended with an error
    pub fn increment_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A query was killed or ran past its deadline
    pub fn increment_queries_interrupted(&self) {
        self.queries_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    /// Documents handed to the caller
    pub fn add_documents_returned(&self, n: u64) {
        self.documents_returned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_yields(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetch_requests(&self) {
        self.fetch_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_works(&self) {
        self.works.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> ExecMetricsSnapshot {
        ExecMetricsSnapshot {
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            queries_interrupted: self.queries_interrupted.load(Ordering::Relaxed),
            documents_returned: self.documents_returned.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            fetch_requests: self.fetch_requests.load(Ordering::Relaxed),
            works: self.works.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of the executor counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecMetricsSnapshot {
    pub queries_executed: u64,
    pub queries_failed: u64,
    pub queries_interrupted: u64,
    pub documents_returned: u64,
    pub yields: u64,
    pub fetch_requests: u64,
    pub works: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(ExecMetrics::new().snapshot(), ExecMetricsSnapshot::default());
    }

    #[test]
    fn test_increments() {
        let metrics = ExecMetrics::new();
        metrics.increment_queries_executed();
        metrics.add_documents_returned(5);
        metrics.increment_yields();
        metrics.increment_yields();

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_executed, 1);
        assert_eq!(snap.documents_returned, 5);
        assert_eq!(snap.yields, 2);
        assert_eq!(snap.queries_failed, 0);
    }

    #[test]
    fn test_to_json() {
        let metrics = ExecMetrics::new();
        metrics.increment_fetch_requests();
        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["fetch_requests"], 1);
        assert_eq!(parsed["works"], 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(ExecMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.increment_works();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().works, 4000);
    }
}
