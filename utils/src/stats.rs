//! Node statistics counters.
//!
//! Counters are keyed by a `(type, detail)` pair of static names, created
//! lazily on first increment. Snapshots feed the CLI debug dumps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Thread-safe named counters.
#[derive(Default)]
pub struct Stats {
    counters: Mutex<HashMap<(&'static str, &'static str), Arc<AtomicU64>>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `(stat_type, detail)` by one.
    pub fn inc(&self, stat_type: &'static str, detail: &'static str) {
        self.add(stat_type, detail, 1);
    }

    pub fn add(&self, stat_type: &'static str, detail: &'static str, value: u64) {
        let counter = {
            let mut counters = self.counters.lock().unwrap();
            counters
                .entry((stat_type, detail))
                .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                .clone()
        };
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self, stat_type: &'static str, detail: &'static str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&(stat_type, detail))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sorted `(type, detail, count)` rows for diagnostics.
    pub fn snapshot(&self) -> Vec<(&'static str, &'static str, u64)> {
        let counters = self.counters.lock().unwrap();
        let mut rows: Vec<_> = counters
            .iter()
            .map(|(&(t, d), c)| (t, d, c.load(Ordering::Relaxed)))
            .collect();
        rows.sort();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let stats = Stats::new();
        stats.inc("ledger", "progress");
        stats.inc("ledger", "progress");
        stats.add("ledger", "fork", 5);
        assert_eq!(stats.count("ledger", "progress"), 2);
        assert_eq!(stats.count("ledger", "fork"), 5);
        assert_eq!(stats.count("ledger", "old"), 0);
    }

    #[test]
    fn snapshot_is_sorted() {
        let stats = Stats::new();
        stats.inc("vote", "replay");
        stats.inc("ledger", "progress");
        let rows = stats.snapshot();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].0 <= rows[1].0);
    }
}
