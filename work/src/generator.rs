//! Minimal CPU work generation.
//!
//! Production work comes from external workers; this sequential solver keeps
//! tests and dev networks self-sufficient.

use crate::difficulty::work_value;
use lattice_types::Root;

pub struct WorkGenerator {
    /// Give up after this many nonce attempts.
    limit: u64,
}

impl WorkGenerator {
    pub fn new() -> Self {
        Self { limit: u64::MAX }
    }

    pub fn with_limit(limit: u64) -> Self {
        Self { limit }
    }

    /// Find a nonce whose work value against `root` clears `threshold`.
    pub fn solve(&self, root: &Root, threshold: u64) -> Option<u64> {
        let mut nonce = 0u64;
        let mut attempts = 0u64;
        loop {
            if work_value(root, nonce) >= threshold {
                return Some(nonce);
            }
            attempts += 1;
            if attempts >= self.limit {
                return None;
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}

impl Default for WorkGenerator {
    fn default() -> Self {
        Self::new()
    }
}
