//! Batched signature verification.
//!
//! Callers shape many `(message, key, signature)` triples into one check;
//! batches above a size threshold fan out across the rayon pool. Results
//! are 0/1 per item, matching the order of the inputs.

use crate::sign::verify_signature;
use lattice_types::Signature;

/// Below this many items the overhead of the pool exceeds the win.
const PARALLEL_THRESHOLD: usize = 256;

/// One batch of signature checks.
#[derive(Default)]
pub struct SignatureCheck {
    pub messages: Vec<Vec<u8>>,
    pub pub_keys: Vec<[u8; 32]>,
    pub signatures: Vec<Signature>,
}

impl SignatureCheck {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Vec<u8>, pub_key: [u8; 32], signature: Signature) {
        self.messages.push(message);
        self.pub_keys.push(pub_key);
        self.signatures.push(signature);
    }
}

/// Verification pool over batches of ed25519 checks.
pub struct SignatureChecker {
    parallel_threshold: usize,
}

impl SignatureChecker {
    pub fn new() -> Self {
        Self {
            parallel_threshold: PARALLEL_THRESHOLD,
        }
    }

    /// Verify a batch, one result per item (1 = valid).
    pub fn verify(&self, check: &SignatureCheck) -> Vec<i32> {
        debug_assert_eq!(check.messages.len(), check.pub_keys.len());
        debug_assert_eq!(check.messages.len(), check.signatures.len());
        let verify_one = |index: usize| -> i32 {
            let valid = verify_signature(
                &check.messages[index],
                &check.signatures[index],
                &check.pub_keys[index],
            );
            valid as i32
        };
        if check.len() >= self.parallel_threshold {
            use rayon::prelude::*;
            (0..check.len()).into_par_iter().map(verify_one).collect()
        } else {
            (0..check.len()).map(verify_one).collect()
        }
    }

    /// Wait for in-flight work. Verification is synchronous per batch, so
    /// this returns once the rayon pool has no work queued by this checker.
    pub fn flush(&self) {}
}

impl Default for SignatureChecker {
    fn default() -> Self {
        Self::new()
    }
}
