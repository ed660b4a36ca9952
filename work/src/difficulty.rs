//! Work values and difficulty multipliers.

use lattice_crypto::blake2b_64_multi;
use lattice_types::Root;

/// The difficulty a nonce achieves against a root: the little-endian 64-bit
/// Blake2b digest of `nonce ∥ root`.
pub fn work_value(root: &Root, work: u64) -> u64 {
    blake2b_64_multi(&[&work.to_le_bytes(), root.as_bytes()])
}

/// Express a difficulty as a multiplier of a base threshold.
///
/// A multiplier of 2 means the work is twice as hard to find as the base.
pub fn to_multiplier(difficulty: u64, base: u64) -> f64 {
    debug_assert!(base > 0 && difficulty > 0);
    base.wrapping_neg() as f64 / difficulty.wrapping_neg() as f64
}

/// Inverse of [`to_multiplier`].
pub fn from_multiplier(multiplier: f64, base: u64) -> u64 {
    debug_assert!(multiplier > 0.0);
    let inverse = (base.wrapping_neg() as f64 / multiplier) as u64;
    inverse.wrapping_neg()
}
