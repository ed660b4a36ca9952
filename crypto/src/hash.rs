//! Blake2b hashing helpers.

use blake2::digest::consts::{U32, U8};
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;
type Blake2b64 = Blake2b<U8>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute a 64-bit Blake2b digest, used for proof-of-work values.
pub fn blake2b_64(data: &[u8]) -> u64 {
    let mut hasher = Blake2b64::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 8];
    output.copy_from_slice(&result);
    u64::from_le_bytes(output)
}

/// Hash multiple byte slices in sequence into a 64-bit digest.
pub fn blake2b_64_multi(parts: &[&[u8]]) -> u64 {
    let mut hasher = Blake2b64::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 8];
    output.copy_from_slice(&result);
    u64::from_le_bytes(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2b_deterministic() {
        assert_eq!(blake2b_256(b"lattice"), blake2b_256(b"lattice"));
        assert_ne!(blake2b_256(b"a"), blake2b_256(b"b"));
    }

    #[test]
    fn multi_matches_concatenation() {
        let single = blake2b_64(b"helloworld");
        let multi = blake2b_64_multi(&[b"hello", b"world"]);
        assert_eq!(single, multi);
    }
}
