//! Hashing and signing primitives for the lattice protocol.

pub mod batch;
pub mod hash;
pub mod keys;
pub mod sign;

pub use batch::{SignatureCheck, SignatureChecker};
pub use hash::{blake2b_256, blake2b_64, blake2b_64_multi};
pub use keys::{keypair_from_private, random_keypair, KeyPair};
pub use sign::{sign_message, validate_block_signature, validate_vote, verify_signature};
