//! ed25519 message signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use lattice_types::{Account, Block, PrivateKey, Signature, Vote};

/// Sign a message with a private key.
pub fn sign_message(message: &[u8], private: &PrivateKey) -> Signature {
    let signing = SigningKey::from_bytes(&private.0);
    Signature(signing.sign(message).to_bytes())
}

/// Verify a signature against a message and a 32-byte public key.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &[u8; 32]) -> bool {
    let Ok(verifying) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying.verify(message, &sig).is_ok()
}

/// Verify a block's signature against the given signer account.
///
/// The signer is usually the block's account; epoch blocks verify against
/// the network's epoch signer instead, which is the caller's decision.
pub fn validate_block_signature(block: &Block, signer: &Account) -> bool {
    verify_signature(
        block.hash().as_bytes(),
        block.signature(),
        signer.as_bytes(),
    )
}

/// Verify a vote's signature against its voting account.
pub fn validate_vote(vote: &Vote) -> bool {
    verify_signature(
        vote.hash().as_bytes(),
        &vote.signature,
        vote.account.as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_private;
    use lattice_types::{BlockHash, ReceiveBlock};

    #[test]
    fn sign_and_verify() {
        let keys = keypair_from_private(&PrivateKey([1u8; 32]));
        let signature = sign_message(b"message", &keys.private);
        assert!(verify_signature(b"message", &signature, &keys.public.0));
        assert!(!verify_signature(b"other", &signature, &keys.public.0));
    }

    #[test]
    fn block_signature_binds_to_signer() {
        let keys = keypair_from_private(&PrivateKey([2u8; 32]));
        let other = keypair_from_private(&PrivateKey([3u8; 32]));
        let mut block = Block::Receive(ReceiveBlock {
            previous: BlockHash::new([1; 32]),
            source: BlockHash::new([2; 32]),
            signature: Signature::ZERO,
            work: 0,
        });
        block.set_signature(sign_message(block.hash().as_bytes(), &keys.private));
        assert!(validate_block_signature(&block, &keys.account()));
        assert!(!validate_block_signature(&block, &other.account()));
    }

    #[test]
    fn vote_signature() {
        let keys = keypair_from_private(&PrivateKey([4u8; 32]));
        let mut vote =
            Vote::new_hashes(keys.account(), 5, vec![BlockHash::new([9; 32])]).unwrap();
        vote.signature = sign_message(vote.hash().as_bytes(), &keys.private);
        assert!(validate_vote(&vote));

        // Tampering with the sequence invalidates the signature.
        vote.sequence = 6;
        assert!(!validate_vote(&vote));
    }
}
