//! Key generation and derivation.

use ed25519_dalek::SigningKey;
use lattice_types::{Account, PrivateKey, PublicKey};
use rand::RngCore;

/// An ed25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// The account controlled by this key pair.
    pub fn account(&self) -> Account {
        Account::new(self.public.0)
    }
}

/// Generate a key pair from OS randomness.
pub fn random_keypair() -> KeyPair {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    keypair_from_private(&PrivateKey(seed))
}

/// Derive the key pair for a private key.
pub fn keypair_from_private(private: &PrivateKey) -> KeyPair {
    let signing = SigningKey::from_bytes(&private.0);
    KeyPair {
        public: PublicKey(signing.verifying_key().to_bytes()),
        private: private.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let private = PrivateKey([7u8; 32]);
        let a = keypair_from_private(&private);
        let b = keypair_from_private(&private);
        assert_eq!(a.public, b.public);
    }

    #[test]
    fn random_keys_differ() {
        assert_ne!(random_keypair().public, random_keypair().public);
    }
}
