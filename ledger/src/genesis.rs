//! Per-network genesis blocks and ledger constants.

use lattice_crypto::{keypair_from_private, sign_message, KeyPair};
use lattice_types::{
    Account, Amount, Block, Epoch, Epochs, Link, Network, OpenBlock, PrivateKey, Signature,
};

/// The well-known development key controlling the beta and test genesis.
/// Live funds never touch it.
const DEV_PRIVATE_KEY: [u8; 32] = [
    0x9F, 0x1D, 0x53, 0xE7, 0x32, 0x96, 0x2D, 0x3C, 0xCD, 0x24, 0x45, 0x8A, 0x1F, 0x06, 0x1E,
    0x10, 0x5A, 0x77, 0x6F, 0x4C, 0xAB, 0xE5, 0x50, 0x22, 0x8A, 0x9E, 0x5B, 0x66, 0x88, 0x9A,
    0x07, 0x16,
];

/// Live genesis account public key.
const LIVE_GENESIS_ACCOUNT: &str =
    "06f23f8de09a1131f5bcfebed27a1f41a2e2976d553d14cbcf9db7989f581ad1";

/// Live genesis open-block signature, published with the network.
const LIVE_GENESIS_SIGNATURE: &str =
    "b28d0dd00eb43e17efefb56f7b73a4cf9e57452532eea00eb2e827a80826a6e4\
     2feb3346d318669b40aa2f54a67df02b06bbc69a51ad0de21639124fc8dacd05";

const LIVE_GENESIS_WORK: u64 = 0x2F1A_AE30_6B21_9E0E;

/// The link value that designates an epoch-1 upgrade block: the ASCII text
/// `epoch v1 block` left-aligned in 32 bytes.
pub const EPOCH_1_LINK: [u8; 32] = *b"epoch v1 block\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0";

fn decode_hex_32(s: &str) -> [u8; 32] {
    let bytes = hex::decode(s).expect("genesis constant is valid hex");
    bytes.try_into().expect("genesis constant is 32 bytes")
}

fn decode_hex_64(s: &str) -> [u8; 64] {
    let bytes = hex::decode(s).expect("genesis constant is valid hex");
    bytes.try_into().expect("genesis constant is 64 bytes")
}

/// The development key pair, available on beta and test networks only.
pub fn dev_genesis_key() -> KeyPair {
    keypair_from_private(&PrivateKey(DEV_PRIVATE_KEY))
}

/// The genesis open block for a network. Beta and test genesis are signed at
/// startup with the development key (ed25519 signing is deterministic, so
/// the block is identical on every node); the live block ships as constants.
pub fn genesis_block(network: Network) -> Block {
    match network {
        Network::Live => {
            let account = Account::new(decode_hex_32(LIVE_GENESIS_ACCOUNT));
            Block::Open(OpenBlock {
                source: account.into(),
                representative: account,
                account,
                signature: Signature(decode_hex_64(LIVE_GENESIS_SIGNATURE)),
                work: LIVE_GENESIS_WORK,
            })
        }
        Network::Beta | Network::Test => {
            let keys = dev_genesis_key();
            let account = keys.account();
            let mut block = Block::Open(OpenBlock {
                source: account.into(),
                representative: account,
                account,
                signature: Signature::ZERO,
                work: 0,
            });
            let signature = sign_message(block.hash().as_bytes(), &keys.private);
            block.set_signature(signature);
            block
        }
    }
}

/// Network-fixed ledger constants.
pub struct LedgerConstants {
    pub network: Network,
    pub genesis: Block,
    pub genesis_account: Account,
    pub genesis_amount: Amount,
    pub burn_account: Account,
    pub epochs: Epochs,
}

impl LedgerConstants {
    pub fn new(network: Network) -> Self {
        let genesis = genesis_block(network);
        let genesis_account = genesis
            .account_field()
            .expect("genesis is an open block");
        let mut epochs = Epochs::new();
        epochs.add(Epoch::Epoch1, Link::new(EPOCH_1_LINK), genesis_account);
        Self {
            network,
            genesis,
            genesis_account,
            genesis_amount: Amount::MAX,
            burn_account: Account::BURN,
            epochs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crypto::validate_block_signature;

    #[test]
    fn test_genesis_is_deterministic_and_signed() {
        let a = genesis_block(Network::Test);
        let b = genesis_block(Network::Test);
        assert_eq!(a, b);
        let account = a.account_field().unwrap();
        assert!(validate_block_signature(&a, &account));
    }

    #[test]
    fn networks_have_distinct_genesis() {
        assert_ne!(
            genesis_block(Network::Live).hash(),
            genesis_block(Network::Test).hash()
        );
    }

    #[test]
    fn epoch_link_registered() {
        let constants = LedgerConstants::new(Network::Test);
        assert!(constants.epochs.is_epoch_link(&Link::new(EPOCH_1_LINK)));
        assert_eq!(
            constants.epochs.signer(Epoch::Epoch1),
            Some(constants.genesis_account)
        );
    }
}
