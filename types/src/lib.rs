//! Fundamental types for the lattice protocol.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: hashes, accounts, amounts, the five block variants, sidebands,
//! account metadata, pending entries, votes, epochs, and network parameters.

pub mod account;
pub mod amount;
pub mod block;
pub mod epoch;
pub mod hash;
pub mod info;
pub mod keys;
pub mod network;
pub mod params;
pub mod serialize;
pub mod vote;

pub use account::Account;
pub use amount::Amount;
pub use block::{
    Block, BlockDetails, BlockSideband, BlockType, ChangeBlock, OpenBlock, ReceiveBlock,
    SendBlock, StateBlock,
};
pub use epoch::{Epoch, Epochs};
pub use hash::{BlockHash, Link, QualifiedRoot, Root};
pub use info::{AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, UncheckedKey};
pub use keys::{PrivateKey, PublicKey, Signature};
pub use network::Network;
pub use params::NetworkParams;
pub use serialize::{DecodeError, Reader};
pub use vote::{Vote, VoteError, VotePayload, MAX_VOTE_HASHES};
