//! Representative votes.

use crate::account::Account;
use crate::block::{Block, BlockType};
use crate::hash::BlockHash;
use crate::keys::Signature;
use crate::serialize::{DecodeError, Reader};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use thiserror::Error;

type Blake2b256 = Blake2b<U32>;

/// Hash-list votes hash this prefix ahead of their hashes so a vote over
/// hashes can never be replayed as a vote over a block body.
pub const VOTE_HASH_PREFIX: &[u8] = b"vote ";

/// A vote may carry at most this many hashes.
pub const MAX_VOTE_HASHES: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("a vote carries at most {MAX_VOTE_HASHES} hashes, got {0}")]
    TooManyHashes(usize),
    #[error("a vote must reference at least one block")]
    Empty,
}

/// The subject of a vote: a full block, or a list of block hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VotePayload {
    Block(Block),
    Hashes(Vec<BlockHash>),
}

/// A representative's statement that the referenced blocks should win their
/// elections. A higher sequence from the same voter supersedes a lower one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub account: Account,
    pub signature: Signature,
    pub sequence: u64,
    pub payload: VotePayload,
}

impl Vote {
    /// Build a hash-list vote; refuses more than [`MAX_VOTE_HASHES`] hashes.
    pub fn new_hashes(
        account: Account,
        sequence: u64,
        hashes: Vec<BlockHash>,
    ) -> Result<Self, VoteError> {
        if hashes.is_empty() {
            return Err(VoteError::Empty);
        }
        if hashes.len() > MAX_VOTE_HASHES {
            return Err(VoteError::TooManyHashes(hashes.len()));
        }
        Ok(Self {
            account,
            signature: Signature::ZERO,
            sequence,
            payload: VotePayload::Hashes(hashes),
        })
    }

    pub fn new_block(account: Account, sequence: u64, block: Block) -> Self {
        Self {
            account,
            signature: Signature::ZERO,
            sequence,
            payload: VotePayload::Block(block),
        }
    }

    /// The block hashes this vote endorses.
    pub fn hashes(&self) -> Vec<BlockHash> {
        match &self.payload {
            VotePayload::Block(block) => vec![block.hash()],
            VotePayload::Hashes(hashes) => hashes.clone(),
        }
    }

    /// The digest a voter signs: the referenced hashes (prefixed for
    /// hash-list votes) followed by the little-endian sequence.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        match &self.payload {
            VotePayload::Block(block) => {
                hasher.update(block.hash().as_bytes());
            }
            VotePayload::Hashes(hashes) => {
                hasher.update(VOTE_HASH_PREFIX);
                for hash in hashes {
                    hasher.update(hash.as_bytes());
                }
            }
        }
        hasher.update(self.sequence.to_le_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlockHash::new(out)
    }

    /// Identity hash covering voter and signature, distinguishing otherwise
    /// identical votes from different representatives.
    pub fn full_hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        hasher.update(self.hash().as_bytes());
        hasher.update(self.account.as_bytes());
        hasher.update(self.signature.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlockHash::new(out)
    }

    /// Serialize: account, signature, little-endian sequence, then the
    /// payload. Hash-list payload encoding is owned by the message layer
    /// (the count lives in the header extensions), so this emits the raw
    /// hashes back to back.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.account.as_bytes());
        out.extend_from_slice(self.signature.as_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        match &self.payload {
            VotePayload::Block(block) => out.extend_from_slice(&block.serialize()),
            VotePayload::Hashes(hashes) => {
                for hash in hashes {
                    out.extend_from_slice(hash.as_bytes());
                }
            }
        }
        out
    }

    /// Deserialize a vote whose payload shape was determined by the caller
    /// from the message header: a block of `block_type`, or `count` hashes
    /// when `block_type` is `NotABlock`.
    pub fn deserialize(
        reader: &mut Reader<'_>,
        block_type: BlockType,
        count: usize,
    ) -> Result<Self, DecodeError> {
        let account = Account::new(reader.bytes_32()?);
        let signature = Signature(reader.bytes_64()?);
        let sequence = reader.u64_le()?;
        let payload = if block_type == BlockType::NotABlock {
            if count == 0 || count > MAX_VOTE_HASHES {
                return Err(DecodeError);
            }
            let mut hashes = Vec::with_capacity(count);
            for _ in 0..count {
                hashes.push(BlockHash::new(reader.bytes_32()?));
            }
            VotePayload::Hashes(hashes)
        } else {
            VotePayload::Block(Block::deserialize(block_type, reader)?)
        };
        Ok(Self {
            account,
            signature,
            sequence,
            payload,
        })
    }
}
