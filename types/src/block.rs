//! The five block variants of the block lattice and their sidebands.
//!
//! Each variant hashes its hashable fields with Blake2b-256 in serialization
//! order; `signature` and `work` are carried alongside but never hashed. The
//! `state` variant is the universal form whose subtype is inferred from the
//! balance delta and link value.

use crate::account::Account;
use crate::amount::Amount;
use crate::epoch::Epoch;
use crate::hash::{BlockHash, Link, QualifiedRoot, Root};
use crate::keys::Signature;
use crate::serialize::{DecodeError, Reader};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Domain-separating preamble hashed ahead of state-block fields, preventing
/// collisions with classic variants.
const STATE_HASH_PREAMBLE: [u8; 32] = {
    let mut preamble = [0u8; 32];
    preamble[31] = BlockType::State as u8;
    preamble
};

/// Wire tag for each block variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockType {
    Invalid = 0,
    NotABlock = 1,
    Send = 2,
    Receive = 3,
    Open = 4,
    Change = 5,
    State = 6,
}

impl BlockType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BlockType::Invalid),
            1 => Some(BlockType::NotABlock),
            2 => Some(BlockType::Send),
            3 => Some(BlockType::Receive),
            4 => Some(BlockType::Open),
            5 => Some(BlockType::Change),
            6 => Some(BlockType::State),
            _ => None,
        }
    }

    /// Serialized body size for this variant, excluding the type tag.
    pub fn serialized_size(self) -> usize {
        match self {
            BlockType::Invalid | BlockType::NotABlock => 0,
            BlockType::Send => 32 + 32 + 16 + 64 + 8,
            BlockType::Receive => 32 + 32 + 64 + 8,
            BlockType::Open => 32 + 32 + 32 + 64 + 8,
            BlockType::Change => 32 + 32 + 64 + 8,
            BlockType::State => 32 + 32 + 32 + 16 + 32 + 64 + 8,
        }
    }
}

/// A send: debits the account, creating a pending entry for the destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    pub balance: Amount,
    pub signature: Signature,
    pub work: u64,
}

/// A receive: credits the account from a pending send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    pub source: BlockHash,
    pub signature: Signature,
    pub work: u64,
}

/// The first block of an account chain, receiving from a send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenBlock {
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: u64,
}

/// A representative change; the balance is untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
    pub signature: Signature,
    pub work: u64,
}

/// The universal variant: `link` encodes a destination (send), a source
/// (receive), or an epoch marker, inferred from the balance delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Link,
    pub signature: Signature,
    pub work: u64,
}

/// A block of any variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Send(_) => BlockType::Send,
            Block::Receive(_) => BlockType::Receive,
            Block::Open(_) => BlockType::Open,
            Block::Change(_) => BlockType::Change,
            Block::State(_) => BlockType::State,
        }
    }

    /// Blake2b-256 over the hashable fields.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        match self {
            Block::Send(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.destination.as_bytes());
                hasher.update(b.balance.to_be_bytes());
            }
            Block::Receive(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.source.as_bytes());
            }
            Block::Open(b) => {
                hasher.update(b.source.as_bytes());
                hasher.update(b.representative.as_bytes());
                hasher.update(b.account.as_bytes());
            }
            Block::Change(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.representative.as_bytes());
            }
            Block::State(b) => {
                hasher.update(STATE_HASH_PREAMBLE);
                hasher.update(b.account.as_bytes());
                hasher.update(b.previous.as_bytes());
                hasher.update(b.representative.as_bytes());
                hasher.update(b.balance.to_be_bytes());
                hasher.update(b.link.as_bytes());
            }
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlockHash::new(out)
    }

    /// The previous block in the account chain; zero for openers.
    pub fn previous(&self) -> BlockHash {
        match self {
            Block::Send(b) => b.previous,
            Block::Receive(b) => b.previous,
            Block::Open(_) => BlockHash::ZERO,
            Block::Change(b) => b.previous,
            Block::State(b) => b.previous,
        }
    }

    /// The work root: `previous` for non-openers, the account for openers.
    pub fn root(&self) -> Root {
        match self {
            Block::Open(b) => b.account.into(),
            Block::State(b) if b.previous.is_zero() => b.account.into(),
            _ => self.previous().into(),
        }
    }

    /// The election key for this block's chain position.
    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous())
    }

    /// The referenced send for receive/open variants. State blocks resolve
    /// their source through the ledger's link interpretation instead.
    pub fn source(&self) -> Option<BlockHash> {
        match self {
            Block::Receive(b) => Some(b.source),
            Block::Open(b) => Some(b.source),
            _ => None,
        }
    }

    pub fn destination(&self) -> Option<Account> {
        match self {
            Block::Send(b) => Some(b.destination),
            _ => None,
        }
    }

    pub fn link(&self) -> Option<Link> {
        match self {
            Block::State(b) => Some(b.link),
            _ => None,
        }
    }

    pub fn representative(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.representative),
            Block::Change(b) => Some(b.representative),
            Block::State(b) => Some(b.representative),
            _ => None,
        }
    }

    /// The resulting balance, for variants that state it.
    pub fn balance(&self) -> Option<Amount> {
        match self {
            Block::Send(b) => Some(b.balance),
            Block::State(b) => Some(b.balance),
            _ => None,
        }
    }

    /// The account field, for variants that carry one.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.account),
            Block::State(b) => Some(b.account),
            _ => None,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Block::Send(b) => &b.signature,
            Block::Receive(b) => &b.signature,
            Block::Open(b) => &b.signature,
            Block::Change(b) => &b.signature,
            Block::State(b) => &b.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Block::Send(b) => b.signature = signature,
            Block::Receive(b) => b.signature = signature,
            Block::Open(b) => b.signature = signature,
            Block::Change(b) => b.signature = signature,
            Block::State(b) => b.signature = signature,
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Block::Send(b) => b.work,
            Block::Receive(b) => b.work,
            Block::Open(b) => b.work,
            Block::Change(b) => b.work,
            Block::State(b) => b.work,
        }
    }

    pub fn set_work(&mut self, work: u64) {
        match self {
            Block::Send(b) => b.work = work,
            Block::Receive(b) => b.work = work,
            Block::Open(b) => b.work = work,
            Block::Change(b) => b.work = work,
            Block::State(b) => b.work = work,
        }
    }

    /// Whether this variant may legally follow a predecessor of the given
    /// type. State blocks follow anything; classic variants only follow
    /// classic variants.
    pub fn valid_predecessor(&self, predecessor: BlockType) -> bool {
        match self {
            Block::Open(_) => false,
            Block::State(_) => matches!(
                predecessor,
                BlockType::Send
                    | BlockType::Receive
                    | BlockType::Open
                    | BlockType::Change
                    | BlockType::State
            ),
            _ => matches!(
                predecessor,
                BlockType::Send | BlockType::Receive | BlockType::Open | BlockType::Change
            ),
        }
    }

    /// Serialize the body (no type tag): hashable fields, signature, then
    /// the little-endian work nonce.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.block_type().serialized_size());
        match self {
            Block::Send(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.destination.as_bytes());
                out.extend_from_slice(&b.balance.to_be_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.to_le_bytes());
            }
            Block::Receive(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.source.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.to_le_bytes());
            }
            Block::Open(b) => {
                out.extend_from_slice(b.source.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(b.account.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.to_le_bytes());
            }
            Block::Change(b) => {
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.to_le_bytes());
            }
            Block::State(b) => {
                out.extend_from_slice(b.account.as_bytes());
                out.extend_from_slice(b.previous.as_bytes());
                out.extend_from_slice(b.representative.as_bytes());
                out.extend_from_slice(&b.balance.to_be_bytes());
                out.extend_from_slice(b.link.as_bytes());
                out.extend_from_slice(b.signature.as_bytes());
                out.extend_from_slice(&b.work.to_le_bytes());
            }
        }
        out
    }

    /// Deserialize a body of the given variant.
    pub fn deserialize(block_type: BlockType, reader: &mut Reader<'_>) -> Result<Block, DecodeError> {
        match block_type {
            BlockType::Send => Ok(Block::Send(SendBlock {
                previous: BlockHash::new(reader.bytes_32()?),
                destination: Account::new(reader.bytes_32()?),
                balance: Amount::from_be_bytes(
                    reader.take(16)?.try_into().map_err(|_| DecodeError)?,
                ),
                signature: Signature(reader.bytes_64()?),
                work: reader.u64_le()?,
            })),
            BlockType::Receive => Ok(Block::Receive(ReceiveBlock {
                previous: BlockHash::new(reader.bytes_32()?),
                source: BlockHash::new(reader.bytes_32()?),
                signature: Signature(reader.bytes_64()?),
                work: reader.u64_le()?,
            })),
            BlockType::Open => Ok(Block::Open(OpenBlock {
                source: BlockHash::new(reader.bytes_32()?),
                representative: Account::new(reader.bytes_32()?),
                account: Account::new(reader.bytes_32()?),
                signature: Signature(reader.bytes_64()?),
                work: reader.u64_le()?,
            })),
            BlockType::Change => Ok(Block::Change(ChangeBlock {
                previous: BlockHash::new(reader.bytes_32()?),
                representative: Account::new(reader.bytes_32()?),
                signature: Signature(reader.bytes_64()?),
                work: reader.u64_le()?,
            })),
            BlockType::State => Ok(Block::State(StateBlock {
                account: Account::new(reader.bytes_32()?),
                previous: BlockHash::new(reader.bytes_32()?),
                representative: Account::new(reader.bytes_32()?),
                balance: Amount::from_be_bytes(
                    reader.take(16)?.try_into().map_err(|_| DecodeError)?,
                ),
                link: Link::new(reader.bytes_32()?),
                signature: Signature(reader.bytes_64()?),
                work: reader.u64_le()?,
            })),
            BlockType::Invalid | BlockType::NotABlock => Err(DecodeError),
        }
    }
}

/// Subtype flags recorded in the sideband.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockDetails {
    pub epoch: Epoch,
    pub is_send: bool,
    pub is_receive: bool,
    pub is_epoch: bool,
}

impl BlockDetails {
    pub fn new(epoch: Epoch, is_send: bool, is_receive: bool, is_epoch: bool) -> Self {
        Self {
            epoch,
            is_send,
            is_receive,
            is_epoch,
        }
    }

    /// Pack into one byte: epoch in the low nibble, subtype flags above it.
    pub fn pack(&self) -> u8 {
        let mut out = self.epoch.as_u8() & 0x0F;
        if self.is_send {
            out |= 1 << 4;
        }
        if self.is_receive {
            out |= 1 << 5;
        }
        if self.is_epoch {
            out |= 1 << 6;
        }
        out
    }

    pub fn unpack(byte: u8) -> Option<Self> {
        Some(Self {
            epoch: Epoch::from_u8(byte & 0x0F)?,
            is_send: byte & (1 << 4) != 0,
            is_receive: byte & (1 << 5) != 0,
            is_epoch: byte & (1 << 6) != 0,
        })
    }
}

/// Metadata stored alongside every committed block, making chain traversal
/// and balance lookups O(1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSideband {
    /// The next block in the account chain; zero at the head.
    pub successor: BlockHash,
    pub account: Account,
    pub balance: Amount,
    /// Height in the account chain; openers are height 1.
    pub height: u64,
    /// Unix seconds at local commit time.
    pub timestamp: u64,
    pub details: BlockDetails,
}

impl BlockSideband {
    pub const SERIALIZED_SIZE: usize = 32 + 32 + 16 + 8 + 8 + 1;

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SERIALIZED_SIZE);
        out.extend_from_slice(self.successor.as_bytes());
        out.extend_from_slice(self.account.as_bytes());
        out.extend_from_slice(&self.balance.to_be_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push(self.details.pack());
        out
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            successor: BlockHash::new(reader.bytes_32()?),
            account: Account::new(reader.bytes_32()?),
            balance: Amount::from_be_bytes(reader.take(16)?.try_into().map_err(|_| DecodeError)?),
            height: reader.u64_le()?,
            timestamp: reader.u64_le()?,
            details: BlockDetails::unpack(reader.u8()?).ok_or(DecodeError)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_send() -> Block {
        Block::Send(SendBlock {
            previous: BlockHash::new([1; 32]),
            destination: Account::new([2; 32]),
            balance: Amount::raw(1000),
            signature: Signature([3; 64]),
            work: 0x0123_4567_89AB_CDEF,
        })
    }

    fn sample_state(previous: BlockHash) -> Block {
        Block::State(StateBlock {
            account: Account::new([4; 32]),
            previous,
            representative: Account::new([5; 32]),
            balance: Amount::raw(42),
            link: Link::new([6; 32]),
            signature: Signature([7; 64]),
            work: 99,
        })
    }

    #[test]
    fn serialize_round_trip_all_variants() {
        let blocks = vec![
            sample_send(),
            Block::Receive(ReceiveBlock {
                previous: BlockHash::new([1; 32]),
                source: BlockHash::new([2; 32]),
                signature: Signature([3; 64]),
                work: 7,
            }),
            Block::Open(OpenBlock {
                source: BlockHash::new([1; 32]),
                representative: Account::new([2; 32]),
                account: Account::new([3; 32]),
                signature: Signature([4; 64]),
                work: 8,
            }),
            Block::Change(ChangeBlock {
                previous: BlockHash::new([1; 32]),
                representative: Account::new([2; 32]),
                signature: Signature([3; 64]),
                work: 9,
            }),
            sample_state(BlockHash::new([9; 32])),
        ];
        for block in blocks {
            let bytes = block.serialize();
            assert_eq!(bytes.len(), block.block_type().serialized_size());
            let mut reader = Reader::new(&bytes);
            let decoded = Block::deserialize(block.block_type(), &mut reader).unwrap();
            assert_eq!(decoded, block);
            assert!(reader.is_exhausted());
        }
    }

    #[test]
    fn hash_ignores_signature_and_work() {
        let mut a = sample_send();
        let mut b = sample_send();
        a.set_signature(Signature([0xAA; 64]));
        b.set_signature(Signature([0xBB; 64]));
        a.set_work(1);
        b.set_work(2);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn state_hash_distinct_from_classic() {
        // A state block and a change block sharing field bytes must not
        // collide thanks to the preamble.
        let state = sample_state(BlockHash::ZERO);
        let change = Block::Change(ChangeBlock {
            previous: BlockHash::new([4; 32]),
            representative: Account::new([5; 32]),
            signature: Signature([7; 64]),
            work: 99,
        });
        assert_ne!(state.hash(), change.hash());
    }

    #[test]
    fn root_selection() {
        let send = sample_send();
        assert_eq!(send.root(), Root::from(send.previous()));

        let open = Block::Open(OpenBlock {
            source: BlockHash::new([1; 32]),
            representative: Account::new([2; 32]),
            account: Account::new([3; 32]),
            signature: Signature([4; 64]),
            work: 0,
        });
        assert_eq!(open.root(), Root::from(Account::new([3; 32])));

        let state_open = sample_state(BlockHash::ZERO);
        assert_eq!(state_open.root(), Root::from(Account::new([4; 32])));

        let state_chained = sample_state(BlockHash::new([9; 32]));
        assert_eq!(state_chained.root(), Root::from(BlockHash::new([9; 32])));
    }

    #[test]
    fn valid_predecessor_rules() {
        let send = sample_send();
        assert!(send.valid_predecessor(BlockType::Open));
        assert!(send.valid_predecessor(BlockType::Send));
        assert!(!send.valid_predecessor(BlockType::State));

        let state = sample_state(BlockHash::new([9; 32]));
        assert!(state.valid_predecessor(BlockType::Send));
        assert!(state.valid_predecessor(BlockType::State));

        let open = Block::Open(OpenBlock {
            source: BlockHash::new([1; 32]),
            representative: Account::new([2; 32]),
            account: Account::new([3; 32]),
            signature: Signature([4; 64]),
            work: 0,
        });
        assert!(!open.valid_predecessor(BlockType::Open));
    }

    #[test]
    fn sideband_round_trip() {
        let sideband = BlockSideband {
            successor: BlockHash::new([1; 32]),
            account: Account::new([2; 32]),
            balance: Amount::raw(12345),
            height: 42,
            timestamp: 1_600_000_000,
            details: BlockDetails::new(Epoch::Epoch1, true, false, false),
        };
        let bytes = sideband.serialize();
        assert_eq!(bytes.len(), BlockSideband::SERIALIZED_SIZE);
        let decoded = BlockSideband::deserialize(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded, sideband);
    }

    #[test]
    fn details_pack_unpack() {
        let details = BlockDetails::new(Epoch::Epoch1, false, true, true);
        assert_eq!(BlockDetails::unpack(details.pack()), Some(details));
    }
}
