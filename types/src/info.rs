//! Per-account metadata rows and pending/unchecked keys.

use crate::account::Account;
use crate::amount::Amount;
use crate::epoch::Epoch;
use crate::hash::BlockHash;
use crate::serialize::{DecodeError, Reader};

/// The head-of-chain row for an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    /// Hash of the account's tip block.
    pub head: BlockHash,
    pub representative: Account,
    /// Hash of the account's first block.
    pub open_block: BlockHash,
    pub balance: Amount,
    /// Unix seconds of the last modification.
    pub modified: u64,
    /// Number of blocks in the chain; equals head height.
    pub block_count: u64,
    pub epoch: Epoch,
}

impl AccountInfo {
    pub const SERIALIZED_SIZE: usize = 32 + 32 + 32 + 16 + 8 + 8 + 1;

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SERIALIZED_SIZE);
        out.extend_from_slice(self.head.as_bytes());
        out.extend_from_slice(self.representative.as_bytes());
        out.extend_from_slice(self.open_block.as_bytes());
        out.extend_from_slice(&self.balance.to_be_bytes());
        out.extend_from_slice(&self.modified.to_le_bytes());
        out.extend_from_slice(&self.block_count.to_le_bytes());
        out.push(self.epoch.as_u8());
        out
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            head: BlockHash::new(reader.bytes_32()?),
            representative: Account::new(reader.bytes_32()?),
            open_block: BlockHash::new(reader.bytes_32()?),
            balance: Amount::from_be_bytes(reader.take(16)?.try_into().map_err(|_| DecodeError)?),
            modified: reader.u64_le()?,
            block_count: reader.u64_le()?,
            epoch: Epoch::from_u8(reader.u8()?).ok_or(DecodeError)?,
        })
    }
}

/// Addresses the unspent receipt side of a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingKey {
    pub account: Account,
    pub send_hash: BlockHash,
}

impl PendingKey {
    pub fn new(account: Account, send_hash: BlockHash) -> Self {
        Self { account, send_hash }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.account.as_bytes());
        out[32..].copy_from_slice(self.send_hash.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        Ok(Self {
            account: Account::new(reader.bytes_32()?),
            send_hash: BlockHash::new(reader.bytes_32()?),
        })
    }
}

/// The receivable value created by a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
    pub epoch: Epoch,
}

impl PendingInfo {
    pub const SERIALIZED_SIZE: usize = 32 + 16 + 1;

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SERIALIZED_SIZE);
        out.extend_from_slice(self.source.as_bytes());
        out.extend_from_slice(&self.amount.to_be_bytes());
        out.push(self.epoch.as_u8());
        out
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            source: Account::new(reader.bytes_32()?),
            amount: Amount::from_be_bytes(reader.take(16)?.try_into().map_err(|_| DecodeError)?),
            epoch: Epoch::from_u8(reader.u8()?).ok_or(DecodeError)?,
        })
    }
}

/// Addresses a block waiting on a missing dependency: the dependency hash
/// first so all waiters on one dependency are adjacent in the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UncheckedKey {
    pub dependency: BlockHash,
    pub hash: BlockHash,
}

impl UncheckedKey {
    pub fn new(dependency: BlockHash, hash: BlockHash) -> Self {
        Self { dependency, hash }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.dependency.as_bytes());
        out[32..].copy_from_slice(self.hash.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        Ok(Self {
            dependency: BlockHash::new(reader.bytes_32()?),
            hash: BlockHash::new(reader.bytes_32()?),
        })
    }
}

/// Per-account cemented height row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    /// The block at `height`, recorded for observers.
    pub frontier: BlockHash,
}

impl ConfirmationHeightInfo {
    pub const SERIALIZED_SIZE: usize = 8 + 32;

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SERIALIZED_SIZE);
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(self.frontier.as_bytes());
        out
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            height: reader.u64_le()?,
            frontier: BlockHash::new(reader.bytes_32()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_info_round_trip() {
        let info = AccountInfo {
            head: BlockHash::new([1; 32]),
            representative: Account::new([2; 32]),
            open_block: BlockHash::new([3; 32]),
            balance: Amount::raw(7),
            modified: 1_600_000_000,
            block_count: 4,
            epoch: Epoch::Epoch1,
        };
        let bytes = info.serialize();
        assert_eq!(bytes.len(), AccountInfo::SERIALIZED_SIZE);
        assert_eq!(AccountInfo::deserialize(&mut Reader::new(&bytes)).unwrap(), info);
    }

    #[test]
    fn pending_round_trip() {
        let key = PendingKey::new(Account::new([1; 32]), BlockHash::new([2; 32]));
        assert_eq!(PendingKey::from_bytes(&key.to_bytes()).unwrap(), key);

        let info = PendingInfo {
            source: Account::new([3; 32]),
            amount: Amount::raw(55),
            epoch: Epoch::Epoch0,
        };
        let bytes = info.serialize();
        assert_eq!(PendingInfo::deserialize(&mut Reader::new(&bytes)).unwrap(), info);
    }

    #[test]
    fn confirmation_height_round_trip() {
        let info = ConfirmationHeightInfo {
            height: 9,
            frontier: BlockHash::new([4; 32]),
        };
        let bytes = info.serialize();
        assert_eq!(
            ConfirmationHeightInfo::deserialize(&mut Reader::new(&bytes)).unwrap(),
            info
        );
    }
}
