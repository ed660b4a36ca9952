//! The `unchecked` table: blocks parked until a missing dependency arrives.
//!
//! Keys are `(dependency, block hash)` so every block waiting on one
//! dependency is adjacent and can be drained with a single range scan.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Block, BlockHash, BlockType, Reader, UncheckedKey};

/// A parked block and when it arrived, for age-based garbage collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UncheckedInfo {
    pub block: Block,
    /// Unix seconds at park time.
    pub modified: u64,
}

impl UncheckedInfo {
    pub fn new(block: Block, modified: u64) -> Self {
        Self { block, modified }
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.block.block_type().as_u8());
        out.extend_from_slice(&self.block.serialize());
        out.extend_from_slice(&self.modified.to_le_bytes());
        out
    }

    fn deserialize(bytes: &[u8]) -> Result<Self, StoreError> {
        let mut reader = Reader::new(bytes);
        let block_type = BlockType::from_u8(
            reader.u8().map_err(|_| StoreError::corrupt("unchecked"))?,
        )
        .ok_or(StoreError::corrupt("unchecked"))?;
        let block = Block::deserialize(block_type, &mut reader)
            .map_err(|_| StoreError::corrupt("unchecked"))?;
        let modified = reader
            .u64_le()
            .map_err(|_| StoreError::corrupt("unchecked"))?;
        Ok(Self { block, modified })
    }
}

#[derive(Clone, Copy)]
pub struct UncheckedTable {
    db: Database<Bytes, Bytes>,
}

impl UncheckedTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        key: &UncheckedKey,
        info: &UncheckedInfo,
    ) -> Result<(), StoreError> {
        self.db.put(txn.rw(), &key.to_bytes(), &info.serialize())?;
        Ok(())
    }

    pub fn del(&self, txn: &mut WriteTransaction, key: &UncheckedKey) -> Result<(), StoreError> {
        self.db.delete(txn.rw(), &key.to_bytes())?;
        Ok(())
    }

    pub fn exists(&self, txn: &impl Transaction, key: &UncheckedKey) -> Result<bool, StoreError> {
        Ok(self.db.get(txn.ro(), &key.to_bytes())?.is_some())
    }

    pub fn count(&self, txn: &impl Transaction) -> Result<u64, StoreError> {
        Ok(self.db.len(txn.ro())?)
    }

    /// Every block parked on `dependency`.
    pub fn get_dependents(
        &self,
        txn: &impl Transaction,
        dependency: &BlockHash,
    ) -> Result<Vec<(UncheckedKey, UncheckedInfo)>, StoreError> {
        let mut out = Vec::new();
        let start = UncheckedKey::new(*dependency, BlockHash::ZERO).to_bytes();
        let range = (
            std::ops::Bound::Included(start.as_slice()),
            std::ops::Bound::Unbounded,
        );
        for item in self.db.range(txn.ro(), &range)? {
            let (key_bytes, value) = item?;
            let key = UncheckedKey::from_bytes(key_bytes)
                .map_err(|_| StoreError::corrupt("unchecked"))?;
            if &key.dependency != dependency {
                break;
            }
            out.push((key, UncheckedInfo::deserialize(value)?));
        }
        Ok(out)
    }

    /// Delete entries parked before `cutoff`. Returns how many were removed.
    pub fn clear_older_than(
        &self,
        txn: &mut WriteTransaction,
        cutoff: u64,
    ) -> Result<usize, StoreError> {
        let mut stale = Vec::new();
        for item in self.db.iter(txn.ro())? {
            let (key_bytes, value) = item?;
            let info = UncheckedInfo::deserialize(value)?;
            if info.modified < cutoff {
                stale.push(
                    UncheckedKey::from_bytes(key_bytes)
                        .map_err(|_| StoreError::corrupt("unchecked"))?,
                );
            }
        }
        for key in &stale {
            self.del(txn, key)?;
        }
        Ok(stale.len())
    }
}
