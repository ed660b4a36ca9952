//! The `vote` table: the highest-sequence vote seen per account.
//!
//! Persisting the sequence means a restarted node keeps refusing stale
//! votes it has already superseded.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Account, BlockType, Reader, Vote, VotePayload};

#[derive(Clone, Copy)]
pub struct VoteTable {
    db: Database<Bytes, Bytes>,
}

impl VoteTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(&self, txn: &mut WriteTransaction, vote: &Vote) -> Result<(), StoreError> {
        let (block_type, count) = match &vote.payload {
            VotePayload::Block(block) => (block.block_type(), 0u8),
            VotePayload::Hashes(hashes) => (BlockType::NotABlock, hashes.len() as u8),
        };
        let mut value = Vec::new();
        value.push(block_type.as_u8());
        value.push(count);
        value.extend_from_slice(&vote.serialize());
        self.db.put(txn.rw(), vote.account.as_bytes(), &value)?;
        Ok(())
    }

    pub fn get(
        &self,
        txn: &impl Transaction,
        account: &Account,
    ) -> Result<Option<Vote>, StoreError> {
        match self.db.get(txn.ro(), account.as_bytes())? {
            Some(bytes) => {
                let mut reader = Reader::new(bytes);
                let block_type = BlockType::from_u8(
                    reader.u8().map_err(|_| StoreError::corrupt("vote"))?,
                )
                .ok_or(StoreError::corrupt("vote"))?;
                let count = reader.u8().map_err(|_| StoreError::corrupt("vote"))? as usize;
                let vote = Vote::deserialize(&mut reader, block_type, count)
                    .map_err(|_| StoreError::corrupt("vote"))?;
                Ok(Some(vote))
            }
            None => Ok(None),
        }
    }

    /// The stored sequence for an account, zero when none.
    pub fn sequence(&self, txn: &impl Transaction, account: &Account) -> Result<u64, StoreError> {
        Ok(self.get(txn, account)?.map(|v| v.sequence).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_store;
    use lattice_types::{Account, BlockHash, Vote};

    #[test]
    fn highest_sequence_survives() {
        let (_dir, store) = open_store();
        let account = Account::new([1; 32]);
        let vote =
            Vote::new_hashes(account, 42, vec![BlockHash::new([2; 32])]).unwrap();

        let mut txn = store.tx_begin_write().unwrap();
        store.vote.put(&mut txn, &vote).unwrap();
        txn.commit().unwrap();

        let txn = store.tx_begin_read().unwrap();
        assert_eq!(store.vote.get(&txn, &account).unwrap(), Some(vote));
        assert_eq!(store.vote.sequence(&txn, &account).unwrap(), 42);
        assert_eq!(
            store.vote.sequence(&txn, &Account::new([9; 32])).unwrap(),
            0
        );
    }
}
