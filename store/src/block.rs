//! The `blocks` table: hash → (type, body, sideband).

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Block, BlockHash, BlockSideband, BlockType, Reader};
use rand::Rng;

#[derive(Clone, Copy)]
pub struct BlockTable {
    db: Database<Bytes, Bytes>,
}

impl BlockTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        hash: &BlockHash,
        block: &Block,
        sideband: &BlockSideband,
    ) -> Result<(), StoreError> {
        let mut value = Vec::with_capacity(
            1 + block.block_type().serialized_size() + BlockSideband::SERIALIZED_SIZE,
        );
        value.push(block.block_type().as_u8());
        value.extend_from_slice(&block.serialize());
        value.extend_from_slice(&sideband.serialize());
        self.db.put(txn.rw(), hash.as_bytes(), &value)?;
        Ok(())
    }

    pub fn get(
        &self,
        txn: &impl Transaction,
        hash: &BlockHash,
    ) -> Result<Option<(Block, BlockSideband)>, StoreError> {
        match self.db.get(txn.ro(), hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode_entry(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block(
        &self,
        txn: &impl Transaction,
        hash: &BlockHash,
    ) -> Result<Option<Block>, StoreError> {
        Ok(self.get(txn, hash)?.map(|(block, _)| block))
    }

    pub fn exists(&self, txn: &impl Transaction, hash: &BlockHash) -> Result<bool, StoreError> {
        Ok(self.db.get(txn.ro(), hash.as_bytes())?.is_some())
    }

    pub fn del(&self, txn: &mut WriteTransaction, hash: &BlockHash) -> Result<(), StoreError> {
        self.db.delete(txn.rw(), hash.as_bytes())?;
        Ok(())
    }

    pub fn count(&self, txn: &impl Transaction) -> Result<u64, StoreError> {
        Ok(self.db.len(txn.ro())?)
    }

    /// The next block in the chain after `hash`, from its sideband.
    pub fn successor(
        &self,
        txn: &impl Transaction,
        hash: &BlockHash,
    ) -> Result<Option<BlockHash>, StoreError> {
        Ok(self.get(txn, hash)?.and_then(|(_, sideband)| {
            if sideband.successor.is_zero() {
                None
            } else {
                Some(sideband.successor)
            }
        }))
    }

    /// Rewrite the stored sideband's successor pointer.
    pub fn set_successor(
        &self,
        txn: &mut WriteTransaction,
        hash: &BlockHash,
        successor: BlockHash,
    ) -> Result<(), StoreError> {
        let (block, mut sideband) = self
            .get(txn, hash)?
            .ok_or(StoreError::corrupt("blocks"))?;
        sideband.successor = successor;
        self.put(txn, hash, &block, &sideband)
    }

    /// A uniformly random block, used by the rep crawler to pick a probe
    /// subject. Draws a random key and takes the next entry at or after it,
    /// wrapping to the first entry.
    pub fn random(&self, txn: &impl Transaction) -> Result<Option<(BlockHash, Block)>, StoreError> {
        let probe: [u8; 32] = rand::thread_rng().gen();
        let entry = match self.db.get_greater_than_or_equal_to(txn.ro(), &probe)? {
            Some(entry) => Some(entry),
            None => self.db.first(txn.ro())?,
        };
        match entry {
            Some((key, value)) => {
                let hash = BlockHash::new(key.try_into().map_err(|_| StoreError::corrupt("blocks"))?);
                let (block, _) = decode_entry(value)?;
                Ok(Some((hash, block)))
            }
            None => Ok(None),
        }
    }
}

fn decode_entry(bytes: &[u8]) -> Result<(Block, BlockSideband), StoreError> {
    let mut reader = Reader::new(bytes);
    let block_type = BlockType::from_u8(reader.u8().map_err(|_| StoreError::corrupt("blocks"))?)
        .ok_or(StoreError::corrupt("blocks"))?;
    let block =
        Block::deserialize(block_type, &mut reader).map_err(|_| StoreError::corrupt("blocks"))?;
    let sideband =
        BlockSideband::deserialize(&mut reader).map_err(|_| StoreError::corrupt("blocks"))?;
    Ok((block, sideband))
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_store;
    use lattice_types::{
        Account, Amount, Block, BlockDetails, BlockHash, BlockSideband, SendBlock, Signature,
    };

    fn sample() -> (BlockHash, Block, BlockSideband) {
        let block = Block::Send(SendBlock {
            previous: BlockHash::new([1; 32]),
            destination: Account::new([2; 32]),
            balance: Amount::raw(10),
            signature: Signature([3; 64]),
            work: 4,
        });
        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account: Account::new([5; 32]),
            balance: Amount::raw(10),
            height: 2,
            timestamp: 1000,
            details: BlockDetails::default(),
        };
        (block.hash(), block, sideband)
    }

    #[test]
    fn put_get_round_trip() {
        let (_dir, store) = open_store();
        let (hash, block, sideband) = sample();

        let mut txn = store.tx_begin_write().unwrap();
        store.blocks.put(&mut txn, &hash, &block, &sideband).unwrap();
        txn.commit().unwrap();

        let txn = store.tx_begin_read().unwrap();
        let (got_block, got_sideband) = store.blocks.get(&txn, &hash).unwrap().unwrap();
        assert_eq!(got_block, block);
        assert_eq!(got_sideband, sideband);
        assert!(store.blocks.exists(&txn, &hash).unwrap());
        assert_eq!(store.blocks.count(&txn).unwrap(), 1);
    }

    #[test]
    fn successor_update() {
        let (_dir, store) = open_store();
        let (hash, block, sideband) = sample();
        let successor = BlockHash::new([9; 32]);

        let mut txn = store.tx_begin_write().unwrap();
        store.blocks.put(&mut txn, &hash, &block, &sideband).unwrap();
        assert_eq!(store.blocks.successor(&txn, &hash).unwrap(), None);
        store.blocks.set_successor(&mut txn, &hash, successor).unwrap();
        assert_eq!(store.blocks.successor(&txn, &hash).unwrap(), Some(successor));
        txn.commit().unwrap();
    }

    #[test]
    fn random_finds_an_entry() {
        let (_dir, store) = open_store();
        let (hash, block, sideband) = sample();

        let mut txn = store.tx_begin_write().unwrap();
        store.blocks.put(&mut txn, &hash, &block, &sideband).unwrap();
        txn.commit().unwrap();

        let txn = store.tx_begin_read().unwrap();
        let (random_hash, _) = store.blocks.random(&txn).unwrap().unwrap();
        assert_eq!(random_hash, hash);
    }

    #[test]
    fn missing_block_is_none() {
        let (_dir, store) = open_store();
        let txn = store.tx_begin_read().unwrap();
        assert!(store.blocks.get(&txn, &BlockHash::new([7; 32])).unwrap().is_none());
    }
}
