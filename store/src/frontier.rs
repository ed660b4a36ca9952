//! The `frontiers` table: head hash → account, for classic-variant chains.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Account, BlockHash};

#[derive(Clone, Copy)]
pub struct FrontierTable {
    db: Database<Bytes, Bytes>,
}

impl FrontierTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        hash: &BlockHash,
        account: &Account,
    ) -> Result<(), StoreError> {
        self.db
            .put(txn.rw(), hash.as_bytes(), account.as_bytes())?;
        Ok(())
    }

    pub fn get(
        &self,
        txn: &impl Transaction,
        hash: &BlockHash,
    ) -> Result<Option<Account>, StoreError> {
        match self.db.get(txn.ro(), hash.as_bytes())? {
            Some(bytes) => Ok(Some(Account::new(
                bytes
                    .try_into()
                    .map_err(|_| StoreError::corrupt("frontiers"))?,
            ))),
            None => Ok(None),
        }
    }

    pub fn del(&self, txn: &mut WriteTransaction, hash: &BlockHash) -> Result<(), StoreError> {
        self.db.delete(txn.rw(), hash.as_bytes())?;
        Ok(())
    }

    pub fn count(&self, txn: &impl Transaction) -> Result<u64, StoreError> {
        Ok(self.db.len(txn.ro())?)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_store;
    use lattice_types::{Account, BlockHash};

    #[test]
    fn put_get_del() {
        let (_dir, store) = open_store();
        let hash = BlockHash::new([1; 32]);
        let account = Account::new([2; 32]);

        let mut txn = store.tx_begin_write().unwrap();
        store.frontiers.put(&mut txn, &hash, &account).unwrap();
        assert_eq!(store.frontiers.get(&txn, &hash).unwrap(), Some(account));
        store.frontiers.del(&mut txn, &hash).unwrap();
        assert_eq!(store.frontiers.get(&txn, &hash).unwrap(), None);
        txn.commit().unwrap();
    }
}
