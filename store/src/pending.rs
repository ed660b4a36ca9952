//! The `pending` table: (destination, send hash) → [`PendingInfo`].

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Account, PendingInfo, PendingKey, Reader};

#[derive(Clone, Copy)]
pub struct PendingTable {
    db: Database<Bytes, Bytes>,
}

impl PendingTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        key: &PendingKey,
        info: &PendingInfo,
    ) -> Result<(), StoreError> {
        self.db.put(txn.rw(), &key.to_bytes(), &info.serialize())?;
        Ok(())
    }

    pub fn get(
        &self,
        txn: &impl Transaction,
        key: &PendingKey,
    ) -> Result<Option<PendingInfo>, StoreError> {
        match self.db.get(txn.ro(), &key.to_bytes())? {
            Some(bytes) => Ok(Some(
                PendingInfo::deserialize(&mut Reader::new(bytes))
                    .map_err(|_| StoreError::corrupt("pending"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn exists(&self, txn: &impl Transaction, key: &PendingKey) -> Result<bool, StoreError> {
        Ok(self.db.get(txn.ro(), &key.to_bytes())?.is_some())
    }

    pub fn del(&self, txn: &mut WriteTransaction, key: &PendingKey) -> Result<(), StoreError> {
        self.db.delete(txn.rw(), &key.to_bytes())?;
        Ok(())
    }

    pub fn count(&self, txn: &impl Transaction) -> Result<u64, StoreError> {
        Ok(self.db.len(txn.ro())?)
    }

    /// All pending entries addressed to one account, in send-hash order.
    /// Keys are `(account, hash)`, so one account's entries are adjacent.
    pub fn account_pending(
        &self,
        txn: &impl Transaction,
        account: &Account,
    ) -> Result<Vec<(PendingKey, PendingInfo)>, StoreError> {
        let mut out = Vec::new();
        let start = PendingKey::new(*account, lattice_types::BlockHash::ZERO).to_bytes();
        let range = (
            std::ops::Bound::Included(start.as_slice()),
            std::ops::Bound::Unbounded,
        );
        for item in self.db.range(txn.ro(), &range)? {
            let (key_bytes, value) = item?;
            let key =
                PendingKey::from_bytes(key_bytes).map_err(|_| StoreError::corrupt("pending"))?;
            if &key.account != account {
                break;
            }
            let info = PendingInfo::deserialize(&mut Reader::new(value))
                .map_err(|_| StoreError::corrupt("pending"))?;
            out.push((key, info));
        }
        Ok(out)
    }
}
