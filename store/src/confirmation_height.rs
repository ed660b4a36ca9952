//! The `confirmation_height` table: account → cemented height and frontier.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Account, ConfirmationHeightInfo, Reader};

#[derive(Clone, Copy)]
pub struct ConfirmationHeightTable {
    db: Database<Bytes, Bytes>,
}

impl ConfirmationHeightTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        account: &Account,
        info: &ConfirmationHeightInfo,
    ) -> Result<(), StoreError> {
        self.db
            .put(txn.rw(), account.as_bytes(), &info.serialize())?;
        Ok(())
    }

    /// The cemented height for an account; zero when never confirmed.
    pub fn get(
        &self,
        txn: &impl Transaction,
        account: &Account,
    ) -> Result<ConfirmationHeightInfo, StoreError> {
        match self.db.get(txn.ro(), account.as_bytes())? {
            Some(bytes) => ConfirmationHeightInfo::deserialize(&mut Reader::new(bytes))
                .map_err(|_| StoreError::corrupt("confirmation_height")),
            None => Ok(ConfirmationHeightInfo::default()),
        }
    }

    pub fn del(&self, txn: &mut WriteTransaction, account: &Account) -> Result<(), StoreError> {
        self.db.delete(txn.rw(), account.as_bytes())?;
        Ok(())
    }

    pub fn count(&self, txn: &impl Transaction) -> Result<u64, StoreError> {
        Ok(self.db.len(txn.ro())?)
    }
}
