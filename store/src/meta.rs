//! The `meta` table: schema version and other singletons.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;

const VERSION_KEY: &[u8] = b"version";

#[derive(Clone, Copy)]
pub struct MetaTable {
    db: Database<Bytes, Bytes>,
}

impl MetaTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    /// The stored schema version; `None` on a fresh database.
    pub fn version(&self, txn: &impl Transaction) -> Result<Option<u64>, StoreError> {
        match self.db.get(txn.ro(), VERSION_KEY)? {
            Some(bytes) => Ok(Some(u64::from_le_bytes(
                bytes.try_into().map_err(|_| StoreError::corrupt("meta"))?,
            ))),
            None => Ok(None),
        }
    }

    pub fn set_version(&self, txn: &mut WriteTransaction, version: u64) -> Result<(), StoreError> {
        self.db
            .put(txn.rw(), VERSION_KEY, &version.to_le_bytes())?;
        Ok(())
    }
}
