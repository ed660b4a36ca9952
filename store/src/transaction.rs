//! Transaction wrappers over the LMDB environment.

use crate::StoreError;
use heed::{RoTxn, RwTxn};

/// Anything the table readers can run against: a snapshot read transaction
/// or the in-flight state of a write transaction.
pub trait Transaction {
    fn ro(&self) -> &RoTxn<'_>;
}

/// A snapshot read transaction. Any number may overlap.
pub struct ReadTransaction<'env> {
    txn: RoTxn<'env>,
}

impl<'env> ReadTransaction<'env> {
    pub(crate) fn from_raw(txn: RoTxn<'env>) -> Self {
        Self { txn }
    }
}

impl Transaction for ReadTransaction<'_> {
    fn ro(&self) -> &RoTxn<'_> {
        &self.txn
    }
}

/// The exclusive write transaction. Obtain the [`crate::WriteQueue`] lease
/// first so writer classes are admitted in FIFO order.
pub struct WriteTransaction<'env> {
    txn: RwTxn<'env>,
}

impl<'env> WriteTransaction<'env> {
    pub(crate) fn from_raw(txn: RwTxn<'env>) -> Self {
        Self { txn }
    }

    pub(crate) fn rw(&mut self) -> &mut RwTxn<'env> {
        &mut self.txn
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard every change made in this transaction.
    pub fn abort(self) {
        self.txn.abort();
    }
}

impl Transaction for WriteTransaction<'_> {
    fn ro(&self) -> &RoTxn<'_> {
        &self.txn
    }
}
