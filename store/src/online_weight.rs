//! The `online_weight` table: periodic samples of observed online stake,
//! keyed by sample timestamp. The trended median over these rows feeds the
//! quorum computation.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::Amount;

#[derive(Clone, Copy)]
pub struct OnlineWeightTable {
    db: Database<Bytes, Bytes>,
}

impl OnlineWeightTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        timestamp: u64,
        weight: Amount,
    ) -> Result<(), StoreError> {
        self.db
            .put(txn.rw(), &timestamp.to_be_bytes(), &weight.to_be_bytes())?;
        Ok(())
    }

    pub fn count(&self, txn: &impl Transaction) -> Result<u64, StoreError> {
        Ok(self.db.len(txn.ro())?)
    }

    /// All samples in timestamp order.
    pub fn iter(&self, txn: &impl Transaction) -> Result<Vec<(u64, Amount)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.iter(txn.ro())? {
            let (key, value) = item?;
            let timestamp = u64::from_be_bytes(
                key.try_into()
                    .map_err(|_| StoreError::corrupt("online_weight"))?,
            );
            let weight = Amount::from_be_bytes(
                value
                    .try_into()
                    .map_err(|_| StoreError::corrupt("online_weight"))?,
            );
            out.push((timestamp, weight));
        }
        Ok(out)
    }

    /// Delete oldest samples until at most `max_samples` remain.
    pub fn trim(&self, txn: &mut WriteTransaction, max_samples: u64) -> Result<(), StoreError> {
        while self.db.len(txn.ro())? > max_samples {
            let oldest = match self.db.first(txn.ro())? {
                Some((key, _)) => key.to_vec(),
                None => break,
            };
            self.db.delete(txn.rw(), &oldest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_store;
    use lattice_types::Amount;

    #[test]
    fn samples_trim_oldest_first() {
        let (_dir, store) = open_store();

        let mut txn = store.tx_begin_write().unwrap();
        for t in 1u64..=5 {
            store
                .online_weight
                .put(&mut txn, t, Amount::raw(t as u128))
                .unwrap();
        }
        store.online_weight.trim(&mut txn, 3).unwrap();
        txn.commit().unwrap();

        let txn = store.tx_begin_read().unwrap();
        let rows = store.online_weight.iter(&txn).unwrap();
        assert_eq!(
            rows,
            vec![
                (3, Amount::raw(3)),
                (4, Amount::raw(4)),
                (5, Amount::raw(5))
            ]
        );
    }
}
