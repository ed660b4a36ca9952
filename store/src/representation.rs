//! The `representation` table: representative → summed delegated balance.

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Account, Amount};

#[derive(Clone, Copy)]
pub struct RepresentationTable {
    db: Database<Bytes, Bytes>,
}

impl RepresentationTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        representative: &Account,
        weight: Amount,
    ) -> Result<(), StoreError> {
        if weight.is_zero() {
            self.db.delete(txn.rw(), representative.as_bytes())?;
        } else {
            self.db
                .put(txn.rw(), representative.as_bytes(), &weight.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn get(
        &self,
        txn: &impl Transaction,
        representative: &Account,
    ) -> Result<Amount, StoreError> {
        match self.db.get(txn.ro(), representative.as_bytes())? {
            Some(bytes) => Ok(Amount::from_be_bytes(
                bytes
                    .try_into()
                    .map_err(|_| StoreError::corrupt("representation"))?,
            )),
            None => Ok(Amount::ZERO),
        }
    }

    /// All representatives with non-zero weight.
    pub fn iter(&self, txn: &impl Transaction) -> Result<Vec<(Account, Amount)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.iter(txn.ro())? {
            let (key, value) = item?;
            out.push((
                Account::new(
                    key.try_into()
                        .map_err(|_| StoreError::corrupt("representation"))?,
                ),
                Amount::from_be_bytes(
                    value
                        .try_into()
                        .map_err(|_| StoreError::corrupt("representation"))?,
                ),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_store;
    use lattice_types::{Account, Amount};

    #[test]
    fn weights_round_trip_and_zero_deletes() {
        let (_dir, store) = open_store();
        let rep = Account::new([1; 32]);

        let mut txn = store.tx_begin_write().unwrap();
        store
            .representation
            .put(&mut txn, &rep, Amount::raw(500))
            .unwrap();
        assert_eq!(store.representation.get(&txn, &rep).unwrap(), Amount::raw(500));

        store
            .representation
            .put(&mut txn, &rep, Amount::ZERO)
            .unwrap();
        assert_eq!(store.representation.get(&txn, &rep).unwrap(), Amount::ZERO);
        assert!(store.representation.iter(&txn).unwrap().is_empty());
        txn.commit().unwrap();
    }
}
