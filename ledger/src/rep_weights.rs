//! The representation weight index.
//!
//! `weight(rep)` is the sum of balances of accounts currently delegating to
//! `rep`. The in-memory map answers hot-path queries; the `representation`
//! table mirrors it so restarts do not rescan every account.

use lattice_store::{Store, StoreError, Transaction, WriteTransaction};
use lattice_types::{Account, Amount};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct RepWeights {
    weights: Mutex<HashMap<Account, Amount>>,
}

impl RepWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persisted weights at startup.
    pub fn load(&self, store: &Store, txn: &impl Transaction) -> Result<(), StoreError> {
        let rows = store.representation.iter(txn)?;
        let mut weights = self.weights.lock().unwrap();
        weights.clear();
        for (rep, weight) in rows {
            weights.insert(rep, weight);
        }
        Ok(())
    }

    pub fn weight(&self, representative: &Account) -> Amount {
        self.weights
            .lock()
            .unwrap()
            .get(representative)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    /// Add delegated balance to a representative, in memory and on disk.
    pub fn add(
        &self,
        store: &Store,
        txn: &mut WriteTransaction,
        representative: &Account,
        amount: Amount,
    ) -> Result<(), StoreError> {
        if amount.is_zero() {
            return Ok(());
        }
        let updated = {
            let mut weights = self.weights.lock().unwrap();
            let entry = weights.entry(*representative).or_insert(Amount::ZERO);
            *entry = entry.saturating_add(amount);
            *entry
        };
        store.representation.put(txn, representative, updated)
    }

    /// Remove delegated balance from a representative.
    pub fn sub(
        &self,
        store: &Store,
        txn: &mut WriteTransaction,
        representative: &Account,
        amount: Amount,
    ) -> Result<(), StoreError> {
        if amount.is_zero() {
            return Ok(());
        }
        let updated = {
            let mut weights = self.weights.lock().unwrap();
            let entry = weights.entry(*representative).or_insert(Amount::ZERO);
            *entry = entry.saturating_sub(amount);
            let value = *entry;
            if value.is_zero() {
                weights.remove(representative);
            }
            value
        };
        store.representation.put(txn, representative, updated)
    }

    /// All representatives and their weights, heaviest first.
    pub fn all(&self) -> Vec<(Account, Amount)> {
        let weights = self.weights.lock().unwrap();
        let mut out: Vec<_> = weights.iter().map(|(k, v)| (*k, *v)).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }
}
