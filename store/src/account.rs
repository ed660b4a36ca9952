//! The `accounts` table: account → [`AccountInfo`].

use crate::{StoreError, Transaction, WriteTransaction};
use heed::types::Bytes;
use heed::Database;
use lattice_types::{Account, AccountInfo, Reader};

#[derive(Clone, Copy)]
pub struct AccountTable {
    db: Database<Bytes, Bytes>,
}

impl AccountTable {
    pub(crate) fn new(db: Database<Bytes, Bytes>) -> Self {
        Self { db }
    }

    pub fn put(
        &self,
        txn: &mut WriteTransaction,
        account: &Account,
        info: &AccountInfo,
    ) -> Result<(), StoreError> {
        self.db
            .put(txn.rw(), account.as_bytes(), &info.serialize())?;
        Ok(())
    }

    pub fn get(
        &self,
        txn: &impl Transaction,
        account: &Account,
    ) -> Result<Option<AccountInfo>, StoreError> {
        match self.db.get(txn.ro(), account.as_bytes())? {
            Some(bytes) => Ok(Some(
                AccountInfo::deserialize(&mut Reader::new(bytes))
                    .map_err(|_| StoreError::corrupt("accounts"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn exists(&self, txn: &impl Transaction, account: &Account) -> Result<bool, StoreError> {
        Ok(self.db.get(txn.ro(), account.as_bytes())?.is_some())
    }

    pub fn del(&self, txn: &mut WriteTransaction, account: &Account) -> Result<(), StoreError> {
        self.db.delete(txn.rw(), account.as_bytes())?;
        Ok(())
    }

    pub fn count(&self, txn: &impl Transaction) -> Result<u64, StoreError> {
        Ok(self.db.len(txn.ro())?)
    }

    /// All accounts in key order.
    pub fn iter(
        &self,
        txn: &impl Transaction,
    ) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.iter(txn.ro())? {
            let (key, value) = item?;
            out.push(decode(key, value)?);
        }
        Ok(out)
    }

    /// Accounts at or after `start` in key order, up to `limit` rows. Used
    /// by frontier serving and the confirmation sweep.
    pub fn iter_from(
        &self,
        txn: &impl Transaction,
        start: &Account,
        limit: usize,
    ) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        let mut out = Vec::new();
        let range = (
            std::ops::Bound::Included(start.as_bytes().as_slice()),
            std::ops::Bound::Unbounded,
        );
        for item in self.db.range(txn.ro(), &range)? {
            if out.len() >= limit {
                break;
            }
            let (key, value) = item?;
            out.push(decode(key, value)?);
        }
        Ok(out)
    }
}

fn decode(key: &[u8], value: &[u8]) -> Result<(Account, AccountInfo), StoreError> {
    let account = Account::new(key.try_into().map_err(|_| StoreError::corrupt("accounts"))?);
    let info = AccountInfo::deserialize(&mut Reader::new(value))
        .map_err(|_| StoreError::corrupt("accounts"))?;
    Ok((account, info))
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_store;
    use lattice_types::{Account, AccountInfo, Amount, BlockHash, Epoch};

    fn info(count: u64) -> AccountInfo {
        AccountInfo {
            head: BlockHash::new([1; 32]),
            representative: Account::new([2; 32]),
            open_block: BlockHash::new([3; 32]),
            balance: Amount::raw(100),
            modified: 1234,
            block_count: count,
            epoch: Epoch::Epoch0,
        }
    }

    #[test]
    fn put_get_del() {
        let (_dir, store) = open_store();
        let account = Account::new([7; 32]);

        let mut txn = store.tx_begin_write().unwrap();
        store.accounts.put(&mut txn, &account, &info(3)).unwrap();
        txn.commit().unwrap();

        let txn = store.tx_begin_read().unwrap();
        assert_eq!(store.accounts.get(&txn, &account).unwrap(), Some(info(3)));
        assert_eq!(store.accounts.count(&txn).unwrap(), 1);
        drop(txn);

        let mut txn = store.tx_begin_write().unwrap();
        store.accounts.del(&mut txn, &account).unwrap();
        txn.commit().unwrap();

        let txn = store.tx_begin_read().unwrap();
        assert!(!store.accounts.exists(&txn, &account).unwrap());
    }

    #[test]
    fn iter_from_is_ordered() {
        let (_dir, store) = open_store();
        let mut txn = store.tx_begin_write().unwrap();
        for byte in [0x30u8, 0x10, 0x20] {
            store
                .accounts
                .put(&mut txn, &Account::new([byte; 32]), &info(1))
                .unwrap();
        }
        txn.commit().unwrap();

        let txn = store.tx_begin_read().unwrap();
        let rows = store
            .accounts
            .iter_from(&txn, &Account::new([0x11; 32]), 10)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, Account::new([0x20; 32]));
        assert_eq!(rows[1].0, Account::new([0x30; 32]));
    }
}
