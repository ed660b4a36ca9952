//! LMDB-backed ledger storage.
//!
//! One environment, one named database per table. Reads take snapshot
//! transactions that may overlap freely; writes are exclusive and are
//! additionally serialized across writer classes by the [`WriteQueue`], so
//! the block processor and the confirmation-height processor never
//! interleave commits.

pub mod account;
pub mod block;
pub mod confirmation_height;
pub mod error;
pub mod frontier;
pub mod meta;
pub mod migration;
pub mod online_weight;
pub mod peer;
pub mod pending;
pub mod representation;
pub mod transaction;
pub mod unchecked;
pub mod vote;
pub mod write_queue;

pub use error::StoreError;
pub use migration::CURRENT_SCHEMA_VERSION;
pub use transaction::{ReadTransaction, Transaction, WriteTransaction};
pub use unchecked::UncheckedInfo;
pub use write_queue::{WriteGuard, WriteQueue, Writer};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;

const MAX_DBS: u32 = 16;
const DEFAULT_MAP_SIZE: usize = 4 * 1024 * 1024 * 1024;

/// The set of ordered KV tables backing the ledger.
pub struct Store {
    env: Env,
    pub blocks: block::BlockTable,
    pub accounts: account::AccountTable,
    pub pending: pending::PendingTable,
    pub unchecked: unchecked::UncheckedTable,
    pub frontiers: frontier::FrontierTable,
    pub representation: representation::RepresentationTable,
    pub vote: vote::VoteTable,
    pub online_weight: online_weight::OnlineWeightTable,
    pub peers: peer::PeerTable,
    pub confirmation_height: confirmation_height::ConfirmationHeightTable,
    pub meta: meta::MetaTable,
}

impl Store {
    /// Open or create the store at `path`, migrating the schema forward if
    /// needed. Refuses databases written by a newer version.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path).map_err(|e| StoreError::Init(e.to_string()))?;
        // Safety contract of EnvOpenOptions::open: no other process holds
        // this environment open with incompatible options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut txn = env.write_txn()?;
        let open = |txn: &mut heed::RwTxn<'_>, name| -> Result<Database<Bytes, Bytes>, StoreError> {
            Ok(env.create_database(txn, Some(name))?)
        };
        let blocks = block::BlockTable::new(open(&mut txn, "blocks")?);
        let accounts = account::AccountTable::new(open(&mut txn, "accounts")?);
        let pending = pending::PendingTable::new(open(&mut txn, "pending")?);
        let unchecked = unchecked::UncheckedTable::new(open(&mut txn, "unchecked")?);
        let frontiers = frontier::FrontierTable::new(open(&mut txn, "frontiers")?);
        let representation =
            representation::RepresentationTable::new(open(&mut txn, "representation")?);
        let vote = vote::VoteTable::new(open(&mut txn, "vote")?);
        let online_weight = online_weight::OnlineWeightTable::new(open(&mut txn, "online_weight")?);
        let peers = peer::PeerTable::new(open(&mut txn, "peers")?);
        let confirmation_height =
            confirmation_height::ConfirmationHeightTable::new(open(&mut txn, "confirmation_height")?);
        let meta = meta::MetaTable::new(open(&mut txn, "meta")?);
        txn.commit()?;

        let store = Self {
            blocks,
            accounts,
            pending,
            unchecked,
            frontiers,
            representation,
            vote,
            online_weight,
            peers,
            confirmation_height,
            meta,
            env,
        };
        let mut migration_txn = store.tx_begin_write()?;
        migration::migrate(&store, &mut migration_txn)?;
        migration_txn.commit()?;
        Ok(store)
    }

    pub fn tx_begin_read(&self) -> Result<ReadTransaction<'_>, StoreError> {
        Ok(ReadTransaction::from_raw(self.env.read_txn()?))
    }

    pub fn tx_begin_write(&self) -> Result<WriteTransaction<'_>, StoreError> {
        Ok(WriteTransaction::from_raw(self.env.write_txn()?))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;
    use tempfile::TempDir;

    /// Open a throwaway store in a tempdir; the directory lives as long as
    /// the returned guard.
    pub fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open_with_map_size(dir.path(), 64 * 1024 * 1024).unwrap();
        (dir, store)
    }
}
