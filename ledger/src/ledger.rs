//! The ledger aggregate and its query surface.

use crate::genesis::LedgerConstants;
use crate::rep_weights::RepWeights;
use crate::LedgerError;
use lattice_store::{Store, Transaction, WriteTransaction};
use lattice_types::{
    Account, Amount, Block, BlockDetails, BlockHash, BlockSideband, ConfirmationHeightInfo,
    Epoch, Link, QualifiedRoot, Root,
};
use lattice_utils::Stats;
use std::sync::Arc;
use tracing::info;

pub(crate) fn seconds_since_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Validates and commits blocks; answers chain queries. Pure function of
/// store state plus the incrementally maintained weight index.
pub struct Ledger {
    pub store: Arc<Store>,
    pub rep_weights: RepWeights,
    pub constants: LedgerConstants,
    pub stats: Arc<Stats>,
}

impl Ledger {
    /// Build the ledger over an open store, loading the weight index and
    /// committing the genesis block if the store is empty.
    pub fn new(
        store: Arc<Store>,
        constants: LedgerConstants,
        stats: Arc<Stats>,
    ) -> Result<Self, LedgerError> {
        let ledger = Self {
            store,
            rep_weights: RepWeights::new(),
            constants,
            stats,
        };
        {
            let txn = ledger.store.tx_begin_read()?;
            ledger.rep_weights.load(&ledger.store, &txn)?;
        }
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Commit the genesis open block into an empty store.
    fn initialize(&self) -> Result<(), LedgerError> {
        let mut txn = self.store.tx_begin_write()?;
        if self.store.accounts.count(&txn)? > 0 {
            return Ok(());
        }
        let genesis = self.constants.genesis.clone();
        let hash = genesis.hash();
        let account = self.constants.genesis_account;
        let amount = self.constants.genesis_amount;
        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account,
            balance: amount,
            height: 1,
            timestamp: seconds_since_epoch(),
            details: BlockDetails::new(Epoch::Epoch0, false, true, false),
        };
        self.store.blocks.put(&mut txn, &hash, &genesis, &sideband)?;
        self.store.accounts.put(
            &mut txn,
            &account,
            &lattice_types::AccountInfo {
                head: hash,
                representative: account,
                open_block: hash,
                balance: amount,
                modified: seconds_since_epoch(),
                block_count: 1,
                epoch: Epoch::Epoch0,
            },
        )?;
        self.store.frontiers.put(&mut txn, &hash, &account)?;
        self.store.confirmation_height.put(
            &mut txn,
            &account,
            &ConfirmationHeightInfo {
                height: 1,
                frontier: hash,
            },
        )?;
        self.rep_weights.add(&self.store, &mut txn, &account, amount)?;
        txn.commit()?;
        info!(network = %self.constants.network, genesis = %hash, "initialized empty ledger");
        Ok(())
    }

    // ── Chain queries ───────────────────────────────────────────────────

    /// The balance the chain holds after `hash`, from the sideband.
    pub fn balance(&self, txn: &impl Transaction, hash: &BlockHash) -> Result<Option<Amount>, LedgerError> {
        Ok(self
            .store
            .blocks
            .get(txn, hash)?
            .map(|(_, sideband)| sideband.balance))
    }

    /// The value a block moved: the absolute balance delta at `hash`.
    pub fn amount(&self, txn: &impl Transaction, hash: &BlockHash) -> Result<Option<Amount>, LedgerError> {
        let Some((block, sideband)) = self.store.blocks.get(txn, hash)? else {
            return Ok(None);
        };
        let previous = block.previous();
        if previous.is_zero() {
            return Ok(Some(sideband.balance));
        }
        let Some(previous_balance) = self.balance(txn, &previous)? else {
            return Ok(None);
        };
        let delta = if sideband.balance >= previous_balance {
            sideband.balance - previous_balance
        } else {
            previous_balance - sideband.balance
        };
        Ok(Some(delta))
    }

    /// The account whose chain contains `hash`.
    pub fn account(&self, txn: &impl Transaction, hash: &BlockHash) -> Result<Option<Account>, LedgerError> {
        Ok(self
            .store
            .blocks
            .get(txn, hash)?
            .map(|(_, sideband)| sideband.account))
    }

    /// The head block of an account chain.
    pub fn latest(&self, txn: &impl Transaction, account: &Account) -> Result<Option<BlockHash>, LedgerError> {
        Ok(self.store.accounts.get(txn, account)?.map(|info| info.head))
    }

    /// The root the account's next block must use: its head, or the account
    /// itself when no chain exists yet.
    pub fn latest_root(&self, txn: &impl Transaction, account: &Account) -> Result<Root, LedgerError> {
        Ok(match self.store.accounts.get(txn, account)? {
            Some(info) => info.head.into(),
            None => (*account).into(),
        })
    }

    pub fn account_balance(&self, txn: &impl Transaction, account: &Account) -> Result<Amount, LedgerError> {
        Ok(self
            .store
            .accounts
            .get(txn, account)?
            .map(|info| info.balance)
            .unwrap_or(Amount::ZERO))
    }

    /// The voting weight delegated to `representative`.
    pub fn weight(&self, representative: &Account) -> Amount {
        self.rep_weights.weight(representative)
    }

    /// The block currently occupying a chain position, if any: the open
    /// block for account roots, or the successor of `previous`.
    pub fn successor(&self, txn: &impl Transaction, root: &QualifiedRoot) -> Result<Option<Block>, LedgerError> {
        let successor_hash = if root.previous.is_zero() {
            let account = Account::new(*root.root.as_bytes());
            self.store.accounts.get(txn, &account)?.map(|info| info.open_block)
        } else {
            self.store.blocks.successor(txn, &root.previous)?
        };
        match successor_hash {
            Some(hash) => Ok(self.store.blocks.get_block(txn, &hash)?),
            None => Ok(None),
        }
    }

    /// The committed block that conflicts with `block` at its chain
    /// position, for fork handling.
    pub fn forked_block(&self, txn: &impl Transaction, block: &Block) -> Result<Option<Block>, LedgerError> {
        let existing = self.successor(txn, &block.qualified_root())?;
        Ok(existing.filter(|candidate| candidate.hash() != block.hash()))
    }

    /// Whether `hash` is at or below its account's confirmation height.
    pub fn block_confirmed(&self, txn: &impl Transaction, hash: &BlockHash) -> Result<bool, LedgerError> {
        let Some((_, sideband)) = self.store.blocks.get(txn, hash)? else {
            return Ok(false);
        };
        let info = self.store.confirmation_height.get(txn, &sideband.account)?;
        Ok(sideband.height <= info.height)
    }

    /// Whether every dependency of `block` is already committed, meaning a
    /// process call could proceed past the gap checks.
    pub fn could_fit(&self, txn: &impl Transaction, block: &Block) -> Result<bool, LedgerError> {
        let previous = block.previous();
        if !previous.is_zero() && !self.store.blocks.exists(txn, &previous)? {
            return Ok(false);
        }
        if let Some(source) = block.source() {
            if !self.store.blocks.exists(txn, &source)? {
                return Ok(false);
            }
        }
        if let Block::State(state) = block {
            // A state receive's source is its link; sends and epochs are
            // satisfied by the previous check alone.
            if !state.link.is_zero() && !self.is_epoch_link(&state.link) {
                let is_send = match self.balance(txn, &state.previous)? {
                    Some(previous_balance) => state.balance < previous_balance,
                    None => false,
                };
                if !is_send
                    && !self
                        .store
                        .blocks
                        .exists(txn, &state.link.as_block_hash())?
                {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub fn is_epoch_link(&self, link: &Link) -> bool {
        self.constants.epochs.is_epoch_link(link)
    }

    /// The representative in force at `hash`, found by walking back to the
    /// nearest block that names one.
    pub fn representative_calculated(
        &self,
        txn: &impl Transaction,
        hash: &BlockHash,
    ) -> Result<Option<Account>, LedgerError> {
        let mut current = *hash;
        loop {
            let Some((block, _)) = self.store.blocks.get(txn, &current)? else {
                return Ok(None);
            };
            if let Some(representative) = block.representative() {
                return Ok(Some(representative));
            }
            // Send and receive variants inherit the chain's representative.
            current = block.previous();
            if current.is_zero() {
                return Ok(None);
            }
        }
    }

    pub fn block_count(&self, txn: &impl Transaction) -> Result<u64, LedgerError> {
        Ok(self.store.blocks.count(txn)?)
    }

    pub fn account_count(&self, txn: &impl Transaction) -> Result<u64, LedgerError> {
        Ok(self.store.accounts.count(txn)?)
    }

    /// Write a block and maintain the classic-frontier index. Shared by the
    /// process and rollback paths.
    pub(crate) fn commit_block(
        &self,
        txn: &mut WriteTransaction,
        hash: &BlockHash,
        block: &Block,
        sideband: &BlockSideband,
    ) -> Result<(), LedgerError> {
        self.store.blocks.put(txn, hash, block, sideband)?;
        let previous = block.previous();
        if !previous.is_zero() {
            self.store.blocks.set_successor(txn, &previous, *hash)?;
        }
        if !matches!(block, Block::State(_)) {
            if !previous.is_zero() {
                self.store.frontiers.del(txn, &previous)?;
            }
            self.store.frontiers.put(txn, hash, &sideband.account)?;
        } else if !previous.is_zero() {
            // A state block replacing a classic head retires its frontier row.
            self.store.frontiers.del(txn, &previous)?;
        }
        Ok(())
    }
}
