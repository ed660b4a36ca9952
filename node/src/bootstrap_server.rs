//! Serving side of bootstrap: answers frontier and bulk-pull requests from
//! store state and ingests bulk pushes. The transport layer frames these
//! into the wire messages of the same names.

use crate::block_processor::BlockProcessor;
use lattice_ledger::{Ledger, LedgerError};
use lattice_messages::{BulkPull, BulkPullAccount, FrontierReq};
use lattice_types::{Account, Block, BlockHash, PendingInfo, PendingKey};
use std::sync::Arc;

/// Frontier rows served per request at most.
const MAX_FRONTIERS: usize = 1_048_576;
/// Blocks served by one bulk pull at most.
const MAX_BULK_PULL: u64 = 1_048_576;

pub struct BootstrapServer {
    ledger: Arc<Ledger>,
    processor: Arc<BlockProcessor>,
}

impl BootstrapServer {
    pub fn new(ledger: Arc<Ledger>, processor: Arc<BlockProcessor>) -> Self {
        Self { ledger, processor }
    }

    /// `(account, head)` pairs at or after `start`, oldest-modified filter
    /// per `age`, capped by `count`.
    pub fn frontiers(
        &self,
        request: &FrontierReq,
    ) -> Result<Vec<(Account, BlockHash)>, LedgerError> {
        let txn = self.ledger.store.tx_begin_read()?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let limit = (request.count as usize).min(MAX_FRONTIERS);
        let rows = self
            .ledger
            .store
            .accounts
            .iter_from(&txn, &request.start, limit)?;
        Ok(rows
            .into_iter()
            .filter(|(_, info)| now.saturating_sub(info.modified) <= request.age as u64)
            .map(|(account, info)| (account, info.head))
            .collect())
    }

    /// The chain segment a `bulk_pull` names: from `start` (an account's
    /// head, or a block hash) back toward `end`, newest first.
    pub fn bulk_pull(&self, request: &BulkPull) -> Result<Vec<Block>, LedgerError> {
        let txn = self.ledger.store.tx_begin_read()?;
        // Resolve the start: an account resolves to its head, otherwise it
        // names a block directly.
        let start_account = Account::new(request.start);
        let mut hash = match self.ledger.store.accounts.get(&txn, &start_account)? {
            Some(info) => info.head,
            None => BlockHash::new(request.start),
        };
        let cap = request.count.unwrap_or(MAX_BULK_PULL).min(MAX_BULK_PULL);
        let mut blocks = Vec::new();
        while !hash.is_zero() && hash != request.end && (blocks.len() as u64) < cap {
            let Some(block) = self.ledger.store.blocks.get_block(&txn, &hash)? else {
                break;
            };
            hash = block.previous();
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Pending entries of an account at or above the requested minimum.
    pub fn bulk_pull_account(
        &self,
        request: &BulkPullAccount,
    ) -> Result<Vec<(PendingKey, PendingInfo)>, LedgerError> {
        let txn = self.ledger.store.tx_begin_read()?;
        let rows = self
            .ledger
            .store
            .pending
            .account_pending(&txn, &request.account)?;
        Ok(rows
            .into_iter()
            .filter(|(_, info)| info.amount >= request.minimum_amount)
            .collect())
    }

    /// Ingest blocks a peer uploads; they take the unverified path.
    pub fn bulk_push(&self, blocks: Vec<Block>) -> usize {
        let mut accepted = 0;
        for block in blocks {
            if self.processor.add(block) {
                accepted += 1;
            }
        }
        accepted
    }
}
