//! Rollback of unconfirmed chain segments.
//!
//! Undoes commits head-first from the account tip down to the target hash,
//! restoring pending entries, the weight index, and the account row at each
//! step. Confirmed blocks are immutable: if the confirmation height reaches
//! the target, nothing is touched.

use crate::ledger::{seconds_since_epoch, Ledger};
use crate::LedgerError;
use lattice_store::WriteTransaction;
use lattice_types::{
    Account, AccountInfo, Amount, Block, BlockHash, BlockSideband, Epoch, PendingInfo, PendingKey,
};
use tracing::debug;

impl Ledger {
    /// Roll back `hash` and every block above it on its account chain.
    /// Returns the reverted blocks, head first, target last.
    pub fn rollback(
        &self,
        txn: &mut WriteTransaction,
        hash: &BlockHash,
    ) -> Result<Vec<Block>, LedgerError> {
        let Some((_, target_sideband)) = self.store.blocks.get(txn, hash)? else {
            return Err(LedgerError::BlockNotFound);
        };
        let account = target_sideband.account;
        let confirmed = self.store.confirmation_height.get(txn, &account)?;
        if confirmed.height >= target_sideband.height {
            return Err(LedgerError::RollbackConfirmed);
        }

        let mut rolled_back = Vec::new();
        while self.store.blocks.exists(txn, hash)? {
            let info = self
                .store
                .accounts
                .get(txn, &account)?
                .ok_or(LedgerError::BlockNotFound)?;
            let (head_block, head_sideband) = self
                .store
                .blocks
                .get(txn, &info.head)?
                .ok_or(LedgerError::BlockNotFound)?;
            self.rollback_one(txn, &head_block, &head_sideband, &info)?;
            self.stats.inc("rollback", "block");
            debug!(hash = %info.head, %account, "rolled back block");
            rolled_back.push(head_block);
        }
        Ok(rolled_back)
    }

    /// Undo exactly one commit: the current head of its account.
    fn rollback_one(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        sideband: &BlockSideband,
        info: &AccountInfo,
    ) -> Result<(), LedgerError> {
        let hash = block.hash();
        let account = sideband.account;
        let previous_hash = block.previous();
        let previous = if previous_hash.is_zero() {
            None
        } else {
            self.store.blocks.get(txn, &previous_hash)?
        };
        let previous_balance = previous
            .as_ref()
            .map(|(_, sideband)| sideband.balance)
            .unwrap_or(Amount::ZERO);

        match block {
            Block::Send(send) => {
                let amount = previous_balance - send.balance;
                self.undo_send(txn, &send.destination, &hash)?;
                self.rep_weights
                    .add(&self.store, txn, &info.representative, amount)?;
            }
            Block::Receive(receive) => {
                let amount = sideband.balance - previous_balance;
                self.restore_pending(txn, &account, &receive.source, amount)?;
                self.rep_weights
                    .sub(&self.store, txn, &info.representative, amount)?;
            }
            Block::Open(open) => {
                self.restore_pending(txn, &account, &open.source, sideband.balance)?;
                self.rep_weights
                    .sub(&self.store, txn, &info.representative, sideband.balance)?;
            }
            Block::Change(change) => {
                let restored = self
                    .representative_calculated(txn, &previous_hash)?
                    .unwrap_or(account);
                self.rep_weights
                    .sub(&self.store, txn, &change.representative, info.balance)?;
                self.rep_weights
                    .add(&self.store, txn, &restored, info.balance)?;
            }
            Block::State(state) => {
                self.rep_weights
                    .sub(&self.store, txn, &state.representative, state.balance)?;
                if !previous_hash.is_zero() {
                    if let Some(restored) = self.representative_calculated(txn, &previous_hash)? {
                        self.rep_weights
                            .add(&self.store, txn, &restored, previous_balance)?;
                    }
                }
                if sideband.details.is_send {
                    self.undo_send(txn, &state.link.as_account(), &hash)?;
                } else if sideband.details.is_receive {
                    let amount = state.balance - previous_balance;
                    self.restore_pending(txn, &account, &state.link.as_block_hash(), amount)?;
                }
            }
        }

        self.store.blocks.del(txn, &hash)?;
        self.store.frontiers.del(txn, &hash)?;
        match previous {
            Some((previous_block, previous_sideband)) => {
                self.store
                    .blocks
                    .set_successor(txn, &previous_hash, BlockHash::ZERO)?;
                let representative = self
                    .representative_calculated(txn, &previous_hash)?
                    .unwrap_or(info.representative);
                self.store.accounts.put(
                    txn,
                    &account,
                    &AccountInfo {
                        head: previous_hash,
                        representative,
                        open_block: info.open_block,
                        balance: previous_sideband.balance,
                        modified: seconds_since_epoch(),
                        block_count: info.block_count - 1,
                        epoch: previous_sideband.details.epoch,
                    },
                )?;
                if !matches!(previous_block, Block::State(_)) {
                    self.store.frontiers.put(txn, &previous_hash, &account)?;
                }
            }
            None => {
                // Rolled back the opener; the account no longer exists.
                self.store.accounts.del(txn, &account)?;
                self.store.confirmation_height.del(txn, &account)?;
            }
        }
        Ok(())
    }

    /// Remove the pending entry a send created. If the destination already
    /// received it, the receiving chain is rolled back first so the entry
    /// reappears; this is the cross-chain cascade that keeps receives from
    /// outliving their sources.
    fn undo_send(
        &self,
        txn: &mut WriteTransaction,
        destination: &Account,
        send_hash: &BlockHash,
    ) -> Result<(), LedgerError> {
        let key = PendingKey::new(*destination, *send_hash);
        while !self.store.pending.exists(txn, &key)? {
            let head = self
                .latest(txn, destination)?
                .ok_or(LedgerError::BlockNotFound)?;
            self.rollback(txn, &head)?;
        }
        self.store.pending.del(txn, &key)?;
        Ok(())
    }

    /// Resurrect the pending entry a receive consumed.
    fn restore_pending(
        &self,
        txn: &mut WriteTransaction,
        account: &Account,
        source: &BlockHash,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let (source_account, epoch) = match self.store.blocks.get(txn, source)? {
            Some((_, sideband)) => (sideband.account, sideband.details.epoch),
            None => (Account::BURN, Epoch::Epoch0),
        };
        self.store.pending.put(
            txn,
            &PendingKey::new(*account, *source),
            &PendingInfo {
                source: source_account,
                amount,
                epoch,
            },
        )?;
        Ok(())
    }
}
