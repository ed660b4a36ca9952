//! The block validation state machine.
//!
//! Checks are ordered so the cheapest culling happens first; on any failure
//! the transaction is left untouched. Commit writes the block, its
//! sideband, the account row, the weight index, and the pending table in
//! one pass under the caller's write transaction.

use crate::ledger::{seconds_since_epoch, Ledger};
use crate::LedgerError;
use lattice_crypto::validate_block_signature;
use lattice_store::WriteTransaction;
use lattice_types::{
    Account, AccountInfo, Amount, Block, BlockDetails, BlockHash, BlockSideband, ChangeBlock,
    Epoch, OpenBlock, PendingInfo, PendingKey, ReceiveBlock, SendBlock, StateBlock,
};

/// Outcome class of a process call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Committed as the new account head.
    Progress,
    BadSignature,
    /// Already in the ledger.
    Old,
    /// A send whose balance exceeds its predecessor's.
    NegativeSpend,
    /// Competes with a committed block for the same chain position.
    Fork,
    /// The referenced source has no pending entry for this account.
    Unreceivable,
    /// `previous` is not in the ledger.
    GapPrevious,
    /// The referenced source block is not in the ledger.
    GapSource,
    OpenedBurnAccount,
    /// The stated balance contradicts the pending amount, or a send fails
    /// to strictly decrease, or an epoch block alters the balance.
    BalanceMismatch,
    /// An epoch block alters the representative.
    RepresentativeMismatch,
    /// The variant is not a legal successor of its predecessor's variant.
    BlockPosition,
}

/// What the caller already knows about a block's signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SignatureVerification {
    #[default]
    Unknown,
    Invalid,
    Valid,
    /// Valid against the epoch signer rather than the account key.
    ValidEpoch,
}

/// Process outcome plus the facts observers need.
#[derive(Clone, Debug)]
pub struct ProcessReturn {
    pub code: ProcessResult,
    pub account: Account,
    pub amount: Amount,
    /// For sends, the destination; for receives, the source's account.
    pub pending_account: Account,
    pub is_send: bool,
    pub verified: SignatureVerification,
}

impl ProcessReturn {
    fn rejected(code: ProcessResult, verified: SignatureVerification) -> Self {
        Self {
            code,
            account: Account::BURN,
            amount: Amount::ZERO,
            pending_account: Account::BURN,
            is_send: false,
            verified,
        }
    }
}

impl Ledger {
    /// Validate `block` against the current store state and commit it on
    /// success. Never mutates the store on failure.
    pub fn process(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        verification: SignatureVerification,
    ) -> Result<ProcessReturn, LedgerError> {
        let result = match block {
            Block::Send(send) => self.process_send(txn, block, send, verification),
            Block::Receive(receive) => self.process_receive(txn, block, receive, verification),
            Block::Open(open) => self.process_open(txn, block, open, verification),
            Block::Change(change) => self.process_change(txn, block, change, verification),
            Block::State(state) => self.process_state(txn, block, state, verification),
        }?;
        self.stats.inc("ledger", result_stat_detail(result.code));
        Ok(result)
    }

    fn process_send(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        send: &SendBlock,
        verification: SignatureVerification,
    ) -> Result<ProcessReturn, LedgerError> {
        let hash = block.hash();
        if self.store.blocks.exists(txn, &hash)? {
            return Ok(ProcessReturn::rejected(ProcessResult::Old, verification));
        }
        // The signer is the chain owner, resolved through the predecessor's
        // sideband so the signature verifies ahead of the position and
        // chain-head checks, even for non-head positions.
        let Some((previous, previous_sideband)) =
            self.store.blocks.get(txn, &send.previous)?
        else {
            return Ok(ProcessReturn::rejected(
                ProcessResult::GapPrevious,
                verification,
            ));
        };
        let account = previous_sideband.account;
        let verified = match self.check_signature(block, &account, verification) {
            Some(verified) => verified,
            None => {
                return Ok(ProcessReturn::rejected(
                    ProcessResult::BadSignature,
                    verification,
                ))
            }
        };
        if !block.valid_predecessor(previous.block_type()) {
            return Ok(ProcessReturn::rejected(
                ProcessResult::BlockPosition,
                verified,
            ));
        }
        // A missing frontier row means `previous` is no longer a head.
        if self.store.frontiers.get(txn, &send.previous)?.is_none() {
            return Ok(ProcessReturn::rejected(ProcessResult::Fork, verified));
        }
        let info = self
            .store
            .accounts
            .get(txn, &account)?
            .ok_or(LedgerError::BlockNotFound)?;
        if send.balance > info.balance {
            return Ok(ProcessReturn::rejected(
                ProcessResult::NegativeSpend,
                verified,
            ));
        }
        if send.balance == info.balance {
            // A send must strictly decrease the balance.
            return Ok(ProcessReturn::rejected(
                ProcessResult::BalanceMismatch,
                verified,
            ));
        }
        let amount = info.balance - send.balance;

        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account,
            balance: send.balance,
            height: info.block_count + 1,
            timestamp: seconds_since_epoch(),
            details: BlockDetails::new(Epoch::Epoch0, true, false, false),
        };
        self.commit_block(txn, &hash, block, &sideband)?;
        self.store.accounts.put(
            txn,
            &account,
            &AccountInfo {
                head: hash,
                balance: send.balance,
                modified: seconds_since_epoch(),
                block_count: info.block_count + 1,
                ..info
            },
        )?;
        self.rep_weights
            .sub(&self.store, txn, &info.representative, amount)?;
        self.store.pending.put(
            txn,
            &PendingKey::new(send.destination, hash),
            &PendingInfo {
                source: account,
                amount,
                epoch: Epoch::Epoch0,
            },
        )?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account,
            amount,
            pending_account: send.destination,
            is_send: true,
            verified,
        })
    }

    fn process_receive(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        receive: &ReceiveBlock,
        verification: SignatureVerification,
    ) -> Result<ProcessReturn, LedgerError> {
        let hash = block.hash();
        if self.store.blocks.exists(txn, &hash)? {
            return Ok(ProcessReturn::rejected(ProcessResult::Old, verification));
        }
        // Signer resolution mirrors the send path: the predecessor's
        // sideband names the chain owner, so the signature check precedes
        // the position and chain-head checks.
        let Some((previous, previous_sideband)) =
            self.store.blocks.get(txn, &receive.previous)?
        else {
            return Ok(ProcessReturn::rejected(
                ProcessResult::GapPrevious,
                verification,
            ));
        };
        let account = previous_sideband.account;
        let verified = match self.check_signature(block, &account, verification) {
            Some(verified) => verified,
            None => {
                return Ok(ProcessReturn::rejected(
                    ProcessResult::BadSignature,
                    verification,
                ))
            }
        };
        if !block.valid_predecessor(previous.block_type()) {
            return Ok(ProcessReturn::rejected(
                ProcessResult::BlockPosition,
                verified,
            ));
        }
        if self.store.frontiers.get(txn, &receive.previous)?.is_none() {
            return Ok(ProcessReturn::rejected(ProcessResult::Fork, verified));
        }
        if !self.store.blocks.exists(txn, &receive.source)? {
            return Ok(ProcessReturn::rejected(
                ProcessResult::GapSource,
                verified,
            ));
        }
        let pending_key = PendingKey::new(account, receive.source);
        let Some(pending) = self.store.pending.get(txn, &pending_key)? else {
            return Ok(ProcessReturn::rejected(
                ProcessResult::Unreceivable,
                verified,
            ));
        };
        let info = self
            .store
            .accounts
            .get(txn, &account)?
            .ok_or(LedgerError::BlockNotFound)?;
        let new_balance = info.balance.saturating_add(pending.amount);

        self.store.pending.del(txn, &pending_key)?;
        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account,
            balance: new_balance,
            height: info.block_count + 1,
            timestamp: seconds_since_epoch(),
            details: BlockDetails::new(Epoch::Epoch0, false, true, false),
        };
        self.commit_block(txn, &hash, block, &sideband)?;
        self.store.accounts.put(
            txn,
            &account,
            &AccountInfo {
                head: hash,
                balance: new_balance,
                modified: seconds_since_epoch(),
                block_count: info.block_count + 1,
                ..info
            },
        )?;
        self.rep_weights
            .add(&self.store, txn, &info.representative, pending.amount)?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account,
            amount: pending.amount,
            pending_account: pending.source,
            is_send: false,
            verified,
        })
    }

    fn process_open(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        open: &OpenBlock,
        verification: SignatureVerification,
    ) -> Result<ProcessReturn, LedgerError> {
        let hash = block.hash();
        if self.store.blocks.exists(txn, &hash)? {
            return Ok(ProcessReturn::rejected(ProcessResult::Old, verification));
        }
        let verified = match self.check_signature(block, &open.account, verification) {
            Some(verified) => verified,
            None => {
                return Ok(ProcessReturn::rejected(
                    ProcessResult::BadSignature,
                    verification,
                ))
            }
        };
        if !self.store.blocks.exists(txn, &open.source)? {
            return Ok(ProcessReturn::rejected(ProcessResult::GapSource, verified));
        }
        if open.account.is_burn() {
            return Ok(ProcessReturn::rejected(
                ProcessResult::OpenedBurnAccount,
                verified,
            ));
        }
        if self.store.accounts.exists(txn, &open.account)? {
            // A second opener competes with the account's first block.
            return Ok(ProcessReturn::rejected(ProcessResult::Fork, verified));
        }
        let pending_key = PendingKey::new(open.account, open.source);
        let Some(pending) = self.store.pending.get(txn, &pending_key)? else {
            return Ok(ProcessReturn::rejected(
                ProcessResult::Unreceivable,
                verified,
            ));
        };

        self.store.pending.del(txn, &pending_key)?;
        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account: open.account,
            balance: pending.amount,
            height: 1,
            timestamp: seconds_since_epoch(),
            details: BlockDetails::new(Epoch::Epoch0, false, true, false),
        };
        self.commit_block(txn, &hash, block, &sideband)?;
        self.store.accounts.put(
            txn,
            &open.account,
            &AccountInfo {
                head: hash,
                representative: open.representative,
                open_block: hash,
                balance: pending.amount,
                modified: seconds_since_epoch(),
                block_count: 1,
                epoch: Epoch::Epoch0,
            },
        )?;
        self.rep_weights
            .add(&self.store, txn, &open.representative, pending.amount)?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account: open.account,
            amount: pending.amount,
            pending_account: pending.source,
            is_send: false,
            verified,
        })
    }

    fn process_change(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        change: &ChangeBlock,
        verification: SignatureVerification,
    ) -> Result<ProcessReturn, LedgerError> {
        let hash = block.hash();
        if self.store.blocks.exists(txn, &hash)? {
            return Ok(ProcessReturn::rejected(ProcessResult::Old, verification));
        }
        // Same ordering as sends: resolve the signer from the
        // predecessor's sideband and verify before position and chain-head
        // checks.
        let Some((previous, previous_sideband)) =
            self.store.blocks.get(txn, &change.previous)?
        else {
            return Ok(ProcessReturn::rejected(
                ProcessResult::GapPrevious,
                verification,
            ));
        };
        let account = previous_sideband.account;
        let verified = match self.check_signature(block, &account, verification) {
            Some(verified) => verified,
            None => {
                return Ok(ProcessReturn::rejected(
                    ProcessResult::BadSignature,
                    verification,
                ))
            }
        };
        if !block.valid_predecessor(previous.block_type()) {
            return Ok(ProcessReturn::rejected(
                ProcessResult::BlockPosition,
                verified,
            ));
        }
        if self.store.frontiers.get(txn, &change.previous)?.is_none() {
            return Ok(ProcessReturn::rejected(ProcessResult::Fork, verified));
        }
        let info = self
            .store
            .accounts
            .get(txn, &account)?
            .ok_or(LedgerError::BlockNotFound)?;

        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account,
            balance: info.balance,
            height: info.block_count + 1,
            timestamp: seconds_since_epoch(),
            details: BlockDetails::new(Epoch::Epoch0, false, false, false),
        };
        self.commit_block(txn, &hash, block, &sideband)?;
        self.store.accounts.put(
            txn,
            &account,
            &AccountInfo {
                head: hash,
                representative: change.representative,
                modified: seconds_since_epoch(),
                block_count: info.block_count + 1,
                ..info
            },
        )?;
        self.rep_weights
            .sub(&self.store, txn, &info.representative, info.balance)?;
        self.rep_weights
            .add(&self.store, txn, &change.representative, info.balance)?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account,
            amount: Amount::ZERO,
            pending_account: Account::BURN,
            is_send: false,
            verified,
        })
    }

    fn process_state(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        state: &StateBlock,
        verification: SignatureVerification,
    ) -> Result<ProcessReturn, LedgerError> {
        let hash = block.hash();
        if self.store.blocks.exists(txn, &hash)? {
            return Ok(ProcessReturn::rejected(ProcessResult::Old, verification));
        }
        let is_epoch = self.is_epoch_link(&state.link);
        let verified = match verification {
            SignatureVerification::Valid | SignatureVerification::ValidEpoch => verification,
            _ => {
                if validate_block_signature(block, &state.account) {
                    SignatureVerification::Valid
                } else if is_epoch
                    && self
                        .constants
                        .epochs
                        .epoch(&state.link)
                        .and_then(|epoch| self.constants.epochs.signer(epoch))
                        .map(|signer| validate_block_signature(block, &signer))
                        .unwrap_or(false)
                {
                    SignatureVerification::ValidEpoch
                } else {
                    return Ok(ProcessReturn::rejected(
                        ProcessResult::BadSignature,
                        SignatureVerification::Invalid,
                    ));
                }
            }
        };
        if state.account.is_burn() {
            return Ok(ProcessReturn::rejected(
                ProcessResult::OpenedBurnAccount,
                verified,
            ));
        }
        let info = self.store.accounts.get(txn, &state.account)?;
        match &info {
            Some(existing) => {
                if state.previous.is_zero() {
                    // Re-opening an existing account.
                    return Ok(ProcessReturn::rejected(ProcessResult::Fork, verified));
                }
                if !self.store.blocks.exists(txn, &state.previous)? {
                    return Ok(ProcessReturn::rejected(
                        ProcessResult::GapPrevious,
                        verified,
                    ));
                }
                if existing.head != state.previous {
                    return Ok(ProcessReturn::rejected(ProcessResult::Fork, verified));
                }
            }
            None => {
                if !state.previous.is_zero() {
                    return Ok(ProcessReturn::rejected(
                        ProcessResult::GapPrevious,
                        verified,
                    ));
                }
            }
        }

        if is_epoch {
            self.process_state_epoch(txn, block, state, info, verified, hash)
        } else {
            self.process_state_value(txn, block, state, info, verified, hash)
        }
    }

    fn process_state_epoch(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        state: &StateBlock,
        info: Option<AccountInfo>,
        verified: SignatureVerification,
        hash: BlockHash,
    ) -> Result<ProcessReturn, LedgerError> {
        // An epoch block cannot be an account's first block.
        let Some(info) = info else {
            return Ok(ProcessReturn::rejected(
                ProcessResult::BlockPosition,
                verified,
            ));
        };
        if state.balance != info.balance {
            return Ok(ProcessReturn::rejected(
                ProcessResult::BalanceMismatch,
                verified,
            ));
        }
        if state.representative != info.representative {
            return Ok(ProcessReturn::rejected(
                ProcessResult::RepresentativeMismatch,
                verified,
            ));
        }
        let epoch = self
            .constants
            .epochs
            .epoch(&state.link)
            .expect("is_epoch_link implies a registered epoch");
        if info.epoch.successor() != Some(epoch) {
            // Skipped or repeated epoch.
            return Ok(ProcessReturn::rejected(
                ProcessResult::BlockPosition,
                verified,
            ));
        }

        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account: state.account,
            balance: info.balance,
            height: info.block_count + 1,
            timestamp: seconds_since_epoch(),
            details: BlockDetails::new(epoch, false, false, true),
        };
        self.commit_block(txn, &hash, block, &sideband)?;
        self.store.accounts.put(
            txn,
            &state.account,
            &AccountInfo {
                head: hash,
                modified: seconds_since_epoch(),
                block_count: info.block_count + 1,
                epoch,
                ..info
            },
        )?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account: state.account,
            amount: Amount::ZERO,
            pending_account: Account::BURN,
            is_send: false,
            verified,
        })
    }

    fn process_state_value(
        &self,
        txn: &mut WriteTransaction,
        block: &Block,
        state: &StateBlock,
        info: Option<AccountInfo>,
        verified: SignatureVerification,
        hash: BlockHash,
    ) -> Result<ProcessReturn, LedgerError> {
        // An account's first block must receive from somewhere.
        if info.is_none() && state.link.is_zero() {
            return Ok(ProcessReturn::rejected(ProcessResult::GapSource, verified));
        }
        let previous_balance = info.as_ref().map(|i| i.balance).unwrap_or(Amount::ZERO);
        let epoch = info.as_ref().map(|i| i.epoch).unwrap_or(Epoch::Epoch0);
        let is_send = state.balance < previous_balance;

        let mut amount;
        let mut pending_account = Account::BURN;
        if is_send {
            amount = previous_balance - state.balance;
            pending_account = state.link.as_account();
        } else {
            amount = state.balance - previous_balance;
            if !state.link.is_zero() {
                // Receive: the link names the source send.
                let source = state.link.as_block_hash();
                if !self.store.blocks.exists(txn, &source)? {
                    return Ok(ProcessReturn::rejected(ProcessResult::GapSource, verified));
                }
                let pending_key = PendingKey::new(state.account, source);
                let Some(pending) = self.store.pending.get(txn, &pending_key)? else {
                    return Ok(ProcessReturn::rejected(
                        ProcessResult::Unreceivable,
                        verified,
                    ));
                };
                if pending.amount != amount {
                    return Ok(ProcessReturn::rejected(
                        ProcessResult::BalanceMismatch,
                        verified,
                    ));
                }
                pending_account = pending.source;
                self.store.pending.del(txn, &pending_key)?;
            } else if !amount.is_zero() {
                // Balance increase with no source.
                return Ok(ProcessReturn::rejected(
                    ProcessResult::BalanceMismatch,
                    verified,
                ));
            }
        }
        let is_receive = !is_send && !state.link.is_zero();
        if !is_send && !is_receive {
            amount = Amount::ZERO;
        }

        let (block_count, open_block) = match &info {
            Some(info) => (info.block_count + 1, info.open_block),
            None => (1, hash),
        };
        let sideband = BlockSideband {
            successor: BlockHash::ZERO,
            account: state.account,
            balance: state.balance,
            height: block_count,
            timestamp: seconds_since_epoch(),
            details: BlockDetails::new(epoch, is_send, is_receive, false),
        };
        self.commit_block(txn, &hash, block, &sideband)?;
        if let Some(info) = &info {
            self.rep_weights
                .sub(&self.store, txn, &info.representative, info.balance)?;
        }
        self.rep_weights
            .add(&self.store, txn, &state.representative, state.balance)?;
        self.store.accounts.put(
            txn,
            &state.account,
            &AccountInfo {
                head: hash,
                representative: state.representative,
                open_block,
                balance: state.balance,
                modified: seconds_since_epoch(),
                block_count,
                epoch,
            },
        )?;
        if is_send {
            self.store.pending.put(
                txn,
                &PendingKey::new(pending_account, hash),
                &PendingInfo {
                    source: state.account,
                    amount,
                    epoch,
                },
            )?;
        }
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account: state.account,
            amount,
            pending_account,
            is_send,
            verified,
        })
    }

    fn check_signature(
        &self,
        block: &Block,
        account: &Account,
        verification: SignatureVerification,
    ) -> Option<SignatureVerification> {
        match verification {
            SignatureVerification::Valid | SignatureVerification::ValidEpoch => Some(verification),
            SignatureVerification::Invalid => None,
            SignatureVerification::Unknown => {
                if validate_block_signature(block, account) {
                    Some(SignatureVerification::Valid)
                } else {
                    None
                }
            }
        }
    }
}

fn result_stat_detail(code: ProcessResult) -> &'static str {
    match code {
        ProcessResult::Progress => "progress",
        ProcessResult::BadSignature => "bad_signature",
        ProcessResult::Old => "old",
        ProcessResult::NegativeSpend => "negative_spend",
        ProcessResult::Fork => "fork",
        ProcessResult::Unreceivable => "unreceivable",
        ProcessResult::GapPrevious => "gap_previous",
        ProcessResult::GapSource => "gap_source",
        ProcessResult::OpenedBurnAccount => "opened_burn_account",
        ProcessResult::BalanceMismatch => "balance_mismatch",
        ProcessResult::RepresentativeMismatch => "representative_mismatch",
        ProcessResult::BlockPosition => "block_position",
    }
}
