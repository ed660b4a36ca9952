//! Per-root election state.

use lattice_types::{Account, Amount, Block, BlockHash, QualifiedRoot};
use std::collections::HashMap;
use std::time::Instant;

/// How an election reached its terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionStatusType {
    Ongoing,
    /// Quorum of live votes.
    ActiveConfirmedQuorum,
    /// Cemented while an election was live.
    ActiveConfirmationHeight,
    /// Cemented with no live election.
    InactiveConfirmationHeight,
    Stopped,
}

/// Summary of a finished (or running) election.
#[derive(Clone, Debug)]
pub struct ElectionStatus {
    pub winner: Block,
    pub tally: Amount,
    /// Unix milliseconds at confirmation.
    pub election_end_ms: u64,
    pub election_duration_ms: u64,
    pub confirmation_request_count: u32,
    pub block_count: u32,
    pub voter_count: u32,
    pub status_type: ElectionStatusType,
}

/// Result of recording one vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Recorded; tally changed.
    Vote,
    /// The voter's stored sequence already covers this vote.
    Replay,
}

/// A representative's latest position in one election.
#[derive(Clone, Debug)]
pub struct VoteInfo {
    pub time: Instant,
    pub sequence: u64,
    pub hash: BlockHash,
}

/// One contested chain position and the votes observed for it.
pub struct Election {
    pub qualified_root: QualifiedRoot,
    /// Candidate blocks by hash. The winner starts as the first block seen.
    pub blocks: HashMap<BlockHash, Block>,
    pub last_votes: HashMap<Account, VoteInfo>,
    pub winner: BlockHash,
    pub confirmed: bool,
    pub stopped: bool,
    pub confirmation_request_count: u32,
    pub election_start: Instant,
}

impl Election {
    pub fn new(block: Block) -> Self {
        let hash = block.hash();
        let qualified_root = block.qualified_root();
        let mut blocks = HashMap::new();
        blocks.insert(hash, block);
        Self {
            qualified_root,
            blocks,
            last_votes: HashMap::new(),
            winner: hash,
            confirmed: false,
            stopped: false,
            confirmation_request_count: 0,
            election_start: Instant::now(),
        }
    }

    /// Record a vote for `hash`. A later sequence replaces the voter's
    /// earlier choice, shifting their weight; an equal or older sequence is
    /// a replay and changes nothing.
    pub fn vote(&mut self, voter: &Account, sequence: u64, hash: BlockHash) -> VoteOutcome {
        if let Some(existing) = self.last_votes.get(voter) {
            if existing.sequence >= sequence {
                return VoteOutcome::Replay;
            }
        }
        self.last_votes.insert(
            *voter,
            VoteInfo {
                time: Instant::now(),
                sequence,
                hash,
            },
        );
        VoteOutcome::Vote
    }

    /// Add a candidate block published at this root. Returns false when the
    /// hash was already a candidate.
    pub fn publish(&mut self, block: Block) -> bool {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return false;
        }
        self.blocks.insert(hash, block);
        true
    }

    /// Tally voter weight per candidate hash, using the supplied weight
    /// oracle, and return `(winner_hash, winner_weight)`. Votes for hashes
    /// that are not candidates still count toward their hash so a late
    /// publish picks them up.
    pub fn tally(&self, weight_of: &dyn Fn(&Account) -> Amount) -> (BlockHash, Amount) {
        let mut weights: HashMap<BlockHash, Amount> = HashMap::new();
        for (voter, info) in &self.last_votes {
            let entry = weights.entry(info.hash).or_insert(Amount::ZERO);
            *entry = entry.saturating_add(weight_of(voter));
        }
        let mut winner = self.winner;
        let mut winner_weight = weights.get(&winner).copied().unwrap_or(Amount::ZERO);
        for (hash, weight) in &weights {
            if *weight > winner_weight && self.blocks.contains_key(hash) {
                winner = *hash;
                winner_weight = *weight;
            }
        }
        (winner, winner_weight)
    }

    /// The winning candidate block, after a tally updated `winner`.
    pub fn winner_block(&self) -> Option<&Block> {
        self.blocks.get(&self.winner)
    }

    pub fn status(&self, tally: Amount, status_type: ElectionStatusType) -> ElectionStatus {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ElectionStatus {
            winner: self
                .winner_block()
                .cloned()
                .expect("winner is always a candidate"),
            tally,
            election_end_ms: now_ms,
            election_duration_ms: self.election_start.elapsed().as_millis() as u64,
            confirmation_request_count: self.confirmation_request_count,
            block_count: self.blocks.len() as u32,
            voter_count: self.last_votes.len() as u32,
            status_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{ReceiveBlock, Signature};

    fn block(byte: u8) -> Block {
        Block::Receive(ReceiveBlock {
            previous: BlockHash::new([byte; 32]),
            source: BlockHash::new([byte + 1; 32]),
            signature: Signature::ZERO,
            work: 0,
        })
    }

    #[test]
    fn later_sequence_supersedes() {
        let b1 = block(1);
        let b2 = Block::Receive(ReceiveBlock {
            previous: BlockHash::new([1; 32]),
            source: BlockHash::new([9; 32]),
            signature: Signature::ZERO,
            work: 0,
        });
        let mut election = Election::new(b1.clone());
        election.publish(b2.clone());
        let voter = Account::new([7; 32]);

        assert_eq!(election.vote(&voter, 5, b1.hash()), VoteOutcome::Vote);
        // Same sequence, different hash: replay, tally unchanged.
        assert_eq!(election.vote(&voter, 5, b2.hash()), VoteOutcome::Replay);
        let weight = |_: &Account| Amount::raw(100);
        assert_eq!(election.tally(&weight), (b1.hash(), Amount::raw(100)));

        // Higher sequence shifts the weight.
        assert_eq!(election.vote(&voter, 6, b2.hash()), VoteOutcome::Vote);
        assert_eq!(election.tally(&weight), (b2.hash(), Amount::raw(100)));
    }

    #[test]
    fn tally_sums_voters_per_hash() {
        let b1 = block(1);
        let mut election = Election::new(b1.clone());
        let voters: Vec<Account> = (0..3u8).map(|i| Account::new([i + 10; 32])).collect();
        for voter in &voters {
            election.vote(voter, 1, b1.hash());
        }
        let weight = |_: &Account| Amount::raw(10);
        assert_eq!(election.tally(&weight), (b1.hash(), Amount::raw(30)));
    }

    #[test]
    fn duplicate_publish_refused() {
        let b1 = block(1);
        let mut election = Election::new(b1.clone());
        assert!(!election.publish(b1));
    }
}
