//! The gap cache.
//!
//! Remembers hashes whose predecessor or source was missing at process
//! time. Voter weight observed behind a gap accumulates; past the
//! bootstrap threshold the node schedules a bootstrap attempt for the
//! missing hash, after a short delay during which the block may still
//! arrive on its own.

use lattice_consensus::OnlineReps;
use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, BlockHash, Vote};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// Bound on tracked gaps; the oldest arrival is evicted.
const MAX_GAPS: usize = 256;

struct GapInformation {
    arrival: Instant,
    voters: Vec<Account>,
    bootstrap_started: bool,
}

struct GapState {
    blocks: HashMap<BlockHash, GapInformation>,
    /// Arrival order for LRU eviction.
    order: VecDeque<BlockHash>,
}

pub struct GapCache {
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    bootstrap_fraction_numerator: u32,
    lazy_bootstrap_enabled: bool,
    legacy_bootstrap_enabled: bool,
    /// Invoked when a gap crosses the threshold; the node schedules the
    /// delayed existence re-check and bootstrap from here.
    bootstrap_starter: Mutex<Option<Arc<dyn Fn(BlockHash) + Send + Sync>>>,
    state: Mutex<GapState>,
}

impl GapCache {
    pub fn new(
        ledger: Arc<Ledger>,
        online_reps: Arc<OnlineReps>,
        bootstrap_fraction_numerator: u32,
        lazy_bootstrap_enabled: bool,
        legacy_bootstrap_enabled: bool,
    ) -> Self {
        Self {
            ledger,
            online_reps,
            bootstrap_fraction_numerator,
            lazy_bootstrap_enabled,
            legacy_bootstrap_enabled,
            bootstrap_starter: Mutex::new(None),
            state: Mutex::new(GapState {
                blocks: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn set_bootstrap_starter(&self, starter: Arc<dyn Fn(BlockHash) + Send + Sync>) {
        *self.bootstrap_starter.lock().unwrap() = Some(starter);
    }

    /// Track `hash` as missing, or refresh its arrival time.
    pub fn add(&self, hash: BlockHash) {
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.blocks.get_mut(&hash) {
            info.arrival = Instant::now();
            return;
        }
        if state.order.len() >= MAX_GAPS {
            // Evict the oldest arrival.
            if let Some((&oldest, _)) = state
                .blocks
                .iter()
                .min_by_key(|(_, info)| info.arrival)
            {
                state.blocks.remove(&oldest);
                state.order.retain(|h| h != &oldest);
            }
        }
        state.blocks.insert(
            hash,
            GapInformation {
                arrival: Instant::now(),
                voters: Vec::new(),
                bootstrap_started: false,
            },
        );
        state.order.push_back(hash);
    }

    pub fn erase(&self, hash: &BlockHash) {
        let mut state = self.state.lock().unwrap();
        state.blocks.remove(hash);
        state.order.retain(|h| h != hash);
    }

    /// Attribute a vote's weight to any tracked gaps it references. A gap
    /// whose accumulated voter weight crosses the bootstrap threshold
    /// triggers the starter once.
    pub fn vote(&self, vote: &Vote) {
        let mut triggered = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for hash in vote.hashes() {
                let Some(info) = state.blocks.get_mut(&hash) else {
                    continue;
                };
                if info.voters.contains(&vote.account) {
                    continue;
                }
                info.voters.push(vote.account);
                let tally: Amount = info
                    .voters
                    .iter()
                    .map(|voter| self.ledger.weight(voter))
                    .sum();
                if !info.bootstrap_started && self.crosses_threshold(tally) {
                    info.bootstrap_started = true;
                    triggered.push(hash);
                }
            }
        }
        for hash in triggered {
            debug!(%hash, "gap has enough vote weight to bootstrap");
            let starter = self.bootstrap_starter.lock().unwrap().clone();
            if let Some(starter) = starter {
                starter(hash);
            }
        }
    }

    fn crosses_threshold(&self, tally: Amount) -> bool {
        if self.lazy_bootstrap_enabled {
            tally >= self.online_reps.minimum()
        } else if self.legacy_bootstrap_enabled {
            tally > self.bootstrap_threshold()
        } else {
            false
        }
    }

    /// The legacy threshold: `online_stake / 256 × numerator`.
    pub fn bootstrap_threshold(&self) -> Amount {
        Amount::raw(
            self.online_reps.online_stake().number() / 256
                * self.bootstrap_fraction_numerator as u128,
        )
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_ledger::{Ledger, LedgerConstants};
    use lattice_ledger::genesis::dev_genesis_key;
    use lattice_store::Store;
    use lattice_types::Network;
    use lattice_utils::Stats;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn ledger_fixture() -> (TempDir, Arc<Ledger>, Arc<OnlineReps>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open_with_map_size(dir.path(), 64 * 1024 * 1024).unwrap());
        let ledger = Arc::new(
            Ledger::new(
                store,
                LedgerConstants::new(Network::Test),
                Arc::new(Stats::new()),
            )
            .unwrap(),
        );
        let online_reps = Arc::new(OnlineReps::new(
            Arc::clone(&ledger),
            Amount::raw(1000),
            50,
            Duration::from_secs(300),
            16,
        ));
        (dir, ledger, online_reps)
    }

    #[test]
    fn capacity_is_bounded() {
        let (_dir, ledger, online_reps) = ledger_fixture();
        let cache = GapCache::new(ledger, online_reps, 1, true, true);
        for i in 0..300u16 {
            let mut bytes = [0u8; 32];
            bytes[..2].copy_from_slice(&i.to_be_bytes());
            cache.add(BlockHash::new(bytes));
        }
        assert!(cache.size() <= MAX_GAPS);
    }

    #[test]
    fn quorum_weight_triggers_bootstrap_once() {
        let (_dir, ledger, online_reps) = ledger_fixture();
        let cache = GapCache::new(Arc::clone(&ledger), online_reps, 1, true, true);
        let triggered = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&triggered);
        cache.set_bootstrap_starter(Arc::new(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        }));

        let gap = BlockHash::new([0xAB; 32]);
        cache.add(gap);

        // The genesis account holds the entire supply; far past threshold.
        let keys = dev_genesis_key();
        let vote = Vote::new_hashes(keys.account(), 1, vec![gap]).unwrap();
        cache.vote(&vote);
        assert_eq!(triggered.load(Ordering::SeqCst), 1);

        // A second vote from the same voter does not re-trigger.
        let again = Vote::new_hashes(keys.account(), 2, vec![gap]).unwrap();
        cache.vote(&again);
        assert_eq!(triggered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weightless_votes_do_not_trigger() {
        let (_dir, ledger, online_reps) = ledger_fixture();
        let cache = GapCache::new(ledger, online_reps, 1, true, true);
        let triggered = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&triggered);
        cache.set_bootstrap_starter(Arc::new(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        }));

        let gap = BlockHash::new([0xAB; 32]);
        cache.add(gap);
        let vote = Vote::new_hashes(Account::new([5; 32]), 1, vec![gap]).unwrap();
        cache.vote(&vote);
        assert_eq!(triggered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn erase_removes_tracking() {
        let (_dir, ledger, online_reps) = ledger_fixture();
        let cache = GapCache::new(ledger, online_reps, 1, true, true);
        let gap = BlockHash::new([0xCD; 32]);
        cache.add(gap);
        assert_eq!(cache.size(), 1);
        cache.erase(&gap);
        assert_eq!(cache.size(), 0);
    }
}
