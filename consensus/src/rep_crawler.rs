//! Representative discovery.
//!
//! Periodically probes peers with a `confirm_req` for a random recent block
//! and watches the replies: any voter whose weight clears the principal
//! threshold is tracked with a liveness timestamp. Active elections target
//! this set with confirmation requests.

use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, BlockHash, Root};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV6;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A representative ranked in one-thousandths of online weight or better.
const PRINCIPAL_WEIGHT_DIVISOR: u128 = 1000;

/// How long a representative stays listed without a fresh vote.
const REP_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone, Debug)]
pub struct Representative {
    pub account: Account,
    pub weight: Amount,
    pub endpoint: SocketAddrV6,
    pub last_response: Instant,
}

struct CrawlerState {
    reps: HashMap<Account, Representative>,
    /// Hashes of blocks we probed with, so only solicited votes register.
    active_probes: HashSet<BlockHash>,
}

pub struct RepCrawler {
    ledger: Arc<Ledger>,
    state: Mutex<CrawlerState>,
}

impl RepCrawler {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            state: Mutex::new(CrawlerState {
                reps: HashMap::new(),
                active_probes: HashSet::new(),
            }),
        }
    }

    /// Pick a probe subject: a random block from the store. The caller
    /// sends the `confirm_req` to a peer sample and registers the probe.
    pub fn probe_target(&self) -> Option<(BlockHash, Root)> {
        let txn = self.ledger.store.tx_begin_read().ok()?;
        let (hash, block) = self.ledger.store.blocks.random(&txn).ok()??;
        Some((hash, block.root()))
    }

    pub fn add_probe(&self, hash: BlockHash) {
        self.state.lock().unwrap().active_probes.insert(hash);
    }

    pub fn remove_probe(&self, hash: &BlockHash) {
        self.state.lock().unwrap().active_probes.remove(hash);
    }

    pub fn is_probe(&self, hash: &BlockHash) -> bool {
        self.state.lock().unwrap().active_probes.contains(hash)
    }

    /// Record a vote response from `endpoint`. Returns true when the voter
    /// is (now) tracked as a principal representative.
    pub fn response(
        &self,
        account: &Account,
        endpoint: SocketAddrV6,
        online_weight: Amount,
    ) -> bool {
        let weight = self.ledger.weight(account);
        let principal_floor = Amount::raw(online_weight.number() / PRINCIPAL_WEIGHT_DIVISOR);
        if weight < principal_floor || weight.is_zero() {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        state.reps.insert(
            *account,
            Representative {
                account: *account,
                weight,
                endpoint,
                last_response: Instant::now(),
            },
        );
        true
    }

    /// Up to `count` live representatives with at least `minimum_weight`,
    /// heaviest first.
    pub fn representatives(&self, count: usize, minimum_weight: Amount) -> Vec<Representative> {
        let cutoff = Instant::now() - REP_TIMEOUT;
        let mut reps: Vec<Representative> = self
            .state
            .lock()
            .unwrap()
            .reps
            .values()
            .filter(|rep| rep.last_response >= cutoff && rep.weight >= minimum_weight)
            .cloned()
            .collect();
        reps.sort_by(|a, b| b.weight.cmp(&a.weight));
        reps.truncate(count);
        reps
    }

    /// A random sample of `count` live representatives, for request fanout.
    pub fn sample(&self, count: usize) -> Vec<Representative> {
        let mut reps = self.representatives(usize::MAX, Amount::ZERO);
        reps.shuffle(&mut rand::thread_rng());
        reps.truncate(count);
        reps
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().reps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
