//! Recent votes by block hash.
//!
//! Lets the node re-serve votes it has already seen when a peer asks about
//! a block, without recomputing or re-requesting. Bounded, insertion
//! ordered, FIFO eviction; entries are not refreshed on read.

use lattice_types::{BlockHash, Vote};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

struct CacheState {
    votes_by_hash: HashMap<BlockHash, Vec<Arc<Vote>>>,
    insertion_order: VecDeque<BlockHash>,
}

pub struct VotesCache {
    max_size: usize,
    state: Mutex<CacheState>,
}

impl VotesCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            state: Mutex::new(CacheState {
                votes_by_hash: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    /// File a vote under each hash it references.
    pub fn add(&self, vote: &Arc<Vote>) {
        let mut state = self.state.lock().unwrap();
        for hash in vote.hashes() {
            if let Some(existing) = state.votes_by_hash.get_mut(&hash) {
                // One slot per voter; a newer sequence replaces.
                match existing.iter_mut().find(|v| v.account == vote.account) {
                    Some(slot) => {
                        if slot.sequence < vote.sequence {
                            *slot = Arc::clone(vote);
                        }
                    }
                    None => existing.push(Arc::clone(vote)),
                }
                continue;
            }
            if state.insertion_order.len() >= self.max_size {
                if let Some(evicted) = state.insertion_order.pop_front() {
                    state.votes_by_hash.remove(&evicted);
                }
            }
            state.votes_by_hash.insert(hash, vec![Arc::clone(vote)]);
            state.insertion_order.push_back(hash);
        }
    }

    /// All cached votes referencing `hash`.
    pub fn find(&self, hash: &BlockHash) -> Vec<Arc<Vote>> {
        self.state
            .lock()
            .unwrap()
            .votes_by_hash
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop the entry for `hash`, e.g. once its election concluded.
    pub fn remove(&self, hash: &BlockHash) {
        let mut state = self.state.lock().unwrap();
        state.votes_by_hash.remove(hash);
        state.insertion_order.retain(|h| h != hash);
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().insertion_order.len()
    }
}
