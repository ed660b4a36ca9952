//! The bounded set of live elections.
//!
//! Dual-indexed under one mutex: by qualified root for lookup and by
//! adjusted difficulty for prioritization. A request loop periodically
//! solicits votes from known representatives for the highest-priority
//! elections, evicting the lowest when the set overflows, and sweeps
//! account frontiers so unconfirmed heads recover from packet loss.

use crate::election::{Election, ElectionStatus, ElectionStatusType, VoteOutcome};
use crate::online_weight::OnlineReps;
use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, Block, BlockHash, QualifiedRoot, Root, Vote};
use lattice_work::work_value;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Requests are sent for an election on every loop pass once it has been
/// alive this many passes.
pub const MINIMUM_CONFIRMATION_REQUEST_COUNT: u32 = 2;
/// Past this many requests an election counts as long-unconfirmed and
/// becomes an eviction candidate.
pub const HIGH_CONFIRMATION_REQUEST_COUNT: u32 = 2;
/// Hashes batched into one confirm_req message.
const CONFIRM_REQ_BATCH: usize = 7;
/// Adjusted-difficulty penalty per dependency level.
const DEPTH_PENALTY: u64 = 1 << 44;
/// Bound on the dependency walk when adjusting difficulty.
const MAX_DEPTH: u64 = 128;
/// Bound on the recently-confirmed root ring.
const RECENTLY_CONFIRMED_SIZE: usize = 2048;
/// Accounts examined per frontier sweep pass.
const FRONTIER_BATCH: usize = 128;
/// Request-loop passes between frontier sweeps.
const FRONTIER_CHECK_PERIOD: u64 = 4;

/// Sink for confirmed election statuses.
pub trait ElectionObserver: Send + Sync {
    fn election_confirmed(&self, status: &ElectionStatus);
}

/// Outbound side of the request loop.
pub trait ConfirmReqBroadcaster: Send + Sync {
    /// Solicit votes for up to seven `(hash, root)` pairs.
    fn broadcast_confirm_req(&self, requests: &[(BlockHash, Root)]);
    fn flood_block(&self, block: &Block);
}

#[derive(Clone, Debug)]
pub struct ActiveConfig {
    pub max_elections: usize,
    pub request_interval: Duration,
    pub confirmation_history_size: usize,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self {
            max_elections: 50_000,
            request_interval: Duration::from_millis(16_000),
            confirmation_history_size: 2048,
        }
    }
}

struct ConflictInfo {
    difficulty: u64,
    adjusted_difficulty: u64,
    election: Election,
}

struct ActiveState {
    roots: HashMap<QualifiedRoot, ConflictInfo>,
    /// Ordered view: highest adjusted difficulty first.
    ordered: BTreeSet<(Reverse<u64>, QualifiedRoot)>,
    /// Candidate hash → owning root.
    blocks: HashMap<BlockHash, QualifiedRoot>,
    confirmed: VecDeque<ElectionStatus>,
    recently_confirmed: VecDeque<QualifiedRoot>,
    recently_confirmed_set: HashSet<QualifiedRoot>,
    long_unconfirmed_size: usize,
    frontier_cursor: Account,
    loop_count: u64,
}

pub struct ActiveTransactions {
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    config: ActiveConfig,
    state: Mutex<ActiveState>,
    condition: Condvar,
    stopped: AtomicBool,
    observers: Mutex<Vec<Arc<dyn ElectionObserver>>>,
    broadcaster: Mutex<Option<Arc<dyn ConfirmReqBroadcaster>>>,
    wallet_accounts: Mutex<HashSet<Account>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveTransactions {
    pub fn new(ledger: Arc<Ledger>, online_reps: Arc<OnlineReps>, config: ActiveConfig) -> Self {
        Self {
            ledger,
            online_reps,
            config,
            state: Mutex::new(ActiveState {
                roots: HashMap::new(),
                ordered: BTreeSet::new(),
                blocks: HashMap::new(),
                confirmed: VecDeque::new(),
                recently_confirmed: VecDeque::new(),
                recently_confirmed_set: HashSet::new(),
                long_unconfirmed_size: 0,
                frontier_cursor: Account::BURN,
                loop_count: 0,
            }),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            broadcaster: Mutex::new(None),
            wallet_accounts: Mutex::new(HashSet::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ElectionObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    pub fn set_broadcaster(&self, broadcaster: Arc<dyn ConfirmReqBroadcaster>) {
        *self.broadcaster.lock().unwrap() = Some(broadcaster);
    }

    /// Mark an account as wallet-owned: its elections are never evicted and
    /// its frontiers lead the confirmation sweep.
    pub fn add_wallet_account(&self, account: Account) {
        self.wallet_accounts.lock().unwrap().insert(account);
    }

    /// Open an election seeded with `block`. Returns false when one already
    /// exists at the root or the root confirmed recently.
    pub fn start(&self, block: Block) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let root = block.qualified_root();
        let hash = block.hash();
        let mut state = self.state.lock().unwrap();
        if state.recently_confirmed_set.contains(&root) || state.roots.contains_key(&root) {
            return false;
        }
        let difficulty = work_value(&block.root(), block.work());
        let election = Election::new(block);
        state.roots.insert(
            root,
            ConflictInfo {
                difficulty,
                adjusted_difficulty: difficulty,
                election,
            },
        );
        state.ordered.insert((Reverse(difficulty), root));
        state.blocks.insert(hash, root);
        self.adjust_difficulty_locked(&mut state, hash);
        if state.roots.len() > self.config.max_elections {
            self.flush_lowest_locked(&mut state);
        }
        true
    }

    /// Route a vote to the elections covering its hashes. Returns true when
    /// at least one hash reached an election and every one was a replay.
    pub fn vote(&self, vote: &Vote) -> bool {
        let mut processed_any = false;
        let mut all_replay = true;
        let mut confirmed_statuses = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for hash in vote.hashes() {
                let Some(root) = state.blocks.get(&hash).copied() else {
                    continue;
                };
                let Some(info) = state.roots.get_mut(&root) else {
                    continue;
                };
                if info.election.confirmed {
                    continue;
                }
                processed_any = true;
                match info.election.vote(&vote.account, vote.sequence, hash) {
                    VoteOutcome::Vote => {
                        all_replay = false;
                        if let Some(status) = self.try_confirm_locked(&mut state, root) {
                            confirmed_statuses.push(status);
                        }
                    }
                    VoteOutcome::Replay => {}
                }
            }
        }
        self.dispatch_confirmed(confirmed_statuses);
        processed_any && all_replay
    }

    /// Accept a new candidate block at an existing election root. Returns
    /// true when the election existed and the block joined it.
    pub fn publish(&self, block: Block) -> bool {
        let root = block.qualified_root();
        let hash = block.hash();
        let mut state = self.state.lock().unwrap();
        let Some(info) = state.roots.get_mut(&root) else {
            return false;
        };
        if !info.election.publish(block) {
            return true;
        }
        state.blocks.insert(hash, root);
        // Pre-existing votes naming this hash now tally toward it.
        let confirmed = self.try_confirm_locked(&mut state, root);
        drop(state);
        self.dispatch_confirmed(confirmed.into_iter().collect());
        true
    }

    pub fn active(&self, root: &QualifiedRoot) -> bool {
        self.state.lock().unwrap().roots.contains_key(root)
    }

    pub fn active_block(&self, hash: &BlockHash) -> bool {
        self.state.lock().unwrap().blocks.contains_key(hash)
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Re-rank an election when a higher-work duplicate of a candidate
    /// arrives.
    pub fn update_difficulty(&self, block: &Block) {
        let root = block.qualified_root();
        let difficulty = work_value(&block.root(), block.work());
        let mut state = self.state.lock().unwrap();
        let Some(info) = state.roots.get_mut(&root) else {
            return;
        };
        if difficulty <= info.difficulty {
            return;
        }
        let delta = difficulty - info.difficulty;
        let old_adjusted = info.adjusted_difficulty;
        info.difficulty = difficulty;
        info.adjusted_difficulty = info.adjusted_difficulty.saturating_add(delta);
        let new_adjusted = info.adjusted_difficulty;
        state.ordered.remove(&(Reverse(old_adjusted), root));
        state.ordered.insert((Reverse(new_adjusted), root));
    }

    /// Record an external confirmation (cementing observed by the
    /// confirmation-height processor) for a block under election.
    pub fn confirm_block(&self, hash: &BlockHash) -> Option<ElectionStatus> {
        let mut state = self.state.lock().unwrap();
        let root = state.blocks.get(hash).copied()?;
        let info = state.roots.get_mut(&root)?;
        info.election.winner = *hash;
        let weight_of = self.weight_oracle();
        let (_, tally) = info.election.tally(&weight_of);
        let status = info
            .election
            .status(tally, ElectionStatusType::ActiveConfirmationHeight);
        self.erase_locked(&mut state, root);
        self.record_confirmed_locked(&mut state, root, status.clone());
        drop(state);
        self.dispatch_confirmed(vec![status.clone()]);
        Some(status)
    }

    /// Drop the election at a root without confirming it.
    pub fn erase(&self, root: &QualifiedRoot) {
        let mut state = self.state.lock().unwrap();
        self.erase_locked(&mut state, *root);
    }

    /// Completed election statuses, newest last, bounded by
    /// `confirmation_history_size`.
    pub fn list_confirmed(&self) -> Vec<ElectionStatus> {
        self.state.lock().unwrap().confirmed.iter().cloned().collect()
    }

    pub fn recently_confirmed(&self, root: &QualifiedRoot) -> bool {
        self.state
            .lock()
            .unwrap()
            .recently_confirmed_set
            .contains(root)
    }

    // ── Request loop ────────────────────────────────────────────────────

    pub fn start_thread(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("request loop".into())
            .spawn(move || this.request_loop())
            .expect("spawning the request loop");
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn request_loop(self: Arc<Self>) {
        while !self.stopped.load(Ordering::SeqCst) {
            let requests = self.request_confirm();
            self.broadcast_requests(requests);
            if self.loop_count() % FRONTIER_CHECK_PERIOD == 0 {
                self.confirm_frontiers();
            }
            let guard = self.state.lock().unwrap();
            let _unused = self
                .condition
                .wait_timeout(guard, self.config.request_interval)
                .unwrap();
        }
    }

    fn loop_count(&self) -> u64 {
        self.state.lock().unwrap().loop_count
    }

    /// One pass over the elections in priority order: bump request counts,
    /// refresh the long-unconfirmed tally, evict on overflow, and collect
    /// the `(hash, root)` pairs to solicit votes for.
    pub fn request_confirm(&self) -> Vec<(BlockHash, Root)> {
        let mut state = self.state.lock().unwrap();
        state.loop_count += 1;
        let mut requests = Vec::new();
        let mut long_unconfirmed = 0usize;
        let ordered_roots: Vec<QualifiedRoot> =
            state.ordered.iter().map(|(_, root)| *root).collect();
        for root in ordered_roots {
            let Some(info) = state.roots.get_mut(&root) else {
                continue;
            };
            if info.election.confirmed {
                continue;
            }
            info.election.confirmation_request_count += 1;
            if info.election.confirmation_request_count > HIGH_CONFIRMATION_REQUEST_COUNT {
                long_unconfirmed += 1;
            }
            // Young elections get a pass to let live votes settle first.
            if info.election.confirmation_request_count >= MINIMUM_CONFIRMATION_REQUEST_COUNT {
                requests.push((info.election.winner, root.root));
            }
        }
        state.long_unconfirmed_size = long_unconfirmed;
        if state.roots.len() > self.config.max_elections {
            self.flush_lowest_locked(&mut state);
        }
        requests
    }

    fn broadcast_requests(&self, requests: Vec<(BlockHash, Root)>) {
        if requests.is_empty() {
            return;
        }
        let broadcaster = self.broadcaster.lock().unwrap().clone();
        if let Some(broadcaster) = broadcaster {
            for chunk in requests.chunks(CONFIRM_REQ_BATCH) {
                broadcaster.broadcast_confirm_req(chunk);
            }
        }
    }

    /// Start elections for unconfirmed account heads, wallet accounts
    /// first, resuming from a cursor so every account is eventually
    /// visited. Recovers elections lost to packet loss or restart.
    pub fn confirm_frontiers(&self) {
        let Ok(txn) = self.ledger.store.tx_begin_read() else {
            return;
        };
        let mut candidates: Vec<(Account, u64)> = Vec::new();

        let wallet_accounts: Vec<Account> =
            self.wallet_accounts.lock().unwrap().iter().copied().collect();
        for account in wallet_accounts {
            if let Some(uncemented) = self.uncemented_count(&txn, &account) {
                if uncemented > 0 {
                    candidates.push((account, uncemented));
                }
            }
        }

        let cursor = self.state.lock().unwrap().frontier_cursor;
        if let Ok(rows) = self.ledger.store.accounts.iter_from(&txn, &cursor, FRONTIER_BATCH) {
            let next_cursor = rows.last().map(|(account, _)| *account);
            for (account, _) in rows {
                if let Some(uncemented) = self.uncemented_count(&txn, &account) {
                    if uncemented > 0 {
                        candidates.push((account, uncemented));
                    }
                }
            }
            let mut state = self.state.lock().unwrap();
            state.frontier_cursor = match next_cursor {
                // Wrapped: restart from the first account next sweep.
                Some(last) if last == state.frontier_cursor => Account::BURN,
                Some(last) => last,
                None => Account::BURN,
            };
        }

        // Most uncemented blocks first.
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        for (account, _) in candidates {
            let Ok(Some(head)) = self.ledger.latest(&txn, &account) else {
                continue;
            };
            let Ok(Some(block)) = self.ledger.store.blocks.get_block(&txn, &head) else {
                continue;
            };
            self.start(block);
        }
    }

    fn uncemented_count(
        &self,
        txn: &impl lattice_store::Transaction,
        account: &Account,
    ) -> Option<u64> {
        let info = self.ledger.store.accounts.get(txn, account).ok()??;
        let confirmation = self.ledger.store.confirmation_height.get(txn, account).ok()?;
        Some(info.block_count.saturating_sub(confirmation.height))
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn weight_oracle(&self) -> impl Fn(&Account) -> Amount + '_ {
        move |account: &Account| self.ledger.weight(account)
    }

    fn try_confirm_locked(
        &self,
        state: &mut ActiveState,
        root: QualifiedRoot,
    ) -> Option<ElectionStatus> {
        let info = state.roots.get_mut(&root)?;
        let weight_of = self.weight_oracle();
        let (winner, tally) = info.election.tally(&weight_of);
        info.election.winner = winner;
        if tally < self.online_reps.delta() {
            return None;
        }
        info.election.confirmed = true;
        let status = info
            .election
            .status(tally, ElectionStatusType::ActiveConfirmedQuorum);
        info!(
            winner = %status.winner.hash(),
            tally = %status.tally,
            duration_ms = status.election_duration_ms,
            "election confirmed"
        );
        self.erase_locked(state, root);
        self.record_confirmed_locked(state, root, status.clone());
        Some(status)
    }

    fn record_confirmed_locked(
        &self,
        state: &mut ActiveState,
        root: QualifiedRoot,
        status: ElectionStatus,
    ) {
        state.confirmed.push_back(status);
        while state.confirmed.len() > self.config.confirmation_history_size {
            state.confirmed.pop_front();
        }
        if state.recently_confirmed_set.insert(root) {
            state.recently_confirmed.push_back(root);
            while state.recently_confirmed.len() > RECENTLY_CONFIRMED_SIZE {
                if let Some(evicted) = state.recently_confirmed.pop_front() {
                    state.recently_confirmed_set.remove(&evicted);
                }
            }
        }
    }

    fn erase_locked(&self, state: &mut ActiveState, root: QualifiedRoot) {
        if let Some(info) = state.roots.remove(&root) {
            state.ordered.remove(&(Reverse(info.adjusted_difficulty), root));
            for hash in info.election.blocks.keys() {
                state.blocks.remove(hash);
            }
        }
    }

    /// Drop the two lowest-priority long-unconfirmed elections that do not
    /// involve wallet accounts.
    fn flush_lowest_locked(&self, state: &mut ActiveState) {
        let wallet_accounts = self.wallet_accounts.lock().unwrap();
        let mut victims = Vec::new();
        for (_, root) in state.ordered.iter().rev() {
            if victims.len() >= 2 {
                break;
            }
            let Some(info) = state.roots.get(root) else {
                continue;
            };
            if info.election.confirmed {
                continue;
            }
            if info.election.confirmation_request_count <= HIGH_CONFIRMATION_REQUEST_COUNT {
                continue;
            }
            let involves_wallet = info
                .election
                .blocks
                .values()
                .filter_map(|block| block.account_field())
                .any(|account| wallet_accounts.contains(&account));
            if involves_wallet {
                continue;
            }
            victims.push(*root);
        }
        drop(wallet_accounts);
        for root in victims {
            debug!(root = ?root, "evicting long-unconfirmed election");
            self.erase_locked(state, root);
        }
    }

    /// Recompute the adjusted difficulty of the election owning `hash` by
    /// counting its dependency depth within the active set: each active
    /// ancestor (via previous or source links) costs one penalty step, so
    /// dependency-free elections float to the top of the order.
    fn adjust_difficulty_locked(&self, state: &mut ActiveState, hash: BlockHash) {
        let Some(root) = state.blocks.get(&hash).copied() else {
            return;
        };
        let mut depth = 0u64;
        let mut current = hash;
        while depth < MAX_DEPTH {
            let Some(owning_root) = state.blocks.get(&current).copied() else {
                break;
            };
            let Some(info) = state.roots.get(&owning_root) else {
                break;
            };
            let Some(block) = info.election.blocks.get(&current) else {
                break;
            };
            let mut parent = block.previous();
            if parent.is_zero() || !state.blocks.contains_key(&parent) {
                if let Some(source) = block.source() {
                    parent = source;
                } else if let Some(link) = block.link() {
                    parent = link.as_block_hash();
                }
            }
            if parent.is_zero() || !state.blocks.contains_key(&parent) {
                break;
            }
            depth += 1;
            current = parent;
        }
        if let Some(info) = state.roots.get_mut(&root) {
            let old = info.adjusted_difficulty;
            let adjusted = info.difficulty.saturating_sub(depth.saturating_mul(DEPTH_PENALTY));
            info.adjusted_difficulty = adjusted;
            state.ordered.remove(&(Reverse(old), root));
            state.ordered.insert((Reverse(adjusted), root));
        }
    }

    fn dispatch_confirmed(&self, statuses: Vec<ElectionStatus>) {
        if statuses.is_empty() {
            return;
        }
        let observers = self.observers.lock().unwrap().clone();
        for status in &statuses {
            for observer in &observers {
                observer.election_confirmed(status);
            }
        }
    }
}
