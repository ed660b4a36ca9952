//! Bootstrap coordination: pulling missing history from peers.
//!
//! Three attempt kinds share one machinery: legacy walks frontier diffs,
//! lazy chases a target hash backward (widening over sources), and wallet
//! lazy seeds from wallet accounts. Transport is abstracted behind
//! [`BootstrapClient`]; pulled blocks feed the block processor's
//! unverified queue. A bounded pulls cache remembers head advances so
//! consecutive attempts skip work already done.

use crate::block_processor::BlockProcessor;
use lattice_ledger::Ledger;
use lattice_types::params::BootstrapConstants;
use lattice_types::{Account, Block, BlockHash};
use lattice_utils::Stats;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("peer disconnected: {0}")]
    Disconnected(String),
    #[error("peer below the throughput floor")]
    TooSlow,
}

/// One connection to a bootstrap peer. Implementations own socket I/O and
/// its timeouts; the coordinator owns retries and pacing.
pub trait BootstrapClient: Send + Sync {
    fn frontiers(&self, start: Account, count: u32)
        -> Result<Vec<(Account, BlockHash)>, BootstrapError>;
    /// Pull a chain segment: from `start` (account or hash) back to `end`.
    fn bulk_pull(
        &self,
        start: [u8; 32],
        end: BlockHash,
        count: u64,
    ) -> Result<Vec<Block>, BootstrapError>;
    /// Upload blocks the peer is missing.
    fn push(&self, blocks: Vec<Block>) -> Result<(), BootstrapError>;
}

/// Produces connections to distinct peers, up to the configured pool size.
pub trait ClientFactory: Send + Sync {
    fn connect(&self) -> Option<Arc<dyn BootstrapClient>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullInfo {
    pub account: Account,
    pub head: BlockHash,
    pub end: BlockHash,
    pub count: u64,
    pub attempts: u32,
}

/// Remembers `(account, head) → new_head` advances across attempts.
struct PullsCache {
    entries: HashMap<(Account, BlockHash), BlockHash>,
    order: VecDeque<(Account, BlockHash)>,
    cap: usize,
}

impl PullsCache {
    fn insert(&mut self, account: Account, head: BlockHash, new_head: BlockHash) {
        let key = (account, head);
        if self.entries.insert(key, new_head).is_none() {
            self.order.push_back(key);
            while self.order.len() > self.cap {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        }
    }

    fn get(&self, account: &Account, head: &BlockHash) -> Option<BlockHash> {
        self.entries.get(&(*account, *head)).copied()
    }
}

enum BootstrapRequest {
    Legacy,
    Lazy(BlockHash),
    WalletLazy(Vec<Account>),
}

struct InitiatorState {
    requests: VecDeque<BootstrapRequest>,
    in_progress: bool,
}

pub struct BootstrapInitiator {
    ledger: Arc<Ledger>,
    processor: Arc<BlockProcessor>,
    constants: BootstrapConstants,
    stats: Arc<Stats>,
    factory: Mutex<Option<Arc<dyn ClientFactory>>>,
    pulls_cache: Mutex<PullsCache>,
    state: Mutex<InitiatorState>,
    condition: Condvar,
    stopped: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BootstrapInitiator {
    pub fn new(
        ledger: Arc<Ledger>,
        processor: Arc<BlockProcessor>,
        constants: BootstrapConstants,
        stats: Arc<Stats>,
    ) -> Self {
        let cap = constants.pulls_cache_size;
        Self {
            ledger,
            processor,
            constants,
            stats,
            factory: Mutex::new(None),
            pulls_cache: Mutex::new(PullsCache {
                entries: HashMap::new(),
                order: VecDeque::new(),
                cap,
            }),
            state: Mutex::new(InitiatorState {
                requests: VecDeque::new(),
                in_progress: false,
            }),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    pub fn set_client_factory(&self, factory: Arc<dyn ClientFactory>) {
        *self.factory.lock().unwrap() = Some(factory);
    }

    /// Request a legacy frontier-diff attempt.
    pub fn bootstrap(&self) {
        self.enqueue(BootstrapRequest::Legacy);
    }

    /// Request a lazy attempt targeting a missing hash.
    pub fn bootstrap_lazy(&self, hash: BlockHash) {
        self.enqueue(BootstrapRequest::Lazy(hash));
    }

    /// Request a lazy attempt seeded from wallet accounts.
    pub fn bootstrap_wallet(&self, accounts: Vec<Account>) {
        self.enqueue(BootstrapRequest::WalletLazy(accounts));
    }

    fn enqueue(&self, request: BootstrapRequest) {
        let mut state = self.state.lock().unwrap();
        state.requests.push_back(request);
        drop(state);
        self.condition.notify_all();
    }

    pub fn in_progress(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.in_progress || !state.requests.is_empty()
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("bootstrap".into())
            .spawn(move || this.run())
            .expect("spawning the bootstrap initiator");
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        loop {
            let request = {
                let mut state = self.state.lock().unwrap();
                while state.requests.is_empty() && !self.stopped.load(Ordering::SeqCst) {
                    state = self.condition.wait(state).unwrap();
                }
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let request = state.requests.pop_front();
                state.in_progress = request.is_some();
                request
            };
            match request {
                Some(BootstrapRequest::Legacy) => self.run_legacy(),
                Some(BootstrapRequest::Lazy(hash)) => self.run_lazy(vec![hash]),
                Some(BootstrapRequest::WalletLazy(accounts)) => self.run_wallet(accounts),
                None => {}
            }
            self.state.lock().unwrap().in_progress = false;
        }
    }

    fn connect(&self) -> Option<Arc<dyn BootstrapClient>> {
        let factory = self.factory.lock().unwrap().clone();
        factory.and_then(|f| f.connect())
    }

    // ── Legacy ──────────────────────────────────────────────────────────

    fn run_legacy(&self) {
        let Some(mut client) = self.connect() else {
            warn!("no bootstrap peer available for legacy attempt");
            return;
        };
        let frontiers = match client.frontiers(Account::BURN, u32::MAX) {
            Ok(frontiers) => frontiers,
            Err(err) => {
                self.stats.inc("bootstrap", "frontier_req_failed");
                debug!(%err, "frontier request failed");
                return;
            }
        };

        let mut pulls: VecDeque<PullInfo> = VecDeque::new();
        let mut push_blocks: Vec<Block> = Vec::new();
        {
            let Ok(txn) = self.ledger.store.tx_begin_read() else {
                return;
            };
            let mut remote_accounts = HashSet::new();
            for (account, remote_head) in &frontiers {
                remote_accounts.insert(*account);
                let local = self.ledger.latest(&txn, account).ok().flatten();
                if local == Some(*remote_head) {
                    continue;
                }
                if self
                    .pulls_cache
                    .lock()
                    .unwrap()
                    .get(account, remote_head)
                    .is_some()
                {
                    self.stats.inc("bootstrap", "pull_cached");
                    continue;
                }
                if let Some(local_head) = local {
                    // The peer may instead be behind us; offer our tail.
                    if self
                        .ledger
                        .store
                        .blocks
                        .exists(&txn, remote_head)
                        .unwrap_or(false)
                    {
                        let mut hash = local_head;
                        while hash != *remote_head && !hash.is_zero() {
                            match self.ledger.store.blocks.get_block(&txn, &hash) {
                                Ok(Some(block)) => {
                                    let previous = block.previous();
                                    push_blocks.push(block);
                                    hash = previous;
                                }
                                _ => break,
                            }
                        }
                        continue;
                    }
                }
                pulls.push_back(PullInfo {
                    account: *account,
                    head: *remote_head,
                    end: local.unwrap_or(BlockHash::ZERO),
                    count: 0,
                    attempts: 0,
                });
            }
            // Chains the peer lacks entirely are offered via bulk push.
            if let Ok(rows) = self.ledger.store.accounts.iter(&txn) {
                for (account, info) in rows {
                    if remote_accounts.contains(&account) {
                        continue;
                    }
                    let mut hash = info.head;
                    while !hash.is_zero() {
                        match self.ledger.store.blocks.get_block(&txn, &hash) {
                            Ok(Some(block)) => {
                                let previous = block.previous();
                                push_blocks.push(block);
                                hash = previous;
                            }
                            _ => break,
                        }
                    }
                }
            }
        }
        info!(pulls = pulls.len(), pushes = push_blocks.len(), "legacy bootstrap attempt");

        if !push_blocks.is_empty() {
            push_blocks.reverse();
            if client.push(push_blocks).is_err() {
                self.stats.inc("bootstrap", "bulk_push_failed");
            }
        }

        while let Some(mut pull) = pulls.pop_front() {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            match self.execute_pull(&client, &pull) {
                Ok(count) => {
                    self.stats.add("bootstrap", "pulled_blocks", count);
                }
                Err(err) => {
                    debug!(%err, account = %pull.account, "pull failed");
                    pull.attempts += 1;
                    if pull.attempts < self.constants.frontier_retry_limit {
                        pulls.push_back(pull);
                    } else {
                        self.stats.inc("bootstrap", "pull_dropped");
                    }
                    // The connection may be at fault; take a fresh one.
                    match self.connect() {
                        Some(fresh) => client = fresh,
                        None => return,
                    }
                }
            }
        }
    }

    /// Run one bulk pull, feed the processor, and record the advance in
    /// the pulls cache. Enforces the post-warmup throughput floor.
    fn execute_pull(
        &self,
        client: &Arc<dyn BootstrapClient>,
        pull: &PullInfo,
    ) -> Result<u64, BootstrapError> {
        let started = Instant::now();
        let blocks = client.bulk_pull(*pull.account.as_bytes(), pull.end, pull.count)?;
        let elapsed = started.elapsed();
        let count = blocks.len() as u64;
        if elapsed > Duration::from_secs(self.constants.connection_warmup_time_s) {
            let rate = count / elapsed.as_secs().max(1);
            if rate < self.constants.minimum_blocks_per_sec {
                return Err(BootstrapError::TooSlow);
            }
        }
        let mut new_head = pull.head;
        for block in blocks {
            new_head = block.hash();
            self.processor.add(block);
        }
        self.pulls_cache
            .lock()
            .unwrap()
            .insert(pull.account, pull.head, new_head);
        Ok(count)
    }

    // ── Lazy ────────────────────────────────────────────────────────────

    fn run_lazy(&self, seeds: Vec<BlockHash>) {
        let Some(client) = self.connect() else {
            warn!("no bootstrap peer available for lazy attempt");
            return;
        };
        let mut keys: VecDeque<(BlockHash, u32)> =
            seeds.into_iter().map(|hash| (hash, 0)).collect();
        let mut seen: HashSet<BlockHash> = HashSet::new();

        while let Some((key, attempts)) = keys.pop_front() {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            if seen.contains(&key) || self.block_exists(&key) {
                continue;
            }
            let blocks = match client.bulk_pull(
                *key.as_bytes(),
                BlockHash::ZERO,
                self.constants.lazy_max_pull_blocks,
            ) {
                Ok(blocks) => blocks,
                Err(err) => {
                    debug!(%err, %key, "lazy pull failed");
                    if attempts + 1 < self.constants.lazy_retry_limit {
                        keys.push_back((key, attempts + 1));
                    } else {
                        self.stats.inc("bootstrap", "lazy_pull_dropped");
                    }
                    continue;
                }
            };
            self.stats.add("bootstrap", "lazy_blocks", blocks.len() as u64);
            for block in blocks {
                let hash = block.hash();
                seen.insert(hash);

                // Widen: chase the chain backward and across source links.
                let previous = block.previous();
                if !previous.is_zero() && !seen.contains(&previous) && !self.block_exists(&previous)
                {
                    keys.push_back((previous, 0));
                }
                if let Some(source) = block.source() {
                    if !seen.contains(&source) && !self.block_exists(&source) {
                        keys.push_back((source, 0));
                    }
                }
                if let Some(link) = block.link() {
                    // A state link may be a source hash; a destination
                    // account resolves to nothing and the pull is dropped
                    // after its retries.
                    let link_hash = link.as_block_hash();
                    if !link.is_zero()
                        && !self.ledger.is_epoch_link(&link)
                        && !seen.contains(&link_hash)
                        && !self.block_exists(&link_hash)
                    {
                        keys.push_back((link_hash, 0));
                    }
                }
                self.processor.add(block);
            }
        }
    }

    fn run_wallet(&self, accounts: Vec<Account>) {
        let seeds: Vec<BlockHash> = accounts
            .into_iter()
            .map(|account| BlockHash::from(account))
            .collect();
        self.run_lazy(seeds);
    }

    fn block_exists(&self, hash: &BlockHash) -> bool {
        self.ledger
            .store
            .tx_begin_read()
            .and_then(|txn| self.ledger.store.blocks.exists(&txn, hash))
            .unwrap_or(false)
    }
}
