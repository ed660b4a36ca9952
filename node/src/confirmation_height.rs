//! The confirmation-height processor.
//!
//! Consumes hashes that reached quorum and cements them: per-account
//! heights advance monotonically, and every receive at or below the target
//! first forces the send's account chain to cement up to the source. Writes
//! are batched under the shared write queue so a rollback can never undo a
//! height being advanced.

use lattice_ledger::{Ledger, LedgerError};
use lattice_store::{ReadTransaction, WriteQueue, Writer};
use lattice_types::{Account, BlockHash, ConfirmationHeightInfo};
use lattice_utils::Stats;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Accounts written per commit.
pub const BATCH_WRITE_SIZE: usize = 2048;
/// Blocks read while walking one account chain segment.
pub const BATCH_READ_SIZE: u64 = 4096;

/// A newly cemented span of one account chain.
#[derive(Clone, Debug)]
pub struct CementedSpan {
    pub account: Account,
    pub old_height: u64,
    pub new_height: u64,
    pub frontier: BlockHash,
    /// The cemented hashes, oldest first, bounded by the read batch.
    pub hashes: Vec<BlockHash>,
}

/// Receives cemented-span notifications after each batch commit.
pub trait CementObserver: Send + Sync {
    fn cemented(&self, span: &CementedSpan);
}

#[derive(Clone)]
struct WriteDetails {
    account: Account,
    new_height: u64,
    frontier: BlockHash,
}

struct PendingState {
    queue: VecDeque<BlockHash>,
    set: HashSet<BlockHash>,
}

pub struct ConfirmationHeightProcessor {
    ledger: Arc<Ledger>,
    write_queue: Arc<WriteQueue>,
    stats: Arc<Stats>,
    batch_min_time: Duration,
    pending: Mutex<PendingState>,
    condition: Condvar,
    stopped: AtomicBool,
    processing: AtomicBool,
    observers: Mutex<Vec<Arc<dyn CementObserver>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConfirmationHeightProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        write_queue: Arc<WriteQueue>,
        stats: Arc<Stats>,
        batch_min_time: Duration,
    ) -> Self {
        Self {
            ledger,
            write_queue,
            stats,
            batch_min_time,
            pending: Mutex::new(PendingState {
                queue: VecDeque::new(),
                set: HashSet::new(),
            }),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn CementObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Queue a quorum-confirmed hash for cementing.
    pub fn add(&self, hash: BlockHash) {
        let mut pending = self.pending.lock().unwrap();
        if pending.set.insert(hash) {
            pending.queue.push_back(hash);
            drop(pending);
            self.condition.notify_all();
        }
    }

    pub fn is_processing(&self, hash: &BlockHash) -> bool {
        self.pending.lock().unwrap().set.contains(hash)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().queue.len()
    }

    /// Block until the pending set drains; test synchronization aid.
    pub fn flush(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            if self.pending_len() == 0 && !self.processing.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("conf height".into())
            .spawn(move || this.run())
            .expect("spawning the confirmation height processor");
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
        let mut accumulated: Vec<WriteDetails> = Vec::new();
        let mut last_flush = Instant::now();
        loop {
            let next = {
                let mut pending = self.pending.lock().unwrap();
                while pending.queue.is_empty() && !self.stopped.load(Ordering::SeqCst) {
                    if !accumulated.is_empty() {
                        // Flush buffered heights before going idle.
                        break;
                    }
                    pending = self.condition.wait(pending).unwrap();
                }
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                pending.queue.pop_front()
            };
            self.processing.store(true, Ordering::SeqCst);
            if let Some(hash) = next {
                match self.collect(&hash, &mut accumulated) {
                    Ok(()) => {}
                    Err(err) => error!(%hash, %err, "confirmation height traversal failed"),
                }
                self.pending.lock().unwrap().set.remove(&hash);
            }
            let idle = self.pending_len() == 0;
            let over_size = accumulated.len() >= BATCH_WRITE_SIZE;
            let over_time = last_flush.elapsed() >= self.batch_min_time;
            if !accumulated.is_empty() && (idle || over_size || over_time) {
                if let Err(err) = self.write_pending(&mut accumulated) {
                    error!(%err, "confirmation height write failed");
                }
                last_flush = Instant::now();
            }
            self.processing.store(false, Ordering::SeqCst);
        }
    }

    /// Walk the dependency graph from `target` and append the height
    /// advances it implies, sources before their receives.
    fn collect(
        &self,
        target: &BlockHash,
        accumulated: &mut Vec<WriteDetails>,
    ) -> Result<(), LedgerError> {
        let txn = self.ledger.store.tx_begin_read()?;
        let Some((_, target_sideband)) = self.ledger.store.blocks.get(&txn, target)? else {
            return Ok(());
        };

        // account → (planned confirmed height, iterated ceiling). Seeded
        // from heights already planned in the accumulator so batches stay
        // consistent without re-reading the store.
        let mut planned: HashMap<Account, (u64, u64)> = HashMap::new();
        for details in accumulated.iter() {
            let entry = planned.entry(details.account).or_insert((0, 0));
            entry.0 = entry.0.max(details.new_height);
            entry.1 = entry.1.max(details.new_height);
        }

        let mut stack: Vec<(Account, BlockHash, u64)> =
            vec![(target_sideband.account, *target, target_sideband.height)];

        while let Some((account, frame_hash, frame_height)) = stack.pop() {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }
            let confirmed = self.confirmed_height(&txn, &planned, &account)?;
            if confirmed >= frame_height {
                continue;
            }
            let iterated = planned.get(&account).map(|(_, i)| *i).unwrap_or(0);

            // Collect receives between the confirmed height and the frame
            // target whose sources are not yet cemented.
            let mut unconfirmed_sources: Vec<(Account, BlockHash, u64)> = Vec::new();
            let mut hash = frame_hash;
            let mut height = frame_height;
            let mut read = 0u64;
            while height > confirmed.max(iterated) && read < BATCH_READ_SIZE {
                let Some((block, sideband)) = self.ledger.store.blocks.get(&txn, &hash)? else {
                    break;
                };
                if sideband.details.is_receive {
                    let source = block
                        .source()
                        .or_else(|| block.link().map(|link| link.as_block_hash()));
                    if let Some(source) = source {
                        if let Some((_, source_sideband)) =
                            self.ledger.store.blocks.get(&txn, &source)?
                        {
                            if source_sideband.account != account {
                                let source_confirmed = self.confirmed_height(
                                    &txn,
                                    &planned,
                                    &source_sideband.account,
                                )?;
                                if source_confirmed < source_sideband.height {
                                    unconfirmed_sources.push((
                                        source_sideband.account,
                                        source,
                                        source_sideband.height,
                                    ));
                                }
                            }
                        }
                    }
                }
                hash = block.previous();
                height -= 1;
                read += 1;
            }

            if unconfirmed_sources.is_empty() {
                let entry = planned.entry(account).or_insert((0, 0));
                entry.0 = entry.0.max(frame_height);
                entry.1 = entry.1.max(frame_height);
                accumulated.push(WriteDetails {
                    account,
                    new_height: frame_height,
                    frontier: frame_hash,
                });
            } else {
                // Mark this span iterated so circular sends between two
                // accounts cannot loop the traversal, then revisit after
                // the sources.
                let entry = planned.entry(account).or_insert((0, 0));
                entry.1 = entry.1.max(frame_height);
                stack.push((account, frame_hash, frame_height));
                for frame in unconfirmed_sources {
                    stack.push(frame);
                }
            }
        }
        Ok(())
    }

    fn confirmed_height(
        &self,
        txn: &ReadTransaction,
        planned: &HashMap<Account, (u64, u64)>,
        account: &Account,
    ) -> Result<u64, LedgerError> {
        let stored = self
            .ledger
            .store
            .confirmation_height
            .get(txn, account)?
            .height;
        let planned_height = planned.get(account).map(|(c, _)| *c).unwrap_or(0);
        Ok(stored.max(planned_height))
    }

    /// Commit the accumulated height advances under the write lease and
    /// notify observers of each newly cemented span.
    fn write_pending(&self, accumulated: &mut Vec<WriteDetails>) -> Result<(), LedgerError> {
        let mut spans = Vec::new();
        {
            let _guard = self.write_queue.wait(Writer::ConfirmationHeight);
            let mut txn = self.ledger.store.tx_begin_write()?;
            for details in accumulated.drain(..) {
                let current = self
                    .ledger
                    .store
                    .confirmation_height
                    .get(&txn, &details.account)?;
                if current.height >= details.new_height {
                    continue;
                }
                // Collect the cemented hashes, walking back from the new
                // frontier to the previous one.
                let mut hashes = Vec::new();
                let mut hash = details.frontier;
                let span_len = details.new_height - current.height;
                for _ in 0..span_len.min(BATCH_READ_SIZE) {
                    let Some((block, _)) = self.ledger.store.blocks.get(&txn, &hash)? else {
                        break;
                    };
                    hashes.push(hash);
                    hash = block.previous();
                }
                hashes.reverse();
                self.ledger.store.confirmation_height.put(
                    &mut txn,
                    &details.account,
                    &ConfirmationHeightInfo {
                        height: details.new_height,
                        frontier: details.frontier,
                    },
                )?;
                self.stats.add("confirmation_height", "blocks_confirmed", span_len);
                spans.push(CementedSpan {
                    account: details.account,
                    old_height: current.height,
                    new_height: details.new_height,
                    frontier: details.frontier,
                    hashes,
                });
            }
            txn.commit()?;
        }
        let observers = self.observers.lock().unwrap().clone();
        for span in &spans {
            debug!(
                account = %span.account,
                height = span.new_height,
                "cemented account span"
            );
            for observer in &observers {
                observer.cemented(span);
            }
        }
        Ok(())
    }
}
