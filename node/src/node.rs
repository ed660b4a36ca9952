//! The node aggregate: constructs every subsystem, wires their observers,
//! runs the periodic maintenance tasks, and owns the ordered shutdown.

use crate::alarm::Alarm;
use crate::block_processor::{BlockProcessor, BlockProcessorConfig, BlockProcessorListener};
use crate::bootstrap::BootstrapInitiator;
use crate::bootstrap_server::BootstrapServer;
use crate::config::NodeConfig;
use crate::confirmation_height::{CementObserver, CementedSpan, ConfirmationHeightProcessor};
use crate::gap_cache::GapCache;
use crate::voting::{VoteGenerator, VoteSink};
use crate::NodeError;
use lattice_consensus::{
    ActiveConfig, ActiveTransactions, ConfirmReqBroadcaster, ElectionObserver, ElectionStatus,
    OnlineReps, RepCrawler, VoteProcessor, VoteProcessorConfig, VotesCache,
};
use lattice_crypto::{random_keypair, sign_message, KeyPair, SignatureChecker};
use lattice_ledger::{Ledger, LedgerConstants, ProcessResult, ProcessReturn};
use lattice_messages::{ConfirmAck, ConfirmReq, Keepalive, Message, NodeIdHandshake, Publish};
use lattice_network::{OutboundQueue, PeerManager, SynCookies};
use lattice_store::{Store, WriteQueue};
use lattice_types::{Amount, Block, BlockHash, Network, NetworkParams, Root, Vote};
use lattice_utils::Stats;
use lattice_work::WorkThresholds;
use std::net::SocketAddrV6;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before a freshly processed block gets a follow-up confirmation
/// request if its election drew none.
const DELAYED_CONFIRM_REQ: Duration = Duration::from_millis(1500);
/// Representatives targeted per confirmation-request round.
const CONFIRM_REQ_REP_SAMPLE: usize = 16;

pub struct Node {
    pub config: NodeConfig,
    pub params: NetworkParams,
    pub node_id: KeyPair,
    pub stats: Arc<Stats>,
    pub ledger: Arc<Ledger>,
    pub checker: Arc<SignatureChecker>,
    pub write_queue: Arc<WriteQueue>,
    pub online_reps: Arc<OnlineReps>,
    pub votes_cache: Arc<VotesCache>,
    pub rep_crawler: Arc<RepCrawler>,
    pub active: Arc<ActiveTransactions>,
    pub vote_processor: Arc<VoteProcessor>,
    pub gap_cache: Arc<GapCache>,
    pub block_processor: Arc<BlockProcessor>,
    pub confirmation_height: Arc<ConfirmationHeightProcessor>,
    pub bootstrap: Arc<BootstrapInitiator>,
    pub bootstrap_server: Arc<BootstrapServer>,
    pub vote_generator: Arc<VoteGenerator>,
    pub peer_manager: Arc<PeerManager>,
    pub syn_cookies: Arc<SynCookies>,
    pub outbound: Arc<OutboundQueue>,
    pub alarm: Arc<Alarm>,
}

impl Node {
    pub fn new(
        network: Network,
        data_path: &Path,
        config: NodeConfig,
    ) -> Result<Arc<Self>, NodeError> {
        let params = NetworkParams::new(network);
        let stats = Arc::new(Stats::new());
        let store = Arc::new(Store::open(data_path)?);
        let ledger = Arc::new(Ledger::new(
            store,
            LedgerConstants::new(network),
            Arc::clone(&stats),
        )?);
        let write_queue = Arc::new(WriteQueue::new());
        let checker = Arc::new(SignatureChecker::new());
        let online_reps = Arc::new(OnlineReps::new(
            Arc::clone(&ledger),
            Amount::raw(config.online_weight_minimum_raw()?),
            config.online_weight_quorum,
            Duration::from_secs(params.node.weight_period_s),
            params.node.max_weight_samples,
        ));
        let votes_cache = Arc::new(VotesCache::new(params.voting.max_cache));
        let rep_crawler = Arc::new(RepCrawler::new(Arc::clone(&ledger)));
        let active = Arc::new(ActiveTransactions::new(
            Arc::clone(&ledger),
            Arc::clone(&online_reps),
            ActiveConfig {
                max_elections: config.active_elections_size,
                request_interval: Duration::from_millis(params.network.request_interval_ms),
                confirmation_history_size: config.confirmation_history_size,
            },
        ));
        let vote_processor = Arc::new(VoteProcessor::new(
            Arc::clone(&ledger),
            Arc::clone(&active),
            Arc::clone(&online_reps),
            Arc::clone(&votes_cache),
            Arc::clone(&checker),
            Arc::clone(&stats),
            VoteProcessorConfig::default(),
        ));
        let gap_cache = Arc::new(GapCache::new(
            Arc::clone(&ledger),
            Arc::clone(&online_reps),
            config.bootstrap_fraction_numerator,
            !config.disable_lazy_bootstrap,
            !config.disable_legacy_bootstrap,
        ));
        let block_processor = Arc::new(BlockProcessor::new(
            Arc::clone(&ledger),
            Arc::clone(&gap_cache),
            Arc::clone(&checker),
            Arc::clone(&write_queue),
            WorkThresholds::new(network),
            Arc::clone(&stats),
            BlockProcessorConfig {
                batch_max_time: Duration::from_millis(config.block_processor_batch_max_time_ms),
                full_size: config.block_processor_full_size,
                ..BlockProcessorConfig::default()
            },
        ));
        let confirmation_height = Arc::new(ConfirmationHeightProcessor::new(
            Arc::clone(&ledger),
            Arc::clone(&write_queue),
            Arc::clone(&stats),
            Duration::from_millis(config.conf_height_batch_min_time_ms),
        ));
        let bootstrap = Arc::new(BootstrapInitiator::new(
            Arc::clone(&ledger),
            Arc::clone(&block_processor),
            params.bootstrap.clone(),
            Arc::clone(&stats),
        ));
        let bootstrap_server = Arc::new(BootstrapServer::new(
            Arc::clone(&ledger),
            Arc::clone(&block_processor),
        ));
        let vote_generator = Arc::new(VoteGenerator::new(
            Arc::clone(&ledger),
            Duration::from_millis(params.voting.generator_delay_ms),
        ));
        let peer_manager = Arc::new(PeerManager::new(params.network.max_peers_per_ip));
        let syn_cookies = Arc::new(SynCookies::new(Duration::from_secs(
            params.network.syn_cookie_cutoff_s,
        )));
        let outbound = Arc::new(OutboundQueue::new(params.network.clone(), 16_384));
        let alarm = Alarm::new();

        let node = Arc::new(Self {
            config,
            params,
            node_id: random_keypair(),
            stats,
            ledger,
            checker,
            write_queue,
            online_reps,
            votes_cache,
            rep_crawler,
            active,
            vote_processor,
            gap_cache,
            block_processor,
            confirmation_height,
            bootstrap,
            bootstrap_server,
            vote_generator,
            peer_manager,
            syn_cookies,
            outbound,
            alarm,
        });
        node.wire();
        info!(network = %network, node_id = %node.node_id.account(), "node constructed");
        Ok(node)
    }

    /// Register the cross-subsystem observers. All references are weak so
    /// subsystems never keep the node alive.
    fn wire(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.block_processor
            .add_listener(Arc::new(ProcessorRouter { node: weak.clone() }));
        self.active
            .add_observer(Arc::new(ElectionRouter { node: weak.clone() }));
        self.active
            .set_broadcaster(Arc::new(NetworkBroadcaster { node: weak.clone() }));
        self.confirmation_height
            .add_observer(Arc::new(CementRouter { node: weak.clone() }));
        self.vote_generator
            .add_sink(Arc::new(GeneratedVoteRouter { node: weak.clone() }));

        let starter_weak = weak;
        self.gap_cache
            .set_bootstrap_starter(Arc::new(move |hash: BlockHash| {
                let Some(node) = starter_weak.upgrade() else {
                    return;
                };
                let delay =
                    Duration::from_millis(node.params.node.gap_cache_bootstrap_start_delay_ms);
                let recheck = Arc::downgrade(&node);
                node.alarm.add(delay, move || {
                    let Some(node) = recheck.upgrade() else {
                        return;
                    };
                    // The block may have arrived on its own in the interim.
                    let exists = node
                        .ledger
                        .store
                        .tx_begin_read()
                        .and_then(|txn| node.ledger.store.blocks.exists(&txn, &hash))
                        .unwrap_or(false);
                    if exists {
                        return;
                    }
                    if !node.bootstrap.in_progress() {
                        info!(%hash, "starting bootstrap for vote-backed gap");
                    }
                    if !node.config.disable_lazy_bootstrap {
                        node.bootstrap.bootstrap_lazy(hash);
                    } else if !node.config.disable_legacy_bootstrap {
                        node.bootstrap.bootstrap();
                    }
                });
            }));
    }

    /// Start every subsystem thread and the maintenance schedule.
    pub fn start(self: &Arc<Self>) {
        self.block_processor.start();
        self.vote_processor.start();
        self.confirmation_height.start();
        self.active.start_thread();
        self.bootstrap.start();
        self.vote_generator.start();
        self.ongoing_online_weight_sample();
        self.ongoing_peer_cleanup();
        self.ongoing_unchecked_cleanup();
        self.ongoing_rep_crawl();
        info!("node started");
    }

    /// Ordered shutdown: consensus first, then the processors feeding it,
    /// then bootstrap and the timers, finally the write queue.
    pub fn stop(&self) {
        self.active.stop();
        self.block_processor.stop();
        self.confirmation_height.stop();
        self.vote_processor.stop();
        self.bootstrap.stop();
        self.vote_generator.stop();
        self.alarm.stop();
        self.write_queue.stop();
        info!("node stopped");
    }

    // ── Ingestion entry points ──────────────────────────────────────────

    /// A block arriving from the network or a local client.
    pub fn process_active(&self, block: Block) -> bool {
        self.block_processor.add(block)
    }

    /// A vote arriving from the network.
    pub fn process_vote(&self, vote: Arc<Vote>, from: SocketAddrV6) -> bool {
        self.gap_cache.vote(&vote);
        self.vote_processor.vote(vote, from)
    }

    /// Dispatch one parsed message from a realtime channel.
    pub fn handle_message(self: &Arc<Self>, message: Message, from: SocketAddrV6) {
        self.peer_manager
            .contacted(from, self.params.network.protocol_version);
        match message {
            Message::Keepalive(keepalive) => self.handle_keepalive(keepalive, from),
            Message::Publish(Publish { block }) => {
                self.stats.inc("message", "publish");
                self.process_active(block);
            }
            Message::ConfirmReq(request) => self.handle_confirm_req(request, from),
            Message::ConfirmAck(ConfirmAck { vote }) => {
                self.stats.inc("message", "confirm_ack");
                let vote = Arc::new(vote);
                let first_hash = vote.hashes().first().copied().unwrap_or_default();
                if self.rep_crawler.is_probe(&first_hash) {
                    self.rep_crawler
                        .response(&vote.account, from, self.online_reps.online_stake());
                    self.rep_crawler.remove_probe(&first_hash);
                }
                self.process_vote(vote, from);
            }
            Message::NodeIdHandshake(handshake) => self.handle_handshake(handshake, from),
            Message::FrontierReq(_)
            | Message::BulkPull(_)
            | Message::BulkPullAccount(_)
            | Message::BulkPush => {
                // Bulk traffic belongs on a bootstrap connection; the
                // transport routes it to the bootstrap server directly.
                self.stats.inc("message", "bulk_on_realtime");
            }
        }
    }

    fn handle_keepalive(&self, keepalive: Keepalive, _from: SocketAddrV6) {
        self.stats.inc("message", "keepalive");
        let window = Duration::from_secs(self.params.network.cleanup_period_s);
        for endpoint in keepalive.peers {
            if endpoint.port() == 0 {
                continue;
            }
            if self.peer_manager.reachout(endpoint, window) {
                let mut reply = Keepalive::default();
                for (slot, peer) in reply
                    .peers
                    .iter_mut()
                    .zip(self.peer_manager.random_sample(8))
                {
                    *slot = peer;
                }
                self.outbound.send(endpoint, &Message::Keepalive(reply));
            }
        }
    }

    fn handle_confirm_req(self: &Arc<Self>, request: ConfirmReq, from: SocketAddrV6) {
        self.stats.inc("message", "confirm_req");
        let pairs: Vec<(BlockHash, Root)> = match &request {
            ConfirmReq::Block(block) => vec![(block.hash(), block.root())],
            ConfirmReq::Roots(roots) => roots.clone(),
        };
        for (hash, _root) in pairs {
            // Serve cached votes without recomputing.
            let cached = self.votes_cache.find(&hash);
            if !cached.is_empty() {
                for vote in cached {
                    self.outbound.send(
                        from,
                        &Message::ConfirmAck(ConfirmAck {
                            vote: (*vote).clone(),
                        }),
                    );
                }
                continue;
            }
            // A local representative can produce a fresh vote for blocks
            // we already cemented or hold.
            if self.vote_generator.has_representatives() {
                let known = self
                    .ledger
                    .store
                    .tx_begin_read()
                    .and_then(|txn| self.ledger.store.blocks.exists(&txn, &hash))
                    .unwrap_or(false);
                if known {
                    self.vote_generator.add(hash);
                }
            }
        }
        if let ConfirmReq::Block(block) = request {
            // The request doubles as block propagation.
            self.process_active(block);
        }
    }

    fn handle_handshake(self: &Arc<Self>, handshake: NodeIdHandshake, from: SocketAddrV6) {
        self.stats.inc("message", "node_id_handshake");
        let mut reply = NodeIdHandshake::default();
        if let Some(cookie) = handshake.query {
            reply.response = Some((
                self.node_id.account(),
                sign_message(&cookie, &self.node_id.private),
            ));
        }
        if let Some((account, signature)) = handshake.response {
            if self.syn_cookies.validate(from, &account, &signature) {
                self.peer_manager.set_node_id(&from, account);
            } else {
                self.stats.inc("handshake", "bad_response");
            }
        }
        if reply.response.is_some() {
            if let Some(cookie) = self.syn_cookies.assign(from) {
                reply.query = Some(cookie);
            }
            self.outbound.send(from, &Message::NodeIdHandshake(reply));
        }
    }

    // ── Periodic maintenance ────────────────────────────────────────────

    fn ongoing_online_weight_sample(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = Duration::from_secs(self.params.node.weight_period_s);
        self.alarm.add(period, move || {
            if let Some(node) = weak.upgrade() {
                node.online_reps.sample();
                node.ongoing_online_weight_sample();
            }
        });
    }

    fn ongoing_peer_cleanup(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = Duration::from_secs(self.params.network.cleanup_period_s);
        self.alarm.add(period, move || {
            let Some(node) = weak.upgrade() else {
                return;
            };
            let cutoff = Duration::from_secs(node.params.network.idle_timeout_s);
            let removed = node.peer_manager.purge(cutoff);
            if !removed.is_empty() {
                debug!(count = removed.len(), "purged silent peers");
            }
            node.syn_cookies.purge();
            node.persist_peers();
            node.ongoing_peer_cleanup();
        });
    }

    fn persist_peers(&self) {
        let result = (|| -> Result<(), lattice_store::StoreError> {
            let mut txn = self.ledger.store.tx_begin_write()?;
            self.ledger.store.peers.clear(&mut txn)?;
            for peer in self.peer_manager.list() {
                self.ledger.store.peers.put(&mut txn, &peer.endpoint)?;
            }
            txn.commit()
        })();
        if let Err(error) = result {
            warn!(%error, "failed to persist peers");
        }
    }

    fn ongoing_unchecked_cleanup(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = Duration::from_secs(self.params.network.cleanup_period_s * 10);
        self.alarm.add(period, move || {
            let Some(node) = weak.upgrade() else {
                return;
            };
            let cutoff = node.params.node.unchecked_cleaning_cutoff_s;
            if let Err(error) = node.block_processor.cleanup_unchecked(cutoff) {
                warn!(%error, "unchecked cleanup failed");
            }
            node.ongoing_unchecked_cleanup();
        });
    }

    fn ongoing_rep_crawl(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = Duration::from_secs(self.params.network.keepalive_period_s);
        self.alarm.add(period, move || {
            let Some(node) = weak.upgrade() else {
                return;
            };
            if let Some((hash, root)) = node.rep_crawler.probe_target() {
                node.rep_crawler.add_probe(hash);
                let message = Message::ConfirmReq(ConfirmReq::Roots(vec![(hash, root)]));
                let sample = node.peer_manager.random_sample(8);
                node.outbound.send_to_many(&sample, &message);
            }
            node.ongoing_rep_crawl();
        });
    }
}

// ── Observer routers ───────────────────────────────────────────────────

struct ProcessorRouter {
    node: Weak<Node>,
}

impl BlockProcessorListener for ProcessorRouter {
    fn block_processed(&self, result: &ProcessReturn, block: &Block) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        match result.code {
            ProcessResult::Progress => {
                let hash = block.hash();
                let root = block.root();
                if node.active.recently_confirmed(&block.qualified_root()) {
                    // A forced election winner landing after its quorum:
                    // cement it instead of re-electing.
                    node.confirmation_height.add(hash);
                    return;
                }
                node.active.start(block.clone());
                // Flood to a random subset of peers.
                let fanout = node.peer_manager.fanout();
                node.outbound.send_to_many(
                    &fanout,
                    &Message::Publish(Publish {
                        block: block.clone(),
                    }),
                );
                if node.vote_generator.has_representatives() {
                    node.vote_generator.add(hash);
                }
                // If the election drew no requests shortly, nudge it.
                let weak = Arc::downgrade(&node);
                node.alarm.add(DELAYED_CONFIRM_REQ, move || {
                    let Some(node) = weak.upgrade() else {
                        return;
                    };
                    if node.active.active_block(&hash) {
                        let reps: Vec<SocketAddrV6> = node
                            .rep_crawler
                            .sample(CONFIRM_REQ_REP_SAMPLE)
                            .into_iter()
                            .map(|rep| rep.endpoint)
                            .collect();
                        let message = Message::ConfirmReq(ConfirmReq::Roots(vec![(hash, root)]));
                        node.outbound.send_to_many(&reps, &message);
                    }
                });
            }
            ProcessResult::Fork => {
                node.stats.inc("ledger", "fork_observed");
                // Make sure both sides are candidates and ask the reps.
                let forked = node
                    .ledger
                    .store
                    .tx_begin_read()
                    .ok()
                    .and_then(|txn| node.ledger.forked_block(&txn, block).ok().flatten());
                if let Some(existing) = forked {
                    node.active.start(existing);
                }
                node.active.publish(block.clone());
                let reps: Vec<SocketAddrV6> = node
                    .rep_crawler
                    .sample(CONFIRM_REQ_REP_SAMPLE)
                    .into_iter()
                    .map(|rep| rep.endpoint)
                    .collect();
                let message =
                    Message::ConfirmReq(ConfirmReq::Roots(vec![(block.hash(), block.root())]));
                node.outbound.send_to_many(&reps, &message);
            }
            ProcessResult::Old => {
                // A duplicate may still carry higher work.
                node.active.update_difficulty(block);
            }
            _ => {}
        }
    }
}

struct ElectionRouter {
    node: Weak<Node>,
}

impl ElectionObserver for ElectionRouter {
    fn election_confirmed(&self, status: &ElectionStatus) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let hash = status.winner.hash();
        let in_ledger = node
            .ledger
            .store
            .tx_begin_read()
            .and_then(|txn| node.ledger.store.blocks.exists(&txn, &hash))
            .unwrap_or(false);
        if in_ledger {
            node.confirmation_height.add(hash);
        } else {
            // The winner lost the earlier commit race: force it in,
            // rolling back the competing subtree. Cementing resumes once
            // the forced commit lands (see the progress route).
            node.block_processor.force(status.winner.clone());
        }
    }
}

struct CementRouter {
    node: Weak<Node>,
}

impl CementObserver for CementRouter {
    fn cemented(&self, span: &CementedSpan) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        for hash in &span.hashes {
            if node.active.active_block(hash) {
                node.stats.inc("confirmation", "active_confirmation_height");
                node.active.confirm_block(hash);
            } else {
                node.stats
                    .inc("confirmation", "inactive_confirmation_height");
            }
        }
    }
}

struct NetworkBroadcaster {
    node: Weak<Node>,
}

impl ConfirmReqBroadcaster for NetworkBroadcaster {
    fn broadcast_confirm_req(&self, requests: &[(BlockHash, Root)]) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let reps: Vec<SocketAddrV6> = node
            .rep_crawler
            .sample(CONFIRM_REQ_REP_SAMPLE)
            .into_iter()
            .map(|rep| rep.endpoint)
            .collect();
        let targets = if reps.is_empty() {
            node.peer_manager.fanout()
        } else {
            reps
        };
        let message = Message::ConfirmReq(ConfirmReq::Roots(requests.to_vec()));
        node.outbound.send_to_many(&targets, &message);
        node.stats.inc("message_out", "confirm_req");
    }

    fn flood_block(&self, block: &Block) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let fanout = node.peer_manager.fanout();
        node.outbound.send_to_many(
            &fanout,
            &Message::Publish(Publish {
                block: block.clone(),
            }),
        );
    }
}

struct GeneratedVoteRouter {
    node: Weak<Node>,
}

impl VoteSink for GeneratedVoteRouter {
    fn vote_generated(&self, vote: Arc<Vote>) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        node.votes_cache.add(&vote);
        node.active.vote(&vote);
        let fanout = node.peer_manager.fanout();
        node.outbound.send_to_many(
            &fanout,
            &Message::ConfirmAck(ConfirmAck {
                vote: (*vote).clone(),
            }),
        );
        node.stats.inc("message_out", "confirm_ack");
    }
}
