//! The peer table.
//!
//! Tracks live endpoints by last packet received, caps entries per IP,
//! selects random fanout sets for floods, and throttles keepalive
//! reach-outs to unknown endpoints.

use lattice_types::Account;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddrV6;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct Peer {
    pub endpoint: SocketAddrV6,
    pub last_packet_received: Instant,
    pub network_version: u8,
    pub node_id: Option<Account>,
}

struct PeerState {
    peers: HashMap<SocketAddrV6, Peer>,
    /// Endpoint → last reach-out attempt, for throttling.
    attempts: HashMap<SocketAddrV6, Instant>,
}

pub struct PeerManager {
    max_peers_per_ip: usize,
    state: Mutex<PeerState>,
}

impl PeerManager {
    pub fn new(max_peers_per_ip: usize) -> Self {
        Self {
            max_peers_per_ip,
            state: Mutex::new(PeerState {
                peers: HashMap::new(),
                attempts: HashMap::new(),
            }),
        }
    }

    /// Record a packet from `endpoint`. Returns false when the per-IP cap
    /// rejects a new entry.
    pub fn contacted(&self, endpoint: SocketAddrV6, network_version: u8) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(peer) = state.peers.get_mut(&endpoint) {
            peer.last_packet_received = Instant::now();
            peer.network_version = network_version;
            return true;
        }
        let same_ip = state
            .peers
            .keys()
            .filter(|existing| existing.ip() == endpoint.ip())
            .count();
        if same_ip >= self.max_peers_per_ip {
            debug!(%endpoint, "per-IP peer cap reached");
            return false;
        }
        state.peers.insert(
            endpoint,
            Peer {
                endpoint,
                last_packet_received: Instant::now(),
                network_version,
                node_id: None,
            },
        );
        true
    }

    /// Attach a verified node identity to a peer after handshake.
    pub fn set_node_id(&self, endpoint: &SocketAddrV6, node_id: Account) {
        if let Some(peer) = self.state.lock().unwrap().peers.get_mut(endpoint) {
            peer.node_id = Some(node_id);
        }
    }

    /// Whether a reach-out to `endpoint` should be sent now. At most one
    /// attempt per endpoint per `window`; known peers are never reached out
    /// to.
    pub fn reachout(&self, endpoint: SocketAddrV6, window: Duration) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.peers.contains_key(&endpoint) {
            return false;
        }
        match state.attempts.get(&endpoint) {
            Some(last) if last.elapsed() < window => false,
            _ => {
                state.attempts.insert(endpoint, Instant::now());
                true
            }
        }
    }

    /// Drop peers silent since `cutoff` and stale reach-out attempts.
    /// Returns the removed endpoints.
    pub fn purge(&self, cutoff: Duration) -> Vec<SocketAddrV6> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let removed: Vec<SocketAddrV6> = state
            .peers
            .iter()
            .filter(|(_, peer)| now.duration_since(peer.last_packet_received) > cutoff)
            .map(|(endpoint, _)| *endpoint)
            .collect();
        for endpoint in &removed {
            state.peers.remove(endpoint);
        }
        state
            .attempts
            .retain(|_, attempted| now.duration_since(*attempted) <= cutoff);
        removed
    }

    /// √n random peers, the flood fanout.
    pub fn fanout(&self) -> Vec<SocketAddrV6> {
        let state = self.state.lock().unwrap();
        let count = (state.peers.len() as f64).sqrt().ceil() as usize;
        let mut endpoints: Vec<SocketAddrV6> = state.peers.keys().copied().collect();
        drop(state);
        endpoints.shuffle(&mut rand::thread_rng());
        endpoints.truncate(count.max(1).min(endpoints.len()));
        endpoints
    }

    /// Up to `count` random peers, e.g. for keepalive peer samples.
    pub fn random_sample(&self, count: usize) -> Vec<SocketAddrV6> {
        let state = self.state.lock().unwrap();
        let mut endpoints: Vec<SocketAddrV6> = state.peers.keys().copied().collect();
        drop(state);
        endpoints.shuffle(&mut rand::thread_rng());
        endpoints.truncate(count);
        endpoints
    }

    pub fn list(&self) -> Vec<Peer> {
        self.state.lock().unwrap().peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
