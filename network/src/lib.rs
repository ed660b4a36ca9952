//! The node-facing surface of the network layer: the peer table, the
//! handshake cookie store, and the outbound message queue the socket layer
//! drains. Socket I/O itself lives outside the core.

pub mod outbound;
pub mod peer_manager;
pub mod syn_cookies;

pub use outbound::OutboundQueue;
pub use peer_manager::{Peer, PeerManager};
pub use syn_cookies::SynCookies;
