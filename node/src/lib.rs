//! The lattice full-node core.
//!
//! Wires the ledger, the block and vote pipelines, the election engine,
//! the confirmation-height processor, and bootstrap into one [`Node`]
//! aggregate with an ordered lifecycle. Socket I/O, RPC, and wallets live
//! outside this crate and talk to it through the ingestion entry points.

pub mod alarm;
pub mod block_processor;
pub mod bootstrap;
pub mod bootstrap_server;
pub mod config;
pub mod confirmation_height;
pub mod error;
pub mod gap_cache;
pub mod node;
pub mod voting;

pub use alarm::Alarm;
pub use block_processor::{BlockProcessor, BlockProcessorConfig, BlockProcessorListener};
pub use bootstrap::{
    BootstrapClient, BootstrapError, BootstrapInitiator, ClientFactory, PullInfo,
};
pub use bootstrap_server::BootstrapServer;
pub use config::NodeConfig;
pub use confirmation_height::{
    CementObserver, CementedSpan, ConfirmationHeightProcessor, BATCH_READ_SIZE, BATCH_WRITE_SIZE,
};
pub use error::NodeError;
pub use gap_cache::GapCache;
pub use node::Node;
pub use voting::{VoteGenerator, VoteSink};
