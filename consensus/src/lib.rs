//! Consensus: elections over conflicting blocks, vote processing, and
//! representative tracking.
//!
//! An election exists per contested chain position (qualified root).
//! Representatives vote by block hash; a block confirms once its tallied
//! weight reaches the quorum delta derived from trended online weight.

pub mod active_elections;
pub mod election;
pub mod online_weight;
pub mod rep_crawler;
pub mod vote_cache;
pub mod vote_processor;

pub use active_elections::{
    ActiveConfig, ActiveTransactions, ConfirmReqBroadcaster, ElectionObserver,
};
pub use election::{Election, ElectionStatus, ElectionStatusType, VoteOutcome};
pub use online_weight::OnlineReps;
pub use rep_crawler::{RepCrawler, Representative};
pub use vote_cache::VotesCache;
pub use vote_processor::{VoteCode, VoteProcessor, VoteProcessorConfig};
