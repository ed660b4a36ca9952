//! The block-lattice ledger: a pure function of store state.
//!
//! [`Ledger::process`] validates and commits candidate blocks into
//! per-account chains; [`Ledger::rollback`] undoes unconfirmed chain
//! segments during fork resolution. The representation weight index is
//! maintained incrementally on every commit and rollback.

pub mod error;
pub mod genesis;
pub mod ledger;
pub mod process;
pub mod rep_weights;
pub mod rollback;

pub use error::LedgerError;
pub use genesis::{genesis_block, LedgerConstants, EPOCH_1_LINK};
pub use ledger::Ledger;
pub use process::{ProcessResult, ProcessReturn, SignatureVerification};
pub use rep_weights::RepWeights;
