//! Proof-of-work validation.
//!
//! Every block carries a 64-bit nonce whose Blake2b digest against the
//! block's root must clear a network- and epoch-dependent threshold. This
//! crate validates; generation is an external concern, with a simple CPU
//! solver kept for tests and dev networks.

pub mod difficulty;
pub mod generator;
pub mod thresholds;
pub mod validator;

pub use difficulty::{from_multiplier, to_multiplier, work_value};
pub use generator::WorkGenerator;
pub use thresholds::WorkThresholds;
pub use validator::{work_validate, WorkError};
