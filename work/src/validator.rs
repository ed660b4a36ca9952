//! Block work validation.

use crate::difficulty::work_value;
use crate::thresholds::WorkThresholds;
use lattice_types::{Block, BlockDetails};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkError {
    #[error("work {achieved:#018x} below threshold {required:#018x}")]
    Insufficient { achieved: u64, required: u64 },
}

/// Validate a block's work against the threshold for its details, returning
/// the achieved difficulty on success.
///
/// Callers that do not yet know the account's epoch pass details for the
/// lowest epoch and re-validate inside the ledger once the epoch is known.
pub fn work_validate(
    thresholds: &WorkThresholds,
    block: &Block,
    details: &BlockDetails,
) -> Result<u64, WorkError> {
    let achieved = work_value(&block.root(), block.work());
    let required = thresholds.threshold(details);
    if achieved >= required {
        Ok(achieved)
    } else {
        Err(WorkError::Insufficient { achieved, required })
    }
}
