//! Per-epoch work thresholds.

use crate::difficulty::work_value;
use lattice_types::{BlockDetails, Epoch, Network, Root};

const LIVE_EPOCH_0: u64 = 0xFFFF_FFC0_0000_0000;
const LIVE_EPOCH_1: u64 = 0xFFFF_FFF8_0000_0000;
const BETA_EPOCH_0: u64 = 0xFFFF_FC00_0000_0000;
const BETA_EPOCH_1: u64 = 0xFFFF_FF00_0000_0000;
const TEST_THRESHOLD: u64 = 0xFF00_0000_0000_0000;

/// The effective work threshold as a function of the network and epoch.
///
/// A receive-specific override can relax the threshold for receive-subtype
/// blocks; by default the epoch publish value applies to every subtype.
#[derive(Clone, Debug)]
pub struct WorkThresholds {
    pub epoch_0: u64,
    pub epoch_1: u64,
    pub epoch_1_receive: Option<u64>,
}

impl WorkThresholds {
    pub fn new(network: Network) -> Self {
        match network {
            Network::Live => Self {
                epoch_0: LIVE_EPOCH_0,
                epoch_1: LIVE_EPOCH_1,
                epoch_1_receive: None,
            },
            Network::Beta => Self {
                epoch_0: BETA_EPOCH_0,
                epoch_1: BETA_EPOCH_1,
                epoch_1_receive: None,
            },
            Network::Test => Self {
                epoch_0: TEST_THRESHOLD,
                epoch_1: TEST_THRESHOLD,
                epoch_1_receive: None,
            },
        }
    }

    /// The publish threshold for an epoch.
    pub fn epoch_threshold(&self, epoch: Epoch) -> u64 {
        match epoch {
            Epoch::Epoch0 => self.epoch_0,
            Epoch::Epoch1 => self.epoch_1,
        }
    }

    /// The threshold a block with the given details must clear.
    pub fn threshold(&self, details: &BlockDetails) -> u64 {
        match (details.epoch, details.is_receive) {
            (Epoch::Epoch1, true) => self.epoch_1_receive.unwrap_or(self.epoch_1),
            (epoch, _) => self.epoch_threshold(epoch),
        }
    }

    /// The highest threshold any block could be required to clear; used
    /// when the epoch is not yet known (e.g. pre-ledger validation).
    pub fn max_threshold(&self) -> u64 {
        self.epoch_0.max(self.epoch_1)
    }

    /// The lowest acceptable threshold across epochs; blocks below this are
    /// rejected before any ledger lookup.
    pub fn min_threshold(&self) -> u64 {
        let mut min = self.epoch_0.min(self.epoch_1);
        if let Some(receive) = self.epoch_1_receive {
            min = min.min(receive);
        }
        min
    }

    /// Whether `work` clears the threshold for `details` against `root`.
    pub fn is_valid(&self, root: &Root, work: u64, details: &BlockDetails) -> bool {
        work_value(root, work) >= self.threshold(details)
    }
}
