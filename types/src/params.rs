//! Network-constant protocol parameters.
//!
//! Everything here is fixed per network; operator-tunable values live in the
//! node configuration instead.

use crate::network::Network;

/// Wire and timing constants.
#[derive(Clone, Debug)]
pub struct NetworkConstants {
    pub network: Network,
    pub protocol_version: u8,
    pub protocol_version_min: u8,
    /// Pause between confirmation-request loop passes.
    pub request_interval_ms: u64,
    /// Peer table cleanup cadence; also throttles reach-out keepalives.
    pub cleanup_period_s: u64,
    /// Cutoff after which an idle realtime channel is dropped.
    pub idle_timeout_s: u64,
    pub tcp_io_timeout_s: u64,
    pub syn_cookie_cutoff_s: u64,
    pub keepalive_period_s: u64,
    /// Connections allowed from one IP address.
    pub max_peers_per_ip: usize,
}

/// Vote generation constants.
#[derive(Clone, Debug)]
pub struct VotingConstants {
    /// Bound on the votes-by-hash cache.
    pub max_cache: usize,
    /// How long generated hashes accumulate before a vote is flushed.
    pub generator_delay_ms: u64,
}

/// Bootstrap tuning constants.
#[derive(Clone, Debug)]
pub struct BootstrapConstants {
    pub frontier_retry_limit: u32,
    pub lazy_retry_limit: u32,
    /// Max blocks requested by one lazy bulk pull.
    pub lazy_max_pull_blocks: u64,
    /// Grace period before the throughput floor applies to a client.
    pub connection_warmup_time_s: u64,
    /// Minimum blocks/sec a client must sustain after warmup.
    pub minimum_blocks_per_sec: u64,
    /// Concurrent client connections per attempt.
    pub max_connections: usize,
    /// Remembered `(head, new_head)` advances across attempts.
    pub pulls_cache_size: usize,
}

/// Node-side consensus constants.
#[derive(Clone, Debug)]
pub struct NodeConstants {
    /// Online weight sampling period.
    pub weight_period_s: u64,
    /// Bound on stored online-weight samples (two weeks of live samples).
    pub max_weight_samples: u64,
    /// Completed election statuses retained.
    pub confirmation_history_size: usize,
    /// Delay before a gap with quorum-backed votes triggers bootstrap.
    pub gap_cache_bootstrap_start_delay_ms: u64,
    /// Cutoff for unchecked-table garbage collection.
    pub unchecked_cleaning_cutoff_s: u64,
}

/// All network-constant parameters, grouped.
#[derive(Clone, Debug)]
pub struct NetworkParams {
    pub network: NetworkConstants,
    pub voting: VotingConstants,
    pub bootstrap: BootstrapConstants,
    pub node: NodeConstants,
}

impl NetworkParams {
    pub fn new(network: Network) -> Self {
        let is_test = network.is_test();
        Self {
            network: NetworkConstants {
                network,
                protocol_version: 17,
                protocol_version_min: 13,
                request_interval_ms: if is_test { 20 } else { 16_000 },
                cleanup_period_s: if is_test { 1 } else { 60 },
                idle_timeout_s: if is_test { 15 } else { 120 },
                tcp_io_timeout_s: if is_test { 5 } else { 15 },
                syn_cookie_cutoff_s: 5,
                keepalive_period_s: 60,
                max_peers_per_ip: 10,
            },
            voting: VotingConstants {
                max_cache: if is_test { 4 } else { 16_384 },
                generator_delay_ms: if is_test { 10 } else { 500 },
            },
            bootstrap: BootstrapConstants {
                frontier_retry_limit: 16,
                lazy_retry_limit: if is_test { 2 } else { 64 },
                lazy_max_pull_blocks: 512,
                connection_warmup_time_s: 5,
                minimum_blocks_per_sec: 10,
                max_connections: 64,
                pulls_cache_size: 10_000,
            },
            node: NodeConstants {
                weight_period_s: 300,
                max_weight_samples: if is_test { 864 } else { 4032 },
                confirmation_history_size: 2048,
                gap_cache_bootstrap_start_delay_ms: if is_test { 5 } else { 5_000 },
                unchecked_cleaning_cutoff_s: if is_test { 120 } else { 3600 * 24 },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_is_faster() {
        let live = NetworkParams::new(Network::Live);
        let test = NetworkParams::new(Network::Test);
        assert!(test.network.request_interval_ms < live.network.request_interval_ms);
        assert!(
            test.node.gap_cache_bootstrap_start_delay_ms
                < live.node.gap_cache_bootstrap_start_delay_ms
        );
    }
}
