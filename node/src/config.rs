//! Node configuration with TOML file support and `key=value` overrides.

use crate::NodeError;
use serde::{Deserialize, Serialize};

/// Operator-tunable node settings. Network constants live in
/// `lattice_types::params` instead; anything here may differ per node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// P2P listening port.
    #[serde(default = "default_peering_port")]
    pub peering_port: u16,

    /// Bound on the live election set.
    #[serde(default = "default_active_elections_size")]
    pub active_elections_size: usize,

    /// Upper bound on one block-processor commit batch, in milliseconds.
    #[serde(default = "default_batch_max_time_ms")]
    pub block_processor_batch_max_time_ms: u64,

    /// Queue depth at which the block processor reports `full`.
    #[serde(default = "default_processor_full_size")]
    pub block_processor_full_size: usize,

    /// Floor under the trended online weight, in raw units (decimal
    /// string; the value exceeds what TOML integers can hold).
    #[serde(default = "default_online_weight_minimum")]
    pub online_weight_minimum: String,

    /// Quorum requirement as a percentage of online weight.
    #[serde(default = "default_online_weight_quorum")]
    pub online_weight_quorum: u8,

    /// Numerator of the legacy gap-cache bootstrap threshold
    /// (`online_stake / 256 × numerator`).
    #[serde(default = "default_bootstrap_fraction_numerator")]
    pub bootstrap_fraction_numerator: u32,

    /// Completed election statuses retained for inspection.
    #[serde(default = "default_confirmation_history_size")]
    pub confirmation_history_size: usize,

    /// Floor between confirmation-height write batches, in milliseconds.
    #[serde(default = "default_conf_height_batch_min_time_ms")]
    pub conf_height_batch_min_time_ms: u64,

    /// Disable lazy (pull-by-hash) bootstrap.
    #[serde(default)]
    pub disable_lazy_bootstrap: bool,

    /// Disable legacy (frontier-diff) bootstrap.
    #[serde(default)]
    pub disable_legacy_bootstrap: bool,

    /// Votes below this weight are not rebroadcast.
    #[serde(default = "default_vote_minimum")]
    pub vote_minimum: String,

    /// Log level filter: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON logs instead of human-readable ones.
    #[serde(default)]
    pub log_json: bool,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_peering_port() -> u16 {
    7075
}

fn default_active_elections_size() -> usize {
    50_000
}

fn default_batch_max_time_ms() -> u64 {
    5_000
}

fn default_processor_full_size() -> usize {
    65_536
}

fn default_online_weight_minimum() -> String {
    "60000000000000000000000000000000000".to_string()
}

fn default_online_weight_quorum() -> u8 {
    50
}

fn default_bootstrap_fraction_numerator() -> u32 {
    1
}

fn default_confirmation_history_size() -> usize {
    2048
}

fn default_conf_height_batch_min_time_ms() -> u64 {
    50
}

fn default_vote_minimum() -> String {
    "1000000000000000000000000000000000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, NodeError> {
        toml::from_str(content).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Apply a `key=value` override, as given on the command line. The key
    /// must name an existing option; the value is parsed as TOML.
    pub fn apply_override(&mut self, assignment: &str) -> Result<(), NodeError> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            NodeError::Config(format!("override `{assignment}` is not of the form key=value"))
        })?;
        let key = key.trim();
        let value = value.trim();

        let mut table: toml::Table = toml::Table::try_from(&*self)
            .map_err(|e| NodeError::Config(e.to_string()))?;
        if !table.contains_key(key) {
            return Err(NodeError::Config(format!("unknown config key `{key}`")));
        }
        // Values parse as TOML; bare words fall back to strings so
        // `--config log_level=debug` needs no quoting.
        let parsed: toml::Value = match format!("value = {value}").parse::<toml::Table>() {
            Ok(mut parsed) => parsed
                .remove("value")
                .expect("parsed assignment contains the key"),
            Err(_) => toml::Value::String(value.to_string()),
        };
        table.insert(key.to_string(), parsed);
        *self = table
            .try_into()
            .map_err(|e: toml::de::Error| {
                NodeError::Config(format!("invalid value for `{key}`: {e}"))
            })?;
        Ok(())
    }

    pub fn online_weight_minimum_raw(&self) -> Result<u128, NodeError> {
        self.online_weight_minimum.parse().map_err(|_| {
            NodeError::Config("online_weight_minimum is not a decimal amount".to_string())
        })
    }

    pub fn vote_minimum_raw(&self) -> Result<u128, NodeError> {
        self.vote_minimum
            .parse()
            .map_err(|_| NodeError::Config("vote_minimum is not a decimal amount".to_string()))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config deserializes via defaults")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty() {
        let config = NodeConfig::default();
        assert_eq!(config.online_weight_quorum, 50);
        assert_eq!(config.active_elections_size, 50_000);
        assert!(config.online_weight_minimum_raw().unwrap() > 0);
    }

    #[test]
    fn toml_round_trip() {
        let config = NodeConfig::default();
        let text = toml::to_string(&config).unwrap();
        let reparsed = NodeConfig::from_toml_str(&text).unwrap();
        assert_eq!(reparsed.peering_port, config.peering_port);
    }

    #[test]
    fn overrides_apply() {
        let mut config = NodeConfig::default();
        config.apply_override("online_weight_quorum=67").unwrap();
        assert_eq!(config.online_weight_quorum, 67);
        config
            .apply_override("online_weight_minimum=\"12345\"")
            .unwrap();
        assert_eq!(config.online_weight_minimum_raw().unwrap(), 12345);
    }

    #[test]
    fn unknown_key_is_named_in_the_error() {
        let mut config = NodeConfig::default();
        let error = config.apply_override("no_such_key=1").unwrap_err();
        assert!(error.to_string().contains("no_such_key"));
    }

    #[test]
    fn malformed_override_rejected() {
        let mut config = NodeConfig::default();
        assert!(config.apply_override("not-an-assignment").is_err());
        assert!(config.apply_override("online_weight_quorum=notanumber").is_err());
    }
}
