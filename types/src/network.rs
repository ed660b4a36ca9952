//! Network selection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which lattice network this node participates in. Selects magic bytes,
/// genesis, and work thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Live,
    Beta,
    Test,
}

impl Network {
    /// Two-byte message magic.
    pub fn magic(self) -> [u8; 2] {
        match self {
            Network::Live => *b"RC",
            Network::Beta => *b"RB",
            Network::Test => *b"RA",
        }
    }

    pub fn is_test(self) -> bool {
        self == Network::Test
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "live" => Some(Network::Live),
            "beta" => Some(Network::Beta),
            "test" => Some(Network::Test),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Live => "live",
            Network::Beta => "beta",
            Network::Test => "test",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes() {
        assert_eq!(Network::Live.magic(), *b"RC");
        assert_eq!(Network::Beta.magic(), *b"RB");
        assert_eq!(Network::Test.magic(), *b"RA");
    }

    #[test]
    fn parse() {
        assert_eq!(Network::from_str_opt("beta"), Some(Network::Beta));
        assert_eq!(Network::from_str_opt("mainnet"), None);
    }
}
