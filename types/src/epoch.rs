//! Ledger epochs.
//!
//! An epoch is a ledger-wide version marker encoded in zero-amount state
//! blocks whose `link` equals a network-configured epoch link. Epoch bumps
//! migrate work thresholds and semantics without rewriting history.

use crate::account::Account;
use crate::hash::Link;

/// Ledger epoch of an account chain. Epochs are strictly sequential: an
/// account may only move from epoch N to epoch N+1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Epoch {
    #[default]
    Epoch0 = 0,
    Epoch1 = 1,
}

impl Epoch {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Epoch::Epoch0),
            1 => Some(Epoch::Epoch1),
            _ => None,
        }
    }

    /// The epoch an upgrade block on top of this epoch must carry.
    pub fn successor(self) -> Option<Epoch> {
        match self {
            Epoch::Epoch0 => Some(Epoch::Epoch1),
            Epoch::Epoch1 => None,
        }
    }
}

/// Registry of epoch links and their authorized signers.
#[derive(Clone, Debug, Default)]
pub struct Epochs {
    entries: Vec<EpochInfo>,
}

#[derive(Clone, Debug)]
struct EpochInfo {
    epoch: Epoch,
    link: Link,
    signer: Account,
}

impl Epochs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, epoch: Epoch, link: Link, signer: Account) {
        self.entries.push(EpochInfo {
            epoch,
            link,
            signer,
        });
    }

    /// Whether a state-block link designates any known epoch.
    pub fn is_epoch_link(&self, link: &Link) -> bool {
        self.entries.iter().any(|e| &e.link == link)
    }

    /// The epoch designated by a link, if any.
    pub fn epoch(&self, link: &Link) -> Option<Epoch> {
        self.entries.iter().find(|e| &e.link == link).map(|e| e.epoch)
    }

    /// The account authorized to sign upgrade blocks for an epoch.
    pub fn signer(&self, epoch: Epoch) -> Option<Account> {
        self.entries
            .iter()
            .find(|e| e.epoch == epoch)
            .map(|e| e.signer)
    }

    pub fn link(&self, epoch: Epoch) -> Option<Link> {
        self.entries
            .iter()
            .find(|e| e.epoch == epoch)
            .map(|e| e.link)
    }
}
