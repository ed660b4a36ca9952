//! Trended online voting weight.
//!
//! Accounts whose votes we observe count as online. Every weight period the
//! summed stake of recently seen representatives is written to the
//! `online_weight` table; the quorum delta derives from the median of those
//! samples, floored by the configured minimum.

use lattice_ledger::Ledger;
use lattice_types::{Account, Amount};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct OnlineState {
    /// Representative → last time a vote from them was observed.
    online: HashMap<Account, Instant>,
    trended: Amount,
}

pub struct OnlineReps {
    ledger: Arc<Ledger>,
    /// Floor under the trended weight.
    minimum: Amount,
    /// Quorum requirement as a percentage of online weight.
    quorum_percent: u8,
    /// Observation window; also the sampling period.
    weight_period: Duration,
    max_samples: u64,
    state: Mutex<OnlineState>,
}

impl OnlineReps {
    pub fn new(
        ledger: Arc<Ledger>,
        minimum: Amount,
        quorum_percent: u8,
        weight_period: Duration,
        max_samples: u64,
    ) -> Self {
        let trended = Self::compute_trend(&ledger).unwrap_or(Amount::ZERO);
        Self {
            ledger,
            minimum,
            quorum_percent,
            weight_period,
            max_samples,
            state: Mutex::new(OnlineState {
                online: HashMap::new(),
                trended,
            }),
        }
    }

    /// Record that a representative's vote was observed.
    pub fn observe(&self, representative: &Account) {
        if self.ledger.weight(representative).is_zero() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.online.insert(*representative, Instant::now());
    }

    /// Sum of stake behind representatives seen within the weight period,
    /// floored by the configured minimum.
    pub fn online_stake(&self) -> Amount {
        let state = self.state.lock().unwrap();
        self.online_stake_locked(&state).max(self.minimum)
    }

    fn online_stake_locked(&self, state: &OnlineState) -> Amount {
        let cutoff = Instant::now() - self.weight_period;
        state
            .online
            .iter()
            .filter(|(_, seen)| **seen >= cutoff)
            .map(|(rep, _)| self.ledger.weight(rep))
            .sum()
    }

    /// The configured floor under the online weight.
    pub fn minimum(&self) -> Amount {
        self.minimum
    }

    /// The trended online weight: median of stored samples, floored by the
    /// minimum.
    pub fn trended(&self) -> Amount {
        self.state.lock().unwrap().trended.max(self.minimum)
    }

    /// Weight a winning tally must reach for quorum.
    pub fn delta(&self) -> Amount {
        let trend = self.trended().number();
        Amount::raw(trend / 100 * self.quorum_percent as u128)
    }

    /// Take a sample: prune stale observations, persist the current online
    /// stake, trim the table, and refresh the trend. Called on the weight
    /// period by the owning node.
    pub fn sample(&self) {
        let stake = {
            let mut state = self.state.lock().unwrap();
            let cutoff = Instant::now() - self.weight_period;
            state.online.retain(|_, seen| *seen >= cutoff);
            self.online_stake_locked(&state)
        };
        let result = (|| -> Result<(), lattice_store::StoreError> {
            let mut txn = self.ledger.store.tx_begin_write()?;
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            self.ledger.store.online_weight.put(&mut txn, timestamp, stake)?;
            self.ledger
                .store
                .online_weight
                .trim(&mut txn, self.max_samples)?;
            txn.commit()
        })();
        if let Err(error) = result {
            debug!(%error, "failed to persist online weight sample");
            return;
        }
        if let Some(trend) = Self::compute_trend(&self.ledger) {
            self.state.lock().unwrap().trended = trend;
        }
    }

    fn compute_trend(ledger: &Ledger) -> Option<Amount> {
        let txn = ledger.store.tx_begin_read().ok()?;
        let mut samples: Vec<Amount> = ledger
            .store
            .online_weight
            .iter(&txn)
            .ok()?
            .into_iter()
            .map(|(_, weight)| weight)
            .collect();
        if samples.is_empty() {
            return None;
        }
        samples.sort();
        Some(samples[samples.len() / 2])
    }
}
