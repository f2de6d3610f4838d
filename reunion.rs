//! Reunion controller and UASF expiry timer (§4.8).
//!
//! Reunion is never forced by this controller: it only watches for natural
//! convergence (propagation, pool switches, and economic actors eventually
//! agreeing on one fork) within a budget. If the network is still split
//! when the budget elapses, that is reported as `SimError::ReunionTimeout`
//! rather than silently forced — a scenario author who enabled reunion
//! wanted to observe whether the network reunifies on its own, and a
//! silent forced merge would hide exactly that result. Forcing a merge is
//! available separately as `ChainStore::cross_link`, invoked directly by
//! the UASF expiry action `Reunion` below, which is allowed to force it by
//! name.

use crate::chain::ChainStore;
use crate::error::{SimError, SimResult};
use crate::types::{Fork, ReorgCause, SimTime, UasfExpiryAction};

#[derive(Debug)]
pub struct ReunionOutcome {
    pub triggered_at: SimTime,
    pub elapsed: SimTime,
}

pub struct ReunionController {
    enabled: bool,
    timeout: SimTime,
    pending_since: Option<SimTime>,
}

impl ReunionController {
    pub fn new(enabled: bool, timeout: SimTime) -> Self {
        Self { enabled, timeout, pending_since: None }
    }

    pub fn trigger(&mut self, t: SimTime) {
        if self.enabled && self.pending_since.is_none() {
            self.pending_since = Some(t);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Call once per tick while `is_pending()`. Returns `Ok(Some(..))` the
    /// moment the network naturally converges, `Ok(None)` while still
    /// waiting, and `Err(SimError::ReunionTimeout)` if the budget elapses
    /// first. Idempotent once resolved: a second call after resolution
    /// just returns `Ok(None)` since `pending_since` has been cleared.
    pub fn poll(&mut self, t: SimTime, chain: &ChainStore) -> SimResult<Option<ReunionOutcome>> {
        let since = match self.pending_since {
            Some(s) => s,
            None => return Ok(None),
        };
        let elapsed = t - since;

        if is_converged(chain) {
            self.pending_since = None;
            return Ok(Some(ReunionOutcome { triggered_at: since, elapsed }));
        }

        if elapsed >= self.timeout {
            let unconverged = count_unconverged(chain);
            self.pending_since = None;
            return Err(SimError::ReunionTimeout { elapsed, unconverged });
        }

        Ok(None)
    }
}

fn majority_fork(chain: &ChainStore) -> Fork {
    if chain.cumulative_work(Fork::V27) >= chain.cumulative_work(Fork::V26) {
        Fork::V27
    } else {
        Fork::V26
    }
}

fn is_converged(chain: &ChainStore) -> bool {
    count_unconverged(chain) == 0
}

fn count_unconverged(chain: &ChainStore) -> usize {
    let majority = majority_fork(chain);
    chain.nodes().filter(|n| n.tip_fork != majority).count()
}

/// Timer for the optional UASF activation deadline (§4.8). Fires exactly
/// once when simulated time crosses `duration`, carrying the configured
/// `UasfExpiryAction`.
pub struct UasfTimer {
    duration: Option<SimTime>,
    action: UasfExpiryAction,
    fired: bool,
}

impl UasfTimer {
    pub fn new(duration: Option<SimTime>, action: UasfExpiryAction) -> Self {
        Self { duration, action, fired: false }
    }

    pub fn poll(&mut self, t: SimTime) -> Option<UasfExpiryAction> {
        let duration = self.duration?;
        if self.fired || t < duration {
            return None;
        }
        self.fired = true;
        Some(self.action)
    }
}

/// Applies a fired `UasfExpiryAction::Reunion` immediately by forcing the
/// cross-link; `Accept` and `Continue` carry no chain-level effect here —
/// the scheduler records them on the terminal summary and, for `Accept`,
/// stops evaluating pool/economic switching thereafter.
pub fn force_reunion(chain: &mut ChainStore, t: SimTime) -> SimResult<usize> {
    let events = chain.cross_link(t)?;
    Ok(events.iter().filter(|e| e.cause == ReorgCause::Reunion).count())
}
