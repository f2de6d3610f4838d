//! Mining pools and the pool decision engine (§4.6).
//!
//! The ladder runs in the order the governing rules are listed:
//! `no_advantage` (the gap isn't worth acting on) first, then
//! `ideology_hold` (a pool on its preferred fork tolerates a larger gap,
//! scaled by its own `ideology_strength`), then `forced_loss` (the pool's
//! configured ceiling — cumulative opportunity cost or a raw gap too large
//! to excuse — has been breached regardless of ideology), and finally
//! `profit_switch` for everything else.
//!
//! `loss_gap` is always measured against `revenue_best`, the better of the
//! two forks' per-second revenue, not the pool's own current fork: a pool
//! already on the better fork sees `loss_gap` near zero and holds via
//! `no_advantage` rather than tripping any other rule.
//!
//! Whether the profitability figures fed into `evaluate` reflect the
//! network's *actual* current hashrate split or a pool's *assumed* (stale,
//! lookahead) view of it is deliberately left to the caller — see
//! `scheduler.rs`. Feeding pools a lagged hashrate assumption instead of
//! the live split is the mechanism that produces the sustained oscillation
//! the governing scenarios rely on; collapsing the two would remove it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::PoolEntryConfig;
use crate::fee::MinerProfitability;
use crate::types::{DecisionReason, Fork, ForkPreference, PoolId, SimTime};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub hashrate: f64,
    pub fork_preference: ForkPreference,
    pub ideology_strength: f64,
    pub profitability_threshold: f64,
    pub max_loss_pct: f64,
    pub max_loss_usd: f64,
    pub current_fork: Fork,
    /// Accumulated forgone revenue (vs. `revenue_best`) across rounds spent
    /// holding the current fork via `no_advantage`/`ideology_hold`. Compared
    /// against `max_loss_usd` to trip `forced_loss_usd`; reset on switch.
    pub cumulative_opportunity_cost_usd: f64,
    pub ideology_overrides: u64,
}

impl Pool {
    pub fn from_config(id: PoolId, cfg: &PoolEntryConfig, initial_fork: Fork) -> Self {
        Self {
            id,
            hashrate: cfg.hashrate,
            fork_preference: cfg.fork_preference,
            ideology_strength: cfg.ideology_strength,
            profitability_threshold: cfg.profitability_threshold,
            max_loss_pct: cfg.max_loss_pct,
            max_loss_usd: cfg.max_loss_usd,
            current_fork: initial_fork,
            cumulative_opportunity_cost_usd: 0.0,
            ideology_overrides: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolDecisionRecord {
    pub t: SimTime,
    pub pool_id: PoolId,
    pub from_fork: Fork,
    pub to_fork: Fork,
    pub reason: DecisionReason,
    pub profit_current_usd: f64,
    pub profit_alternative_usd: f64,
}

pub struct PoolDecisionEngine {
    enable_dynamic_switching: bool,
}

impl PoolDecisionEngine {
    pub fn new(enable_dynamic_switching: bool) -> Self {
        Self { enable_dynamic_switching }
    }

    pub fn evaluate(
        &self,
        pool: &mut Pool,
        t: SimTime,
        profit_by_fork: &HashMap<Fork, MinerProfitability>,
    ) -> PoolDecisionRecord {
        let current = pool.current_fork;
        let alt = current.other();
        let revenue_current = profit_by_fork[&current].revenue_usd;
        let revenue_alt = profit_by_fork[&alt].revenue_usd;
        let best = if revenue_alt > revenue_current { alt } else { current };
        let revenue_best = profit_by_fork[&best].revenue_usd;
        let loss_gap = if revenue_best.abs() > 1e-9 {
            ((revenue_best - revenue_current) / revenue_best).max(0.0)
        } else {
            0.0
        };

        let (to_fork, reason) = if !self.enable_dynamic_switching {
            (current, DecisionReason::NoAdvantage)
        } else if loss_gap <= pool.profitability_threshold {
            (current, DecisionReason::NoAdvantage)
        } else if pool.fork_preference.matches(current)
            && loss_gap <= pool.ideology_strength * pool.max_loss_pct
        {
            (current, DecisionReason::IdeologyHold)
        } else if (pool.max_loss_usd > 0.0 && pool.cumulative_opportunity_cost_usd >= pool.max_loss_usd)
            || (pool.max_loss_pct > 0.0 && loss_gap > pool.max_loss_pct)
        {
            let forced_reason = if pool.max_loss_pct > 0.0 && loss_gap > pool.max_loss_pct {
                DecisionReason::ForcedLossPct
            } else {
                DecisionReason::ForcedLossUsd
            };
            (alt, forced_reason)
        } else {
            (alt, DecisionReason::ProfitSwitch)
        };

        if reason == DecisionReason::IdeologyHold {
            pool.ideology_overrides += 1;
        }
        if to_fork == current && matches!(reason, DecisionReason::NoAdvantage | DecisionReason::IdeologyHold) {
            pool.cumulative_opportunity_cost_usd += (revenue_best - revenue_current).max(0.0);
        }
        if to_fork != current {
            pool.current_fork = to_fork;
            pool.cumulative_opportunity_cost_usd = 0.0;
        }

        PoolDecisionRecord {
            t,
            pool_id: pool.id.clone(),
            from_fork: current,
            to_fork,
            reason,
            profit_current_usd: revenue_current,
            profit_alternative_usd: revenue_alt,
        }
    }
}
