//! Economic actors and the economic decision engine (§4.7).
//!
//! The ladder mirrors the pool engine's in spirit but the governing spec's
//! closed reason set gives economic actors only `ideology_hold`,
//! `inertia_hold`, and `price_signal` (plus `forced_loss_pct`/`expiry`) —
//! there is no actor-side `no_advantage` tag. `InertiaHold` therefore
//! covers two distinct hold conditions here: the post-switch cooldown
//! window, and a price gap too small to justify switching. Both read the
//! same to a downstream consumer ("this actor considered switching and
//! didn't"); see DESIGN.md for why collapsing them was preferred over
//! inventing another reason tag outside the spec's closed set.

use crate::config::EconomicActorConfig;
use crate::types::{ActorId, ActorRole, DecisionReason, Fork, ForkPreference, SimTime};

#[derive(Clone, Debug)]
pub struct EconomicActor {
    pub id: ActorId,
    pub role: ActorRole,
    pub custody_btc: f64,
    pub daily_volume_btc: f64,
    pub fork_preference: ForkPreference,
    pub ideology_strength: f64,
    pub ideology_lock_threshold: f64,
    pub switching_threshold: f64,
    pub inertia: f64,
    pub max_loss_pct: f64,
    pub transaction_velocity: f64,
    pub current_fork: Fork,
    cooldown_until: SimTime,
    baseline_value_usd: Option<f64>,
}

impl EconomicActor {
    pub fn from_config(id: ActorId, cfg: &EconomicActorConfig, initial_fork: Fork) -> Self {
        Self {
            id,
            role: cfg.role,
            custody_btc: cfg.custody_btc,
            daily_volume_btc: cfg.daily_volume_btc,
            fork_preference: cfg.fork_preference,
            ideology_strength: cfg.ideology_strength,
            ideology_lock_threshold: cfg.ideology_lock_threshold,
            switching_threshold: cfg.switching_threshold,
            inertia: cfg.inertia,
            max_loss_pct: cfg.max_loss_pct,
            transaction_velocity: cfg.transaction_velocity,
            current_fork: initial_fork,
            cooldown_until: 0.0,
            baseline_value_usd: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ActorDecisionRecord {
    pub t: SimTime,
    pub actor_id: ActorId,
    pub from_fork: Fork,
    pub to_fork: Fork,
    pub reason: DecisionReason,
    pub price_ratio: f64,
}

pub struct EconomicDecisionEngine;

impl EconomicDecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// `price_current` / `price_alt` are the actor's current and
    /// alternative-fork prices for its custody; `inertia` is measured in
    /// the same simulated-seconds unit as `t`.
    pub fn evaluate(
        &self,
        actor: &mut EconomicActor,
        t: SimTime,
        price_current: f64,
        price_alt: f64,
    ) -> ActorDecisionRecord {
        let current = actor.current_fork;
        let alt = current.other();
        let price_ratio = if price_current > 0.0 { (price_alt - price_current) / price_current } else { 0.0 };

        let value_current = actor.custody_btc * price_current;
        let baseline = *actor.baseline_value_usd.get_or_insert(value_current);
        let loss_pct = if baseline.abs() > 1e-9 { ((baseline - value_current) / baseline.abs()).max(0.0) } else { 0.0 };
        let forced = actor.max_loss_pct > 0.0 && loss_pct >= actor.max_loss_pct;

        let (to_fork, reason) = if forced {
            (alt, DecisionReason::ForcedLossPct)
        } else if actor.ideology_strength >= actor.ideology_lock_threshold
            && actor.fork_preference.matches(current)
        {
            (current, DecisionReason::IdeologyHold)
        } else if t < actor.cooldown_until {
            (current, DecisionReason::InertiaHold)
        } else if price_ratio.abs() < actor.switching_threshold + actor.inertia {
            (current, DecisionReason::InertiaHold)
        } else if price_ratio > 0.0 {
            (alt, DecisionReason::PriceSignal)
        } else {
            (current, DecisionReason::InertiaHold)
        };

        if to_fork != current {
            actor.current_fork = to_fork;
            actor.cooldown_until = t + actor.inertia;
            actor.baseline_value_usd = Some(actor.custody_btc * price_alt);
        }

        ActorDecisionRecord { t, actor_id: actor.id.clone(), from_fork: current, to_fork, reason, price_ratio }
    }
}

impl Default for EconomicDecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}
