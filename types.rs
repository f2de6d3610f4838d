//! Shared enumerations, identifiers, and small value types used across every
//! module: forks, decision reasons, and the entity/role taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two competing rule-sets. The source represents this as a
/// free-form symbol; per the design notes ("dynamic typing") this is pinned
/// to a bounded enum so an unknown fork name is rejected at config-parse
/// time instead of silently drifting through the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fork {
    V27,
    V26,
}

impl Fork {
    pub const ALL: [Fork; 2] = [Fork::V27, Fork::V26];

    /// The other fork.
    pub fn other(self) -> Fork {
        match self {
            Fork::V27 => Fork::V26,
            Fork::V26 => Fork::V27,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Fork::V27 => "v27",
            Fork::V26 => "v26",
        }
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pool's or actor's stance toward the two forks. `Neutral` agents have no
/// preferred side and are driven purely by profitability / price.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkPreference {
    V27,
    V26,
    Neutral,
}

impl ForkPreference {
    /// The preference expressed as a concrete fork, if any.
    pub fn as_fork(self) -> Option<Fork> {
        match self {
            ForkPreference::V27 => Some(Fork::V27),
            ForkPreference::V26 => Some(Fork::V26),
            ForkPreference::Neutral => None,
        }
    }

    pub fn matches(self, fork: Fork) -> bool {
        self.as_fork() == Some(fork)
    }
}

/// Economic actor role. Used to default config fields and label output;
/// decisions are driven by the actor's own attributes, not directly by role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    MajorExchange,
    Exchange,
    PaymentProcessor,
    Merchant,
    Institutional,
    PowerUser,
    CasualUser,
    MiningPoolTreasury,
}

/// Reason a pool or economic actor held or switched forks in a decision
/// round. Section 3 of the governing spec names a closed set of tags;
/// `NoAdvantage` is added to cover the "stay, gap below threshold" case the
/// pool engine's rule order names explicitly but the closed list omits —
/// see DESIGN.md for the reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Initial,
    NoAdvantage,
    IdeologyHold,
    ProfitSwitch,
    ForcedLossPct,
    ForcedLossUsd,
    InertiaHold,
    PriceSignal,
    Expiry,
}

impl DecisionReason {
    /// Whether this reason corresponds to an actual fork switch (as opposed
    /// to holding the current fork for the round).
    pub fn is_switch(self) -> bool {
        matches!(
            self,
            DecisionReason::ProfitSwitch
                | DecisionReason::ForcedLossPct
                | DecisionReason::ForcedLossUsd
                | DecisionReason::PriceSignal
                | DecisionReason::Expiry
        )
    }
}

/// What happens when a UASF timer expires without prior convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UasfExpiryAction {
    Reunion,
    Accept,
    Continue,
}

/// Why a reorg happened, recorded on the `ReorgEvent` for the terminal
/// summary's consensus-stress breakdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorgCause {
    /// A pool switched mining fork and its node(s) followed.
    PoolSwitch,
    /// A heavier foreign block was adopted (non-contentious acceptance).
    ForeignAcceptance,
    /// Reunion cross-link resolved the loser to the winner's tip.
    Reunion,
}

pub type PoolId = String;
pub type ActorId = String;
pub type NodeId = String;

/// Simulated wall-clock seconds since scenario start.
pub type SimTime = f64;
