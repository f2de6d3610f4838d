//! Price oracle (§4.4): each fork's price is the shared base price scaled
//! by a weighted blend of economic share, hashrate share, fee pressure,
//! and manipulation cost share, plus a slow drift term.
//!
//! Oracle coupling is deliberate: the fee-pressure and manipulation-share
//! inputs read the fee oracle's *previous* update interval, never the one
//! just computed. Without that lag, price and fee updates in the same tick
//! would form a same-interval feedback loop whose fixed point depends on
//! floating-point evaluation order rather than the scenario's inputs,
//! which would break run-to-run determinism across platforms.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::FeePriceConfig;
use crate::fee::FeeOracle;
use crate::types::{Fork, SimTime};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceRecord {
    pub t: SimTime,
    pub price_v27: f64,
    pub price_v26: f64,
    pub economic_share_v27: f64,
    pub hashrate_share_v27: f64,
    pub fee_pressure_v27: f64,
    pub fee_pressure_v26: f64,
    pub manipulation_share_v27: f64,
    pub manipulation_share_v26: f64,
}

pub struct PriceOracle {
    base_price_usd: f64,
    econ_weight: f64,
    hash_weight: f64,
    fee_weight: f64,
    manipulation_weight: f64,
    drift: f64,
    // Fee-oracle readings from the previous update, applied this round.
    lagged_fee_pressure: HashMap<Fork, f64>,
    lagged_manipulation_share: HashMap<Fork, f64>,
    history: Vec<PriceRecord>,
}

impl PriceOracle {
    pub fn new(config: &FeePriceConfig) -> Self {
        let mut lagged_fee_pressure = HashMap::new();
        let mut lagged_manipulation_share = HashMap::new();
        for fork in Fork::ALL {
            lagged_fee_pressure.insert(fork, 0.0);
            lagged_manipulation_share.insert(fork, 0.0);
        }
        Self {
            base_price_usd: config.base_price_usd,
            econ_weight: config.econ_weight,
            hash_weight: config.hash_weight,
            fee_weight: config.fee_weight,
            manipulation_weight: config.manipulation_weight,
            drift: config.drift,
            lagged_fee_pressure,
            lagged_manipulation_share,
            history: Vec::new(),
        }
    }

    fn weighted_factor(&self, fork: Fork, economic_share: f64, hashrate_share: f64) -> f64 {
        let fee = self.lagged_fee_pressure[&fork];
        let manipulation = self.lagged_manipulation_share[&fork];
        // Centered on a 2x share (0.5 -> neutral multiplier of 1.0) so that
        // an evenly split fork pair starts at base_price_usd on both sides.
        let econ_term = 2.0 * economic_share;
        let hash_term = 2.0 * hashrate_share;
        self.econ_weight * econ_term
            + self.hash_weight * hash_term
            + self.fee_weight * (1.0 + fee)
            + self.manipulation_weight * (1.0 + manipulation)
    }

    /// Compute and record the next `PriceRecord`, then latch this update's
    /// fee-oracle readings for the *next* call to consume.
    pub fn update(
        &mut self,
        t: SimTime,
        economic_share_v27: f64,
        hashrate_share_v27: f64,
        fee_oracle: &FeeOracle,
    ) -> PriceRecord {
        let economic_share_v27 = economic_share_v27.clamp(0.0, 1.0);
        let hashrate_share_v27 = hashrate_share_v27.clamp(0.0, 1.0);

        let factor_v27 = self.weighted_factor(Fork::V27, economic_share_v27, hashrate_share_v27);
        let factor_v26 =
            self.weighted_factor(Fork::V26, 1.0 - economic_share_v27, 1.0 - hashrate_share_v27);

        let drift_term = 1.0 + self.drift * t;
        let price_v27 = (self.base_price_usd * factor_v27 * drift_term).max(0.0);
        let price_v26 = (self.base_price_usd * factor_v26 * drift_term).max(0.0);

        let record = PriceRecord {
            t,
            price_v27,
            price_v26,
            economic_share_v27,
            hashrate_share_v27,
            fee_pressure_v27: self.lagged_fee_pressure[&Fork::V27],
            fee_pressure_v26: self.lagged_fee_pressure[&Fork::V26],
            manipulation_share_v27: self.lagged_manipulation_share[&Fork::V27],
            manipulation_share_v26: self.lagged_manipulation_share[&Fork::V26],
        };

        // Latch this interval's fee-oracle state for next update, not this
        // one: the lag is the point.
        for fork in Fork::ALL {
            self.lagged_fee_pressure.insert(fork, fee_oracle.fee_pressure(fork));
            self.lagged_manipulation_share.insert(fork, fee_oracle.manipulation_cost_share(fork));
        }

        self.history.push(record.clone());
        record
    }

    pub fn history(&self) -> &[PriceRecord] {
        &self.history
    }

    pub fn prices(&self) -> HashMap<Fork, f64> {
        let mut m = HashMap::new();
        if let Some(last) = self.history.last() {
            m.insert(Fork::V27, last.price_v27);
            m.insert(Fork::V26, last.price_v26);
        } else {
            m.insert(Fork::V27, self.base_price_usd);
            m.insert(Fork::V26, self.base_price_usd);
        }
        m
    }
}
