//! Difficulty oracle (§4.3): per-fork retargeting and per-tick block
//! probability, plus an optional emergency difficulty adjustment.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{Fork, SimTime};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DifficultyState {
    pub difficulty: f64,
    blocks_since_retarget: u64,
    last_retarget_time: SimTime,
    recent_block_times: Vec<SimTime>,
}

impl DifficultyState {
    pub fn new(initial_difficulty: f64) -> Self {
        Self {
            difficulty: initial_difficulty,
            blocks_since_retarget: 0,
            last_retarget_time: 0.0,
            recent_block_times: Vec::new(),
        }
    }
}

pub struct DifficultyOracleConfig {
    pub retarget_interval: u64,
    pub target_interval: f64,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
    pub enable_eda: bool,
    pub eda_window: usize,
    pub eda_multiple: f64,
    pub eda_step: f64,
}

impl Default for DifficultyOracleConfig {
    fn default() -> Self {
        Self {
            retarget_interval: 144,
            target_interval: 600.0,
            min_difficulty: 1.0 / 16.0,
            max_difficulty: 1.0e12,
            enable_eda: false,
            eda_window: 6,
            eda_multiple: 12.0,
            eda_step: 0.8,
        }
    }
}

pub struct DifficultyOracle {
    config: DifficultyOracleConfig,
    state: std::collections::HashMap<Fork, DifficultyState>,
}

impl DifficultyOracle {
    pub fn new(config: DifficultyOracleConfig, initial_difficulty: f64) -> Self {
        let mut state = std::collections::HashMap::new();
        for fork in Fork::ALL {
            state.insert(fork, DifficultyState::new(initial_difficulty));
        }
        Self { config, state }
    }

    pub fn difficulty(&self, fork: Fork) -> f64 {
        self.state[&fork].difficulty
    }

    /// Probability that `fork` produces a block in a tick of length
    /// `tick_dt`, given its current share of total nominal hashrate.
    /// At `D=1` and 100% hashrate the expected inter-block interval is
    /// `target_interval`, so the "total nominal rate" is `1/target_interval`.
    pub fn block_probability(&self, fork: Fork, tick_dt: f64, fork_hashrate_fraction: f64) -> f64 {
        let d = self.difficulty(fork);
        (tick_dt * fork_hashrate_fraction / self.config.target_interval / d).clamp(0.0, 1.0)
    }

    /// Bernoulli draw for whether `fork` mines a block this tick.
    pub fn roll_block(
        &self,
        fork: Fork,
        tick_dt: f64,
        fork_hashrate_fraction: f64,
        rng: &mut impl Rng,
    ) -> bool {
        let p = self.block_probability(fork, tick_dt, fork_hashrate_fraction);
        rng.gen_bool(p)
    }

    /// Record that `fork` produced a block at `timestamp`, retargeting if
    /// the interval has elapsed and applying EDA if enabled and triggered.
    pub fn record_block(&mut self, fork: Fork, timestamp: SimTime) {
        let state = self.state.get_mut(&fork).unwrap();
        state.blocks_since_retarget += 1;
        state.recent_block_times.push(timestamp);
        if state.recent_block_times.len() > self.config.eda_window.max(1) {
            state.recent_block_times.remove(0);
        }

        if self.config.enable_eda {
            if let Some(&oldest) = state.recent_block_times.first() {
                if state.recent_block_times.len() >= self.config.eda_window {
                    let observed = (timestamp - oldest) / (self.config.eda_window as f64 - 1.0).max(1.0);
                    if observed > self.config.eda_multiple * self.config.target_interval {
                        state.difficulty = (state.difficulty * self.config.eda_step)
                            .clamp(self.config.min_difficulty, self.config.max_difficulty);
                    }
                }
            }
        }

        if state.blocks_since_retarget >= self.config.retarget_interval {
            let observed_interval =
                (timestamp - state.last_retarget_time) / state.blocks_since_retarget as f64;
            let ratio = observed_interval / self.config.target_interval;
            state.difficulty =
                (state.difficulty * ratio).clamp(self.config.min_difficulty, self.config.max_difficulty);
            state.blocks_since_retarget = 0;
            state.last_retarget_time = timestamp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn difficulty_never_goes_non_positive() {
        let mut oracle = DifficultyOracle::new(DifficultyOracleConfig::default(), 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut t = 0.0;
        for _ in 0..2000 {
            t += 1.0;
            if oracle.roll_block(Fork::V27, 1.0, 0.1, &mut rng) {
                oracle.record_block(Fork::V27, t);
            }
            assert!(oracle.difficulty(Fork::V27) > 0.0);
        }
    }

    #[test]
    fn retarget_increases_difficulty_when_blocks_come_slow() {
        let config = DifficultyOracleConfig { retarget_interval: 10, ..Default::default() };
        let mut oracle = DifficultyOracle::new(config, 1.0);
        let before = oracle.difficulty(Fork::V27);
        // Blocks arriving much slower than target_interval (600s): retarget up.
        for i in 1..=10 {
            oracle.record_block(Fork::V27, i as f64 * 1200.0);
        }
        assert!(oracle.difficulty(Fork::V27) > before);
    }

    #[test]
    fn retarget_decreases_difficulty_when_blocks_come_fast() {
        let config = DifficultyOracleConfig { retarget_interval: 10, ..Default::default() };
        let mut oracle = DifficultyOracle::new(config, 1.0);
        let before = oracle.difficulty(Fork::V27);
        // Blocks arriving much faster than target_interval (600s): retarget down.
        for i in 1..=10 {
            oracle.record_block(Fork::V27, i as f64 * 10.0);
        }
        assert!(oracle.difficulty(Fork::V27) < before);
    }

    #[test]
    fn eda_steps_difficulty_down_when_blocks_stall() {
        let config = DifficultyOracleConfig {
            enable_eda: true,
            eda_window: 3,
            eda_multiple: 2.0,
            eda_step: 0.5,
            retarget_interval: 1_000_000,
            ..Default::default()
        };
        let mut oracle = DifficultyOracle::new(config, 1.0);
        oracle.record_block(Fork::V27, 0.0);
        oracle.record_block(Fork::V27, 5000.0);
        let before = oracle.difficulty(Fork::V27);
        oracle.record_block(Fork::V27, 10_000.0);
        assert!(oracle.difficulty(Fork::V27) < before);
    }
}
