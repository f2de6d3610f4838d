//! The clock and scheduler (§4.1, §5): a single-threaded, tick-driven
//! event loop with one seeded PRNG shared across every stochastic draw in
//! the run, so that a given seed reproduces byte-identical output.
//!
//! Per tick, in this fixed order: block attempts, propagation, oracle
//! updates (on their own cadences), pool decisions, economic decisions,
//! reunion/UASF polling, then metrics snapshot. Holding this order fixed
//! regardless of which phases happen to be due on a given tick is what
//! makes two runs with the same seed and config produce the same event
//! sequence.
//!
//! The "assumed vs actual hashrate" lookahead the pool engine's design
//! note calls out falls out of the difficulty oracle's own retarget
//! cadence: a fork's difficulty (and therefore the marginal profitability
//! pools compare) only updates at fork-specific retarget boundaries, while
//! the actual hashrate split can move every pool-decision round. No
//! separate lagging mechanism is layered on top; the existing retarget lag
//! already supplies it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::chain::{ChainStore, Node};
use crate::config::{EconomicConfig, FeePriceConfig, NetworkConfig, PoolsConfig, ScenarioParams};
use crate::difficulty::{DifficultyOracle, DifficultyOracleConfig};
use crate::economic::{EconomicActor, EconomicDecisionEngine};
use crate::error::{SimError, SimResult};
use crate::fee::{calculate_miner_profitability, FeeOracle, PortfolioBook};
use crate::metrics::{MetricsAggregator, Snapshot, TerminalSummary};
use crate::pools::{Pool, PoolDecisionEngine};
use crate::price::PriceOracle;
use crate::reunion::{force_reunion, ReunionController, UasfTimer};
use crate::types::{ActorRole, Fork, SimTime};

/// Safety net for runaway configurations, not part of the named CLI
/// surface: if wall-clock time exceeds this while simulated time has not
/// reached `duration`, the run aborts rather than spinning forever.
const MAX_WALL_CLOCK: Duration = Duration::from_secs(600);

pub struct Scenario {
    params: ScenarioParams,
    chain: ChainStore,
    difficulty: DifficultyOracle,
    fee: FeeOracle,
    price: PriceOracle,
    portfolios: PortfolioBook,
    pools: Vec<Pool>,
    pool_engine: PoolDecisionEngine,
    actors: Vec<EconomicActor>,
    actor_engine: EconomicDecisionEngine,
    reunion: ReunionController,
    uasf: UasfTimer,
    metrics: MetricsAggregator,
    rng: ChaCha8Rng,

    next_pool_decision_t: SimTime,
    next_economic_decision_t: SimTime,
    next_price_update_t: SimTime,
    next_snapshot_t: SimTime,
    next_manipulation_t: SimTime,
    last_block_time: HashMap<Fork, SimTime>,
    blocks_since_fee_update: HashMap<Fork, u64>,
    block_interval_accum: HashMap<Fork, f64>,
    miner_subsidy_btc: f64,
    miner_hashrate_cost_usd: f64,
}

impl Scenario {
    pub fn new(
        params: ScenarioParams,
        pools_cfg: &PoolsConfig,
        economic_cfg: &EconomicConfig,
        feeprice_cfg: &FeePriceConfig,
        network_cfg: &NetworkConfig,
    ) -> SimResult<Self> {
        pools_cfg.validate()?;
        economic_cfg.validate()?;
        feeprice_cfg.validate()?;
        network_cfg.validate(economic_cfg)?;

        let mut pool_ids: Vec<&String> = pools_cfg.pools.keys().collect();
        pool_ids.sort();
        let pools: Vec<Pool> = pool_ids
            .iter()
            .map(|id| {
                let cfg = &pools_cfg.pools[*id];
                let initial_fork = cfg.fork_preference.as_fork().unwrap_or(Fork::V27);
                Pool::from_config((*id).clone(), cfg, initial_fork)
            })
            .collect();

        let mut actor_ids: Vec<&String> = economic_cfg.actors.keys().collect();
        actor_ids.sort();
        let actors: Vec<EconomicActor> = actor_ids
            .iter()
            .map(|id| {
                let cfg = &economic_cfg.actors[*id];
                let initial_fork = cfg.fork_preference.as_fork().unwrap_or(Fork::V27);
                EconomicActor::from_config((*id).clone(), cfg, initial_fork)
            })
            .collect();

        let mut chain = ChainStore::new();
        let mut node_ids: Vec<&crate::config::NodeConfig> = network_cfg.nodes.iter().collect();
        node_ids.sort_by(|a, b| a.id.cmp(&b.id));
        for n in node_ids {
            chain.add_node(Node {
                id: n.id.clone(),
                home_partition: n.partition,
                accepts_foreign_blocks: n.accepts_foreign_blocks,
                fork_preference: n.fork_preference,
                peers: n.peers.clone(),
                tip_fork: n.partition,
                tip_height: 0,
                orphans: Vec::new(),
            });
        }

        let difficulty_config = DifficultyOracleConfig {
            retarget_interval: params.retarget_interval,
            target_interval: params.block_interval_target,
            min_difficulty: params.min_difficulty,
            enable_eda: params.enable_eda,
            ..Default::default()
        };
        let difficulty = DifficultyOracle::new(difficulty_config, 1.0);
        let fee = FeeOracle::new(feeprice_cfg);
        let price = PriceOracle::new(feeprice_cfg);

        let mut portfolios = PortfolioBook::new();
        for actor in &actors {
            if matches!(actor.role, ActorRole::MajorExchange | ActorRole::Exchange | ActorRole::Institutional)
                && actor.custody_btc > 0.0
            {
                portfolios.initialize_actor(actor.id.clone(), actor.custody_btc, feeprice_cfg.base_price_usd);
            }
        }

        let mut last_block_time = HashMap::new();
        let mut blocks_since_fee_update = HashMap::new();
        let mut block_interval_accum = HashMap::new();
        for fork in Fork::ALL {
            last_block_time.insert(fork, 0.0);
            blocks_since_fee_update.insert(fork, 0);
            block_interval_accum.insert(fork, 0.0);
        }

        Ok(Self {
            reunion: ReunionController::new(params.enable_reunion, params.reunion_timeout),
            uasf: UasfTimer::new(params.uasf_duration, params.uasf_expiry_action),
            metrics: MetricsAggregator::new(params.results_id.clone()),
            rng: ChaCha8Rng::seed_from_u64(params.randomseed),
            next_pool_decision_t: params.hashrate_update_interval,
            next_economic_decision_t: params.economic_update_interval,
            next_price_update_t: params.price_update_interval,
            next_snapshot_t: params.snapshot_interval,
            next_manipulation_t: params.manipulation_interval,
            last_block_time,
            blocks_since_fee_update,
            block_interval_accum,
            miner_subsidy_btc: feeprice_cfg.miner.block_subsidy_btc,
            miner_hashrate_cost_usd: feeprice_cfg.miner.hashrate_cost_usd,
            pool_engine: PoolDecisionEngine::new(params.enable_dynamic_switching),
            params,
            chain,
            difficulty,
            fee,
            price,
            portfolios,
            pools,
            actors,
            actor_engine: EconomicDecisionEngine::new(),
        })
    }

    fn hashrate_share_v27(&self) -> f64 {
        let total: f64 = self.pools.iter().map(|p| p.hashrate).sum();
        if total <= 0.0 {
            return self.params.initial_v27_hashrate;
        }
        self.pools.iter().filter(|p| p.current_fork == Fork::V27).map(|p| p.hashrate).sum::<f64>() / total
    }

    fn economic_share_v27(&self) -> f64 {
        let total: f64 = self.actors.iter().map(|a| a.custody_btc.max(1.0)).sum();
        if total <= 0.0 {
            return self.params.v27_economic;
        }
        self.actors
            .iter()
            .filter(|a| a.current_fork == Fork::V27)
            .map(|a| a.custody_btc.max(1.0))
            .sum::<f64>()
            / total
    }

    fn mine_tick(&mut self, t: SimTime) -> SimResult<()> {
        for fork in Fork::ALL {
            let share = if fork == Fork::V27 { self.hashrate_share_v27() } else { 1.0 - self.hashrate_share_v27() };
            if share <= 0.0 {
                continue;
            }
            if self.difficulty.roll_block(fork, self.params.tick_interval, share, &mut self.rng) {
                let producer = self.pick_producer(fork);
                let difficulty = self.difficulty.difficulty(fork);
                let block = self.chain.append_block(fork, producer, difficulty, t)?;
                let events = self.chain.propagate(&block)?;
                self.chain.stamp_last_n_reorgs(events.len(), t);

                self.difficulty.record_block(fork, t);
                self.fee.on_block_mined(fork);

                let last = *self.last_block_time.get(&fork).unwrap_or(&0.0);
                *self.block_interval_accum.get_mut(&fork).unwrap() += t - last;
                *self.blocks_since_fee_update.get_mut(&fork).unwrap() += 1;
                self.last_block_time.insert(fork, t);

                if self.params.enable_reorg_metrics {
                    for ev in &events {
                        debug!(fork = %ev.fork, depth = ev.depth, cause = ?ev.cause, "reorg");
                    }
                }
            }
        }
        Ok(())
    }

    fn pick_producer(&mut self, fork: Fork) -> String {
        let candidates: Vec<&Pool> = self.pools.iter().filter(|p| p.current_fork == fork).collect();
        if candidates.is_empty() {
            return "unattributed".to_string();
        }
        let total: f64 = candidates.iter().map(|p| p.hashrate).sum();
        let mut roll: f64 = rand::Rng::gen_range(&mut self.rng, 0.0..total.max(1e-9));
        for p in &candidates {
            if roll <= p.hashrate {
                return p.id.clone();
            }
            roll -= p.hashrate;
        }
        candidates.last().unwrap().id.clone()
    }

    fn update_oracles(&mut self, t: SimTime) {
        if t < self.next_price_update_t {
            return;
        }
        let economic_share = self.economic_share_v27();
        let hashrate_share = self.hashrate_share_v27();

        for fork in Fork::ALL {
            let blocks = *self.blocks_since_fee_update.get(&fork).unwrap_or(&0);
            let accum = *self.block_interval_accum.get(&fork).unwrap_or(&0.0);
            let observed_interval =
                if blocks > 0 { accum / blocks as f64 } else { self.params.block_interval_target };
            let activity_share = if fork == Fork::V27 { economic_share } else { 1.0 - economic_share };
            self.fee.update(fork, t, observed_interval, activity_share, activity_share);
            self.blocks_since_fee_update.insert(fork, 0);
            self.block_interval_accum.insert(fork, 0.0);
        }

        self.price.update(t, economic_share, hashrate_share, &self.fee);
        let prices = self.price.prices();
        self.portfolios.record_all_snapshots(t, &prices);

        self.next_price_update_t += self.params.price_update_interval;
    }

    /// Sustained fee-manipulation campaign (§4.5): on its own cadence, debit
    /// the configured actor's holdings on `manipulation_fork` to fund a fee
    /// premium there. A no-op unless `manipulation_actor`/`manipulation_fork`
    /// are both set and the campaign has a nonzero spend configured.
    fn run_manipulation_campaign(&mut self, t: SimTime) {
        if t < self.next_manipulation_t {
            return;
        }
        self.next_manipulation_t += self.params.manipulation_interval;

        let (Some(actor_id), Some(fork)) = (&self.params.manipulation_actor, self.params.manipulation_fork) else {
            return;
        };
        if self.params.manipulation_btc_per_block <= 0.0 || self.params.manipulation_blocks == 0 {
            return;
        }
        let Some(actor) = self.portfolios.get_mut(actor_id) else {
            warn!(actor = %actor_id, "manipulation campaign configured but actor has no tracked portfolio");
            return;
        };
        let btc_spent = self.params.manipulation_btc_per_block * self.params.manipulation_blocks as f64;
        let price = self.price.prices()[&fork];
        self.fee.apply_manipulation(fork, btc_spent, self.params.manipulation_blocks, actor, price);
        info!(actor = %actor_id, ?fork, btc_spent, t, "manipulation spend applied");
    }

    fn run_pool_decisions(&mut self, t: SimTime) -> SimResult<()> {
        if t < self.next_pool_decision_t {
            return Ok(());
        }
        let prices = self.price.prices();
        let mut profit_by_fork = HashMap::new();
        for fork in Fork::ALL {
            // Marginal profit per unit hashrate-second: how often a block
            // would be won at full nominal share, times its USD value,
            // minus the flat per-second hashrate cost. Difficulty (not
            // the live hashrate split) is what pools actually compare.
            let d = self.difficulty.difficulty(fork).max(1e-9);
            let blocks_per_second = 1.0 / (self.params.block_interval_target * d);
            let fees_btc = self.fee.effective_rate(fork);
            let price = prices[&fork];
            let per_block = calculate_miner_profitability(
                self.miner_subsidy_btc,
                fees_btc,
                price,
                self.miner_hashrate_cost_usd / blocks_per_second.max(1e-12),
            );
            profit_by_fork.insert(
                fork,
                crate::fee::MinerProfitability {
                    revenue_usd: per_block.revenue_usd * blocks_per_second,
                    profit_usd: per_block.profit_usd * blocks_per_second,
                    margin: per_block.margin,
                },
            );
        }

        // A pool switching fork changes which fork's hashrate share it
        // contributes to starting next mining tick; node-level reorgs
        // still flow only through `ChainStore::propagate`/`cross_link`,
        // since the network config doesn't pin specific nodes to specific
        // pools.
        for pool in &mut self.pools {
            let record = self.pool_engine.evaluate(pool, t, &profit_by_fork);
            self.metrics.record_pool_decision(&record, pool);
        }

        self.next_pool_decision_t += self.params.hashrate_update_interval;
        Ok(())
    }

    fn run_economic_decisions(&mut self, t: SimTime) {
        if t < self.next_economic_decision_t {
            return;
        }
        let prices = self.price.prices();
        for actor in &mut self.actors {
            let (current_price, alt_price) = match actor.current_fork {
                Fork::V27 => (prices[&Fork::V27], prices[&Fork::V26]),
                Fork::V26 => (prices[&Fork::V26], prices[&Fork::V27]),
            };
            let record = self.actor_engine.evaluate(actor, t, current_price, alt_price);
            self.metrics.record_economic_decision(&record);
        }
        self.next_economic_decision_t += self.params.economic_update_interval;
    }

    fn take_snapshot(&mut self, t: SimTime) {
        if t < self.next_snapshot_t {
            return;
        }
        let prices = self.price.prices();
        let snapshot = Snapshot {
            t,
            hashrate_share_v27: self.hashrate_share_v27(),
            economic_share_v27: self.economic_share_v27(),
            price_v27: prices[&Fork::V27],
            price_v26: prices[&Fork::V26],
            difficulty_v27: self.difficulty.difficulty(Fork::V27),
            difficulty_v26: self.difficulty.difficulty(Fork::V26),
            height_v27: self.chain.height(Fork::V27),
            height_v26: self.chain.height(Fork::V26),
            fee_v27: self.fee.effective_rate(Fork::V27),
            fee_v26: self.fee.effective_rate(Fork::V26),
            cumulative_reorgs: self.chain.reorg_log().len() as u64,
        };
        self.metrics.record_snapshot(snapshot);
        self.next_snapshot_t += self.params.snapshot_interval;
    }

    pub fn run(&mut self) -> SimResult<TerminalSummary> {
        info!(duration = self.params.duration, seed = self.params.randomseed, "starting run");
        let wall_clock_start = Instant::now();
        let mut t: SimTime = 0.0;

        if self.params.enable_reunion && self.params.uasf_duration.is_none() {
            // No UASF deadline to force things: watch for organic
            // convergence from the very first tick.
            self.reunion.trigger(0.0);
        }

        while t < self.params.duration {
            if wall_clock_start.elapsed() > MAX_WALL_CLOCK {
                return Err(SimError::config("wall-clock budget exceeded before scenario duration elapsed"));
            }

            self.mine_tick(t)?;
            self.update_oracles(t);
            self.run_manipulation_campaign(t);
            self.run_pool_decisions(t)?;
            self.run_economic_decisions(t);

            if let Some(action) = self.uasf.poll(t) {
                info!(?action, t, "UASF timer fired");
                self.metrics.record_uasf_action(action);
                match action {
                    crate::types::UasfExpiryAction::Reunion => {
                        // A UASF deadline forces convergence immediately,
                        // unlike the `enable_reunion` natural-convergence
                        // watch below: the activation itself is the event,
                        // not something to wait out.
                        let forced = force_reunion(&mut self.chain, t)?;
                        self.metrics.record_reunion_outcome(true);
                        debug!(forced_nodes = forced, "UASF reunion forced");
                    }
                    crate::types::UasfExpiryAction::Accept | crate::types::UasfExpiryAction::Continue => {}
                }
            }

            if self.reunion.is_pending() {
                match self.reunion.poll(t, &self.chain) {
                    Ok(Some(_outcome)) => {
                        self.metrics.record_reunion_outcome(true);
                    }
                    Ok(None) => {}
                    Err(e @ SimError::ReunionTimeout { .. }) => {
                        warn!(error = %e, "reunion failed to converge within budget");
                        self.metrics.record_reunion_outcome(false);
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            }

            self.take_snapshot(t);
            t += self.params.tick_interval;
        }

        if self.params.enable_reunion && !matches!(self.metrics.reunion_outcome(), Some(true)) {
            // Scenario-end reunion per §4.8, distinct from a mid-run UASF
            // trigger: force convergence now that the run is over, whether
            // or not the natural-convergence watch already succeeded.
            let forced = force_reunion(&mut self.chain, t)?;
            self.metrics.record_reunion_outcome(true);
            debug!(forced_nodes = forced, "scenario-end reunion forced");
        }

        // Always capture a terminal snapshot even if it falls short of the
        // next scheduled snapshot_interval boundary.
        self.next_snapshot_t = t;
        self.take_snapshot(t);
        Ok(self.metrics.finalize(t, &self.chain))
    }

    pub fn chain(&self) -> &ChainStore {
        &self.chain
    }

    pub fn price_history(&self) -> &[crate::price::PriceRecord] {
        self.price.history()
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn portfolios(&self) -> &PortfolioBook {
        &self.portfolios
    }
}
