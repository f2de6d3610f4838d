//! Parallel scenario sweep runner: runs N independent replicas of the same
//! scenario configuration on distinct seeds concurrently, one `Scenario`
//! per thread, and aggregates their terminal summaries. A single-scenario
//! run is just a sweep of replica count 1.

use rayon::prelude::*;

use crate::config::{EconomicConfig, FeePriceConfig, NetworkConfig, PoolsConfig, ScenarioParams};
use crate::error::SimResult;
use crate::metrics::TerminalSummary;
use crate::scheduler::Scenario;

pub fn run_sweep(
    params: &ScenarioParams,
    pools_cfg: &PoolsConfig,
    economic_cfg: &EconomicConfig,
    feeprice_cfg: &FeePriceConfig,
    network_cfg: &NetworkConfig,
    n_replicas: usize,
    seed_start: u64,
) -> Vec<SimResult<TerminalSummary>> {
    (0..n_replicas)
        .into_par_iter()
        .map(|i| {
            let mut replica_params = params.clone();
            replica_params.randomseed = seed_start + i as u64;
            replica_params.results_id = format!("{}-{}", params.results_id, i);
            let mut scenario = Scenario::new(replica_params, pools_cfg, economic_cfg, feeprice_cfg, network_cfg)?;
            scenario.run()
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct AggregatedSweepResult {
    pub n_replicas: usize,
    pub n_failed: usize,
    pub mean_final_hashrate_share_v27: f64,
    pub std_final_hashrate_share_v27: f64,
    pub mean_final_price_gap_usd: f64,
    pub mean_reorg_count: f64,
    pub std_reorg_count: f64,
    pub mean_consensus_stress: f64,
}

pub fn aggregate_sweep(results: &[SimResult<TerminalSummary>]) -> AggregatedSweepResult {
    let ok: Vec<&TerminalSummary> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let n = ok.len().max(1) as f64;

    let shares: Vec<f64> = ok.iter().map(|s| s.final_hashrate_share_v27).collect();
    let mean_share = shares.iter().sum::<f64>() / n;
    let var_share = shares.iter().map(|s| (s - mean_share).powi(2)).sum::<f64>() / n;

    let gaps: Vec<f64> = ok.iter().map(|s| (s.final_price_v27 - s.final_price_v26).abs()).collect();
    let mean_gap = gaps.iter().sum::<f64>() / n;

    let reorgs: Vec<f64> = ok.iter().map(|s| s.reorg_count as f64).collect();
    let mean_reorgs = reorgs.iter().sum::<f64>() / n;
    let var_reorgs = reorgs.iter().map(|r| (r - mean_reorgs).powi(2)).sum::<f64>() / n;

    let stress: Vec<f64> = ok.iter().map(|s| s.consensus_stress).collect();
    let mean_stress = stress.iter().sum::<f64>() / n;

    AggregatedSweepResult {
        n_replicas: results.len(),
        n_failed: results.len() - ok.len(),
        mean_final_hashrate_share_v27: mean_share,
        std_final_hashrate_share_v27: var_share.sqrt(),
        mean_final_price_gap_usd: mean_gap,
        mean_reorg_count: mean_reorgs,
        std_reorg_count: var_reorgs.sqrt(),
        mean_consensus_stress: mean_stress,
    }
}
