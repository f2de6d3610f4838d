use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use forksim::config::{
    load_economic_bundle, load_pools_bundle, load_yaml, EconomicConfig, FeePriceConfig,
    NetworkConfig, PoolsConfig, ScenarioParams,
};
use forksim::export::{export_csv, export_json};
use forksim::sweep::{aggregate_sweep, run_sweep};
use forksim::types::UasfExpiryAction;
use forksim::{Scenario, SimError};

#[derive(Parser)]
#[command(name = "forksim", about = "Discrete-event simulator for a contested two-fork Bitcoin network")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a scenario bundle (pools + economic + fee/price configs) without running it.
    Validate(ScenarioArgs),
    /// Run one scenario, or `--replicas N` independent replicas in parallel.
    Run(ScenarioArgs),
}

#[derive(Parser, Clone)]
struct ScenarioArgs {
    /// Directory containing `pools/<name>.yaml` and `economic/<name>.yaml` bundles.
    #[arg(long, default_value = "scenarios")]
    bundle_dir: PathBuf,
    #[arg(long)]
    pool_scenario: String,
    #[arg(long)]
    economic_scenario: String,
    /// Fee/price model YAML (not bundle-resolved: a single shared file).
    #[arg(long, default_value = "fee_price.yaml")]
    fee_price_config: PathBuf,
    /// Network/node metadata YAML.
    #[arg(long, default_value = "network.yaml")]
    network_config: PathBuf,

    #[arg(long, default_value_t = 3600.0)]
    duration: f64,
    #[arg(long, default_value_t = 1.0)]
    tick_interval: f64,
    #[arg(long, default_value_t = 600.0)]
    block_interval_target: f64,
    #[arg(long, default_value_t = 144)]
    retarget_interval: u64,
    #[arg(long, default_value_t = false)]
    enable_eda: bool,
    #[arg(long, default_value_t = 1.0 / 16.0)]
    min_difficulty: f64,
    #[arg(long, default_value_t = 0.5)]
    v27_economic: f64,
    #[arg(long, default_value_t = 0.5)]
    v26_economic: f64,
    #[arg(long, default_value_t = 0.5)]
    initial_v27_hashrate: f64,
    #[arg(long, default_value_t = 600.0)]
    hashrate_update_interval: f64,
    #[arg(long, default_value_t = 300.0)]
    economic_update_interval: f64,
    #[arg(long, default_value_t = 300.0)]
    price_update_interval: f64,
    #[arg(long, default_value_t = 60.0)]
    snapshot_interval: f64,
    #[arg(long, default_value_t = false)]
    enable_reunion: bool,
    #[arg(long, default_value_t = 300.0)]
    reunion_timeout: f64,
    #[arg(long)]
    uasf_duration: Option<f64>,
    #[arg(long, value_enum, default_value = "continue")]
    uasf_expiry_action: UasfExpiryActionArg,
    #[arg(long, default_value_t = true)]
    enable_dynamic_switching: bool,
    #[arg(long, default_value_t = true)]
    enable_reorg_metrics: bool,
    #[arg(long, default_value = "run")]
    results_id: String,
    #[arg(long, default_value_t = 0)]
    randomseed: u64,

    #[arg(long, default_value_t = 1)]
    replicas: usize,
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    csv: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum UasfExpiryActionArg {
    Reunion,
    Accept,
    Continue,
}

impl From<UasfExpiryActionArg> for UasfExpiryAction {
    fn from(a: UasfExpiryActionArg) -> Self {
        match a {
            UasfExpiryActionArg::Reunion => UasfExpiryAction::Reunion,
            UasfExpiryActionArg::Accept => UasfExpiryAction::Accept,
            UasfExpiryActionArg::Continue => UasfExpiryAction::Continue,
        }
    }
}

impl ScenarioArgs {
    fn params(&self) -> ScenarioParams {
        ScenarioParams {
            duration: self.duration,
            tick_interval: self.tick_interval,
            block_interval_target: self.block_interval_target,
            retarget_interval: self.retarget_interval,
            enable_eda: self.enable_eda,
            min_difficulty: self.min_difficulty,
            v27_economic: self.v27_economic,
            v26_economic: self.v26_economic,
            initial_v27_hashrate: self.initial_v27_hashrate,
            hashrate_update_interval: self.hashrate_update_interval,
            economic_update_interval: self.economic_update_interval,
            price_update_interval: self.price_update_interval,
            snapshot_interval: self.snapshot_interval,
            enable_reunion: self.enable_reunion,
            reunion_timeout: self.reunion_timeout,
            uasf_duration: self.uasf_duration,
            uasf_expiry_action: self.uasf_expiry_action.into(),
            enable_dynamic_switching: self.enable_dynamic_switching,
            enable_reorg_metrics: self.enable_reorg_metrics,
            results_id: self.results_id.clone(),
            randomseed: self.randomseed,
            ..ScenarioParams::default()
        }
    }

    fn load_configs(&self) -> Result<(PoolsConfig, EconomicConfig, FeePriceConfig, NetworkConfig)> {
        let pools = load_pools_bundle(&self.bundle_dir, &self.pool_scenario)
            .with_context(|| format!("loading pool scenario '{}'", self.pool_scenario))?;
        let economic = load_economic_bundle(&self.bundle_dir, &self.economic_scenario)
            .with_context(|| format!("loading economic scenario '{}'", self.economic_scenario))?;
        let fee_price: FeePriceConfig = load_yaml(&self.fee_price_config)
            .with_context(|| format!("loading fee/price config {}", self.fee_price_config.display()))?;
        fee_price.validate().context("fee/price config failed validation")?;
        let network: NetworkConfig = load_yaml(&self.network_config)
            .with_context(|| format!("loading network config {}", self.network_config.display()))?;
        network.validate(&economic).context("network config failed validation")?;
        Ok((pools, economic, fee_price, network))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Validate(args) => {
            args.load_configs()?;
            println!("[PASS] scenario bundle is valid");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => run_cmd(args),
    }
}

fn run_cmd(args: ScenarioArgs) -> Result<ExitCode> {
    let (pools, economic, fee_price, network) = args.load_configs()?;
    let params = args.params();

    if args.replicas <= 1 {
        let mut scenario = Scenario::new(params.clone(), &pools, &economic, &fee_price, &network)
            .context("constructing scenario")?;
        let outcome = scenario.run();
        match outcome {
            Ok(summary) => {
                print_summary(&summary);
                export_json(
                    &args.out_dir,
                    &params.results_id,
                    &summary,
                    scenario.metrics(),
                    scenario.price_history(),
                    scenario.chain().reorg_log(),
                )
                .context("writing JSON artifacts")?;
                if args.csv {
                    export_csv(&args.out_dir, &params.results_id, scenario.metrics())
                        .context("writing CSV artifact")?;
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                let code = e.exit_code();
                eprintln!("scenario failed: {e}");
                Ok(ExitCode::from(code as u8))
            }
        }
    } else {
        let results = run_sweep(&params, &pools, &economic, &fee_price, &network, args.replicas, params.randomseed);
        for (i, r) in results.iter().enumerate() {
            if let Err(SimError::ReunionTimeout { elapsed, unconverged }) = r {
                eprintln!("replica {i}: reunion timed out after {elapsed}s with {unconverged} unconverged node(s)");
            } else if let Err(e) = r {
                eprintln!("replica {i}: {e}");
            }
        }
        let agg = aggregate_sweep(&results);
        println!(
            "\n{} replicas ({} failed)\nmean final v27 hashrate share: {:.4} (std {:.4})\nmean |price gap|: ${:.2}\nmean reorgs: {:.2} (std {:.2})\nmean consensus stress: {:.4}",
            agg.n_replicas,
            agg.n_failed,
            agg.mean_final_hashrate_share_v27,
            agg.std_final_hashrate_share_v27,
            agg.mean_final_price_gap_usd,
            agg.mean_reorg_count,
            agg.std_reorg_count,
            agg.mean_consensus_stress,
        );
        Ok(ExitCode::SUCCESS)
    }
}

fn print_summary(summary: &forksim::metrics::TerminalSummary) {
    println!("\nresults_id: {}", summary.results_id);
    println!("duration: {:.0}s", summary.duration);
    println!("blocks: v27={} v26={}", summary.total_blocks_v27, summary.total_blocks_v26);
    println!(
        "final shares: hashrate_v27={:.4} economic_v27={:.4}",
        summary.final_hashrate_share_v27, summary.final_economic_share_v27
    );
    println!("final prices: v27=${:.2} v26=${:.2}", summary.final_price_v27, summary.final_price_v26);
    println!("reorgs: {} (orphans v27={} v26={})", summary.reorg_count, summary.orphan_count_v27, summary.orphan_count_v26);
    println!("consensus_stress: {:.4}", summary.consensus_stress);
    if let Some(action) = summary.uasf_action_taken {
        println!("uasf_action_taken: {action:?}");
    }
    if let Some(converged) = summary.reunion_converged {
        println!("reunion_converged: {converged}");
    }
    println!("\nPool                           Decisions   Switches   Forced");
    println!("----------------------------------------------------------------");
    for p in &summary.pool_cost_table {
        println!("{:<30} {:>10} {:>10} {:>8}", p.pool_id, p.decisions, p.switches, p.forced_switches);
    }
}
