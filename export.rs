//! JSON and CSV artifact export (§6): writes the per-tick time series and
//! terminal summary produced by a `Scenario` run to disk, one file per
//! named series plus a `results.json` carrying the terminal summary.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{SimError, SimResult};
use crate::metrics::{MetricsAggregator, TerminalSummary};
use crate::price::PriceRecord;

fn write_json<T: Serialize>(path: &Path, value: &T) -> SimResult<()> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| SimError::config(format!("failed to serialize {}: {e}", path.display())))?;
    fs::write(path, body).map_err(|e| SimError::ExternalIo { path: path.display().to_string(), source: e })
}

/// Writes `results.json`, `prices.json`, and `reorg.json` beside each
/// other under `out_dir`, named after the scenario's `results_id`.
pub fn export_json(
    out_dir: &Path,
    results_id: &str,
    summary: &TerminalSummary,
    metrics: &MetricsAggregator,
    price_history: &[PriceRecord],
    reorg_log: &[crate::chain::ReorgEvent],
) -> SimResult<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .map_err(|e| SimError::ExternalIo { path: out_dir.display().to_string(), source: e })?;

    let mut written = Vec::new();

    let results_path = out_dir.join(format!("{results_id}.results.json"));
    write_json(&results_path, summary)?;
    written.push(results_path);

    let snapshots_path = out_dir.join(format!("{results_id}.snapshots.json"));
    write_json(&snapshots_path, &metrics.snapshots())?;
    written.push(snapshots_path);

    let prices_path = out_dir.join(format!("{results_id}.prices.json"));
    write_json(&prices_path, &price_history)?;
    written.push(prices_path);

    let reorg_path = out_dir.join(format!("{results_id}.reorg.json"));
    write_json(&reorg_path, &reorg_log)?;
    written.push(reorg_path);

    Ok(written)
}

/// Flattens the per-tick snapshot series into `t,fork,field,value` rows,
/// one CSV per invocation. Only the fields that vary per fork are split
/// this way; scalar fields (cumulative reorg count) are emitted under a
/// synthetic `fork` value of `all`.
pub fn export_csv(out_dir: &Path, results_id: &str, metrics: &MetricsAggregator) -> SimResult<PathBuf> {
    fs::create_dir_all(out_dir)
        .map_err(|e| SimError::ExternalIo { path: out_dir.display().to_string(), source: e })?;
    let path = out_dir.join(format!("{results_id}.snapshots.csv"));

    let mut rows = String::from("t,fork,field,value\n");
    for s in metrics.snapshots() {
        rows.push_str(&format!("{},v27,hashrate_share,{}\n", s.t, s.hashrate_share_v27));
        rows.push_str(&format!("{},v27,economic_share,{}\n", s.t, s.economic_share_v27));
        rows.push_str(&format!("{},v27,price,{}\n", s.t, s.price_v27));
        rows.push_str(&format!("{},v26,price,{}\n", s.t, s.price_v26));
        rows.push_str(&format!("{},v27,difficulty,{}\n", s.t, s.difficulty_v27));
        rows.push_str(&format!("{},v26,difficulty,{}\n", s.t, s.difficulty_v26));
        rows.push_str(&format!("{},v27,height,{}\n", s.t, s.height_v27));
        rows.push_str(&format!("{},v26,height,{}\n", s.t, s.height_v26));
        rows.push_str(&format!("{},v27,fee_rate,{}\n", s.t, s.fee_v27));
        rows.push_str(&format!("{},v26,fee_rate,{}\n", s.t, s.fee_v26));
        rows.push_str(&format!("{},all,cumulative_reorgs,{}\n", s.t, s.cumulative_reorgs));
    }

    fs::write(&path, rows).map_err(|e| SimError::ExternalIo { path: path.display().to_string(), source: e })?;
    Ok(path)
}
