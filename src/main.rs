use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use pg_reservation_pool::domain::reservation_pool::executor::trial::TrialStatus;
use pg_reservation_pool::{logger, run_from_file};

/// Runs trials from a JSON run description against a simulated cluster.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Run description (pool configuration, cluster nodes, trial groups).
    config: PathBuf,

    /// Write per-tick statistics as `;` separated CSV.
    #[arg(short, long)]
    stats: Option<PathBuf>,

    /// Overrides `maxTicks` of the run description.
    #[arg(short, long)]
    max_ticks: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init();

    let report = run_from_file(&args.config, args.max_ticks).with_context(|| format!("Run '{}' failed", args.config.display()))?;

    if let Some(path) = &args.stats {
        report.write_csv(path).with_context(|| format!("Could not write statistics to '{}'", path.display()))?;
    }

    log::info!(
        "{} trial(s) terminated, {} failed, at most {} reservation(s) in use, {} tick(s)",
        report.count(TrialStatus::Terminated),
        report.count(TrialStatus::Error),
        report.max_in_use(),
        report.ticks.len()
    );
    if !report.drained {
        log::warn!("{} placement group(s) still alive on the backend", report.backend_live_after_shutdown);
    }
    Ok(())
}
