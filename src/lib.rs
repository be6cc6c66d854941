use std::path::Path;
use std::sync::Arc;

use crate::api::pool_dto::RunDto;
use crate::domain::reservation_pool::backend::cluster_simulator::ClusterSimulator;
use crate::domain::reservation_pool::executor::trial::Trial;
use crate::domain::reservation_pool::executor::trial_runner::{RunReport, TrialRunner};
use crate::domain::reservation_pool::pool::pool_config::PoolConfig;
use crate::domain::reservation_pool::pool::pool_manager::ReservationPoolManager;
use crate::domain::simulator::simulator::{Simulator, SystemSimulator};
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Tick limit of a run description that does not set `maxTicks`.
pub const DEFAULT_MAX_TICKS: u64 = 10_000;

/// Builds a runner over the simulated cluster described by `dto`.
/// `PG_POOL_MAX_PENDING_RESERVATIONS` overrides the configured admission limit.
pub fn build_runner(dto: RunDto) -> Result<TrialRunner> {
    let config = PoolConfig::try_from(dto.pool)?.with_env_overrides()?;
    let cluster = ClusterSimulator::try_from(dto.cluster)?;
    let trials = Trial::from_groups(dto.trials)?;
    let simulator: Arc<dyn SystemSimulator> = Arc::new(Simulator::from(dto.clock));

    log::info!("Run description loaded: {} trial(s) on {} node(s)", trials.len(), cluster.node_ids().len());

    let pool = ReservationPoolManager::new(config, Box::new(cluster), simulator.clone())?;
    Ok(TrialRunner::new(pool, trials, simulator))
}

/// Loads a JSON run description and runs it to completion.
pub fn run_from_file(file_path: impl AsRef<Path>, max_ticks: Option<u64>) -> Result<RunReport> {
    let dto: RunDto = parse_json_file(file_path.as_ref())?;
    log::info!("JSON file '{}' parsed successfully.", file_path.as_ref().display());

    let max_ticks = max_ticks.or(dto.max_ticks).unwrap_or(DEFAULT_MAX_TICKS);
    let mut runner = build_runner(dto)?;
    runner.run_to_completion(max_ticks)
}
