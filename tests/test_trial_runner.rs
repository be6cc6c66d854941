use std::collections::BTreeMap;
use std::sync::Arc;

use pg_reservation_pool::domain::reservation_pool::backend::backend_trait::ReservationBackend;
use pg_reservation_pool::domain::reservation_pool::backend::cluster_simulator::ClusterSimulator;
use pg_reservation_pool::domain::reservation_pool::executor::trial::{Trial, TrialStatus};
use pg_reservation_pool::domain::reservation_pool::executor::trial_runner::{RunReport, TrialRunner};
use pg_reservation_pool::domain::reservation_pool::pool::pool_config::PoolConfig;
use pg_reservation_pool::domain::reservation_pool::pool::pool_manager::ReservationPoolManager;
use pg_reservation_pool::domain::reservation_pool::resource::resource_spec::ResourceSpec;
use pg_reservation_pool::domain::reservation_pool::utils::id::{NodeId, TrialId};
use pg_reservation_pool::domain::simulator::simulator::SystemSimulator;
use pg_reservation_pool::domain::simulator::simulator_mock::MockSimulator;

fn cpu(amount: f64) -> ResourceSpec {
    ResourceSpec::from_bundles(vec![vec![("CPU", amount)]])
}

fn trials(count: usize, spec: &ResourceSpec, duration_ticks: u64) -> Vec<Trial> {
    (0..count).map(|n| Trial::new(TrialId::new(format!("trial_{:05}", n)), spec.clone(), duration_ticks)).collect()
}

fn runner(cluster: &ClusterSimulator, config: PoolConfig, trials: Vec<Trial>) -> TrialRunner {
    let clock: Arc<dyn SystemSimulator> = Arc::new(MockSimulator::new(0));
    let pool = ReservationPoolManager::new(config, Box::new(cluster.clone()), clock.clone()).unwrap();
    TrialRunner::new(pool, trials, clock)
}

/// Tracked reservations plus queued requests equal the trials that asked for
/// a reservation and have not given it back.
fn assert_demand_matches_trials(report: &RunReport) {
    for record in &report.ticks {
        assert_eq!(record.counts().demand(), record.pending_trials + record.running_trials, "tick {}: {:?}", record.tick, record);
    }
}

/// Number of trials started per tick.
fn waves(report: &RunReport) -> BTreeMap<u64, usize> {
    let mut waves = BTreeMap::new();
    for trial in &report.trials {
        if let Some(tick) = trial.started_at {
            *waves.entry(tick).or_insert(0) += 1;
        }
    }
    waves
}

fn assert_two_at_a_time(report: &RunReport) {
    assert_eq!(report.count(TrialStatus::Terminated), 10);
    assert!(report.ticks.iter().all(|record| record.in_use <= 2));
    assert_eq!(report.max_in_use(), 2);

    let waves = waves(report);
    assert_eq!(waves.len(), 5);
    assert!(waves.values().all(|started| *started == 2));

    let (first, last) = report.finish_span().unwrap();
    assert!(last - first > 3);
}

#[test]
fn limited_cluster_runs_trials_in_waves() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
    let mut runner = runner(&cluster, PoolConfig::default(), trials(10, &cpu(1.0), 3));

    let report = runner.run_to_completion(100).unwrap();

    assert_two_at_a_time(&report);
    assert_demand_matches_trials(&report);
    assert_eq!(cluster.snapshot().len(), 10);
    assert!(report.drained);
    assert_eq!(report.backend_live_after_shutdown, 0);
    assert_eq!(cluster.available("CPU"), 2.0);
}

#[test]
fn reuse_keeps_the_first_placement_groups() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
    let config = PoolConfig::default().with_reuse(true).with_cache_capacity_per_spec(2);
    let mut runner = runner(&cluster, config, trials(10, &cpu(1.0), 3));

    let report = runner.run_to_completion(100).unwrap();

    assert_two_at_a_time(&report);
    assert_demand_matches_trials(&report);
    assert_eq!(cluster.snapshot().len(), 2);
    assert!(report.ticks.iter().any(|record| record.cached == 2));
    assert!(report.drained);
    assert_eq!(report.backend_live_after_shutdown, 0);
}

#[test]
fn reuse_with_single_cache_slot_still_finishes_in_waves() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
    let mut runner = runner(&cluster, PoolConfig::default().with_reuse(true), trials(10, &cpu(1.0), 3));

    let report = runner.run_to_completion(100).unwrap();

    assert_two_at_a_time(&report);
    assert_demand_matches_trials(&report);
    assert!(report.ticks.iter().all(|record| record.cached <= 1));
    assert_eq!(report.backend_live_after_shutdown, 0);
}

#[test]
fn admission_limit_holds_every_tick() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 4.0)]).with_ready_after_polls(1);
    let mut runner = runner(&cluster, PoolConfig::default().with_max_pending_reservations(6), trials(10, &cpu(1.0), 2));

    let first = runner.step().unwrap();
    assert_eq!((first.staging, first.queued), (6, 4));

    let report = runner.run_to_completion(100).unwrap();
    assert!(report.ticks.iter().all(|record| record.staging + record.ready <= 6));
    assert_demand_matches_trials(&report);
    assert_eq!(report.count(TrialStatus::Terminated), 10);
    assert_eq!(report.max_in_use(), 4);
    assert_eq!(report.backend_live_after_shutdown, 0);
}

#[test]
fn multi_bundle_trials_get_atomic_reservations() {
    let cluster = ClusterSimulator::new(vec![
        (NodeId::new("node_a"), vec![("CPU", 3.0), ("GPU", 1.0)]),
        (NodeId::new("node_b"), vec![("CPU", 3.0), ("GPU", 1.0)]),
    ]);
    let spec = ResourceSpec::from_bundles(vec![vec![("CPU", 1.0)], vec![("CPU", 1.0), ("GPU", 1.0)], vec![("CPU", 1.0), ("GPU", 1.0)], vec![("CPU", 1.0)]]);
    let mut runner = runner(&cluster, PoolConfig::default(), trials(3, &spec, 2));

    let report = runner.run_to_completion(100).unwrap();

    assert_eq!(report.count(TrialStatus::Terminated), 3);
    assert_eq!(report.max_in_use(), 1);
    assert_eq!(waves(&report).len(), 3);
    assert_demand_matches_trials(&report);
    assert_eq!(cluster.available("GPU"), 2.0);
}

#[test]
fn unschedulable_trials_error_out() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
    let mut all = trials(2, &cpu(1.0), 2);
    all.push(Trial::new(TrialId::new("trial_huge"), cpu(16.0), 2));
    let mut runner = runner(&cluster, PoolConfig::default().with_max_creation_retries(1), all);

    let report = runner.run_to_completion(50).unwrap();

    assert_eq!(report.count(TrialStatus::Terminated), 2);
    assert_eq!(runner.trial(&TrialId::new("trial_huge")).unwrap().status(), TrialStatus::Error);
    assert_demand_matches_trials(&report);
    assert!(report.drained);
}

#[test]
fn cancelled_trials_return_their_requests() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 1.0)]);
    let mut runner = runner(&cluster, PoolConfig::default(), trials(3, &cpu(1.0), 5));

    runner.step().unwrap();
    runner.step().unwrap();
    assert_eq!(runner.pool().stats().totals.in_use, 1);

    runner.cancel_trial(&TrialId::new("trial_00000")).unwrap();
    runner.cancel_trial(&TrialId::new("trial_00002")).unwrap();

    let totals = runner.pool().stats().totals;
    assert_eq!(totals.in_use, 0);
    assert_eq!(totals.staging + totals.ready, 1);

    let report = runner.run_to_completion(50).unwrap();
    assert_eq!(report.count(TrialStatus::Terminated), 3);
    assert_eq!(runner.trial(&TrialId::new("trial_00001")).unwrap().finished_at(), Some(8));
    assert!(report.drained);
}

#[test]
fn unfinished_trials_are_stopped_at_the_tick_limit() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 1.0)]);
    let mut runner = runner(&cluster, PoolConfig::default(), trials(2, &cpu(1.0), 100));

    let report = runner.run_to_completion(3).unwrap();

    assert_eq!(report.ticks.len(), 3);
    assert_eq!(report.count(TrialStatus::Error), 2);
    assert!(report.drained);
    assert_eq!(report.backend_live_after_shutdown, 0);
}

#[test]
fn audit_fails_trials_whose_placement_group_vanished() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
    let mut runner = runner(&cluster, PoolConfig::default(), trials(1, &cpu(1.0), 5)).with_audit_interval(1);

    runner.step().unwrap();
    runner.step().unwrap();
    let (trial, reservation) = runner.pool().associations().remove(0);
    let placement_group_id = runner.pool().reservation(reservation).unwrap().placement_group_id().unwrap().clone();

    cluster.remove_externally(&placement_group_id);
    runner.step().unwrap();

    assert_eq!(runner.trial(&trial).unwrap().status(), TrialStatus::Error);
    let report = runner.run_to_completion(10).unwrap();
    assert!(report.drained);
}

#[test]
fn statistics_are_written_as_csv() {
    let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
    let mut runner = runner(&cluster, PoolConfig::default(), trials(2, &cpu(1.0), 1));
    let report = runner.run_to_completion(10).unwrap();

    let path = std::env::temp_dir().join(format!("pg_pool_stats_{}.csv", std::process::id()));
    report.write_csv(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), report.ticks.len() + 1);
    assert!(lines[0].starts_with("Tick;Time;Staging;Ready;InUse"));
}
