use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::domain::reservation_pool::executor::trial::{Trial, TrialStatus};
use crate::domain::reservation_pool::pool::pool_manager::ReservationPoolManager;
use crate::domain::reservation_pool::utils::id::TrialId;
use crate::domain::reservation_pool::utils::statistics::{POOL_ANALYTICS_TARGET, TickRecord, write_records_to_file};
use crate::domain::simulator::simulator::SystemSimulator;
use crate::error::Result;

/// Cleanup rounds after shutdown before the runner gives up waiting for the
/// backend to confirm removals.
const MAX_DRAIN_ROUNDS: usize = 32;

/// Drives trials through a [`ReservationPoolManager`], one scheduling tick per
/// [`step`](TrialRunner::step).
#[derive(Debug)]
pub struct TrialRunner {
    pool: ReservationPoolManager,
    trials: Vec<Trial>,
    simulator: Arc<dyn SystemSimulator>,
    tick: u64,
    records: Vec<TickRecord>,

    /// Run a liveness audit every n ticks.
    audit_interval: Option<u64>,
}

/// Outcome of one trial, as reported by [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialSummary {
    pub id: TrialId,
    pub status: TrialStatus,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub ticks: Vec<TickRecord>,
    pub trials: Vec<TrialSummary>,

    /// Whether every reservation was confirmed removed after shutdown.
    pub drained: bool,
    pub backend_live_after_shutdown: usize,
}

impl RunReport {
    pub fn max_in_use(&self) -> usize {
        self.ticks.iter().map(|record| record.in_use).max().unwrap_or(0)
    }

    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|trial| trial.status == status).count()
    }

    /// First and last tick in which a trial finished.
    pub fn finish_span(&self) -> Option<(u64, u64)> {
        let mut finished = self.trials.iter().filter(|trial| trial.status == TrialStatus::Terminated).filter_map(|trial| trial.finished_at);
        let first = finished.next()?;
        Some(finished.fold((first, first), |(min, max), tick| (min.min(tick), max.max(tick))))
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        write_records_to_file(&self.ticks, path)
    }
}

impl TrialRunner {
    pub fn new(pool: ReservationPoolManager, trials: Vec<Trial>, simulator: Arc<dyn SystemSimulator>) -> Self {
        TrialRunner { pool, trials, simulator, tick: 0, records: Vec::new(), audit_interval: None }
    }

    pub fn with_audit_interval(mut self, ticks: u64) -> Self {
        self.audit_interval = (ticks > 0).then_some(ticks);
        self
    }

    pub fn pool(&self) -> &ReservationPoolManager {
        &self.pool
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn trial(&self, id: &TrialId) -> Option<&Trial> {
        self.trials.iter().find(|trial| trial.id() == id)
    }

    pub fn records(&self) -> &[TickRecord] {
        &self.records
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_finished(&self) -> bool {
        self.trials.iter().all(|trial| trial.status().is_terminal())
    }

    /// One scheduling tick: reconcile, request, assign, advance and release,
    /// cleanup.
    pub fn step(&mut self) -> Result<TickRecord> {
        self.tick += 1;
        let tick = self.tick;

        let report = self.pool.reconcile();
        for (spec, err) in report.failures {
            let oldest = self.trials.iter_mut().filter(|trial| trial.is_waiting() && trial.spec() == &spec).min_by_key(|trial| trial.requested_at);
            if let Some(trial) = oldest {
                log::error!("Trial {} cannot be scheduled: {}", trial.id(), err);
                trial.finish(tick, TrialStatus::Error);
            }
        }

        for trial in self.trials.iter_mut().filter(|trial| trial.status() == TrialStatus::Pending && trial.requested_at.is_none()) {
            match self.pool.request(trial.spec()) {
                Ok(outcome) => {
                    log::debug!("Trial {} requested {}: {:?}", trial.id(), trial.spec(), outcome);
                    trial.requested_at = Some(tick);
                }
                Err(e) => {
                    log::error!("Trial {} rejected: {}", trial.id(), e);
                    trial.finish(tick, TrialStatus::Error);
                }
            }
        }

        for trial in self.trials.iter_mut().filter(|trial| trial.is_waiting()) {
            let Some(reservation) = self.pool.get_ready(trial.spec()) else {
                continue;
            };
            self.pool.assign(trial.id(), reservation)?;
            trial.start(tick);
        }

        let finished: Vec<usize> = self
            .trials
            .iter_mut()
            .enumerate()
            .filter(|(_, trial)| trial.status() == TrialStatus::Running)
            .filter_map(|(index, trial)| trial.advance().then_some(index))
            .collect();
        for index in finished {
            self.trials[index].finish(tick, TrialStatus::Terminated);
            let reuse = self.should_reuse(index);
            self.pool.release(self.trials[index].id(), reuse)?;
        }

        self.pool.cleanup();

        if self.audit_interval.is_some_and(|interval| tick % interval == 0) {
            self.audit()?;
        }

        let record = self.record();
        tracing::info!(
            target: POOL_ANALYTICS_TARGET,
            Tick = record.tick,
            Time = record.time,
            Staging = record.staging,
            Ready = record.ready,
            InUse = record.in_use,
            Cached = record.cached,
            PendingRemoval = record.pending_removal,
            Queued = record.queued,
            RunningTrials = record.running_trials,
            FinishedTrials = record.finished_trials,
            BackendLive = record.backend_live,
        );
        self.records.push(record);
        Ok(record)
    }

    /// Steps until every trial is terminal or `max_ticks` is reached, then
    /// shuts the pool down and drains pending removals.
    pub fn run_to_completion(&mut self, max_ticks: u64) -> Result<RunReport> {
        while !self.is_finished() {
            if self.tick >= max_ticks {
                log::warn!("Stopping run after {} ticks with unfinished trials", self.tick);
                self.stop_unfinished()?;
                break;
            }
            self.step()?;
        }

        self.pool.shutdown();
        let mut rounds = 0;
        while !self.pool.is_idle() && rounds < MAX_DRAIN_ROUNDS {
            self.pool.reconcile();
            self.pool.cleanup();
            rounds += 1;
        }

        let drained = self.pool.is_idle();
        if !drained {
            log::warn!("Pool still tracks {} reservation(s) after shutdown", self.pool.stats().totals.pending_removal);
        }
        log::info!("Run finished after {} ticks", self.tick);

        Ok(RunReport {
            ticks: self.records.clone(),
            trials: self
                .trials
                .iter()
                .map(|trial| TrialSummary { id: trial.id().clone(), status: trial.status(), started_at: trial.started_at(), finished_at: trial.finished_at() })
                .collect(),
            drained,
            backend_live_after_shutdown: self.pool.backend_live_count(),
        })
    }

    /// Stops a trial before it completes. A waiting trial withdraws its
    /// request, a running one gives its reservation back without reuse.
    pub fn cancel_trial(&mut self, id: &TrialId) -> Result<()> {
        let tick = self.tick;
        let Some(trial) = self.trials.iter_mut().find(|trial| trial.id() == id) else {
            return Ok(());
        };

        match trial.status() {
            TrialStatus::Running => {
                self.pool.release(trial.id(), false)?;
            }
            TrialStatus::Pending if trial.requested_at.is_some() => {
                self.pool.cancel_request(trial.spec())?;
            }
            TrialStatus::Pending => {}
            TrialStatus::Terminated | TrialStatus::Error => return Ok(()),
        }

        log::info!("Trial {} cancelled", trial.id());
        trial.finish(tick, TrialStatus::Terminated);
        Ok(())
    }

    /// Reuse only pays off if a trial waiting for the same spec is not already
    /// covered by a cached reservation.
    fn should_reuse(&self, index: usize) -> bool {
        if !self.pool.config().reuse_enabled {
            return false;
        }
        let spec = self.trials[index].spec();
        let waiting = self.trials.iter().filter(|trial| trial.status() == TrialStatus::Pending && trial.spec() == spec).count();
        waiting > self.pool.stats().for_spec(spec).cached
    }

    fn audit(&mut self) -> Result<()> {
        let report = self.pool.audit();
        for id in report.lost_in_use {
            if let Some(trial) = self.trials.iter_mut().find(|trial| *trial.id() == id) {
                log::error!("Trial {} lost its placement group", trial.id());
                trial.finish(self.tick, TrialStatus::Error);
            }
            self.pool.release(&id, false)?;
        }
        Ok(())
    }

    fn stop_unfinished(&mut self) -> Result<()> {
        let unfinished: Vec<TrialId> = self.trials.iter().filter(|trial| !trial.status().is_terminal()).map(|trial| trial.id().clone()).collect();
        for id in unfinished {
            self.cancel_trial(&id)?;
            if let Some(trial) = self.trials.iter_mut().find(|trial| *trial.id() == id) {
                trial.finish(self.tick, TrialStatus::Error);
            }
        }
        Ok(())
    }

    fn record(&self) -> TickRecord {
        let totals = self.pool.stats().totals;
        let count = |status: TrialStatus| self.trials.iter().filter(|trial| trial.status() == status).count();

        TickRecord {
            tick: self.tick,
            time: self.simulator.get_current_time_in_ms(),
            staging: totals.staging,
            ready: totals.ready,
            in_use: totals.in_use,
            cached: totals.cached,
            pending_removal: totals.pending_removal,
            queued: totals.queued,
            pending_trials: count(TrialStatus::Pending),
            running_trials: count(TrialStatus::Running),
            finished_trials: count(TrialStatus::Terminated) + count(TrialStatus::Error),
            backend_live: self.pool.backend_live_count(),
        }
    }
}
