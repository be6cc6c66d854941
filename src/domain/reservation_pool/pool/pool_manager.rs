use bimap::BiHashMap;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::reservation_pool::backend::backend_trait::{BackendReservationState, CreationStatus, ReservationBackend, StagingHandle};
use crate::domain::reservation_pool::pool::pool_config::PoolConfig;
use crate::domain::reservation_pool::pool::pool_report::{AuditReport, CleanupReport, ReconcileReport, ReleaseOutcome, RequestOutcome};
use crate::domain::reservation_pool::pool::pool_stats::PoolStats;
use crate::domain::reservation_pool::reservation::reservation::{Reservation, ReservationState};
use crate::domain::reservation_pool::reservation::reservation_store::{ReservationId, ReservationStore};
use crate::domain::reservation_pool::resource::resource_spec::ResourceSpec;
use crate::domain::reservation_pool::utils::id::{PlacementGroupId, ReservationName, TrialId};
use crate::domain::simulator::simulator::SystemSimulator;
use crate::error::{AssociationError, BackendError, Error, Result};

type SpecIndex = HashMap<ResourceSpec, VecDeque<ReservationId>>;

/// Owns every placement group reservation of one run and drives their
/// lifecycle from the executor's control loop.
///
/// The executor calls, once per scheduling tick, [`reconcile`](Self::reconcile)
/// to observe backend completions, [`request`](Self::request) /
/// [`get_ready`](Self::get_ready) / [`assign`](Self::assign) to start trials,
/// [`release`](Self::release) when trials finish and [`cleanup`](Self::cleanup)
/// to drive removals. All operations take `&mut self`; the manager performs no
/// internal threading and never blocks on the backend.
///
/// Supply for a spec (queued requests, Staging, Ready and Cached reservations)
/// is kept in line with the number of waiting requests: missing supply is
/// requested, surplus is cancelled newest first. Cached reservations are only
/// dropped by eviction, audit or [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct ReservationPoolManager {
    config: PoolConfig,
    backend: Box<dyn ReservationBackend>,
    simulator: Arc<dyn SystemSimulator>,

    store: ReservationStore,

    /// Staging reservations per spec, in creation order.
    staging: SpecIndex,
    /// Ready reservations per spec, in creation order.
    ready: SpecIndex,
    /// Cached reservations per spec, least recently cached first.
    cached: SpecIndex,
    in_use: HashSet<ReservationId>,
    pending_removal: Vec<ReservationId>,

    /// Outstanding creations, correlated back to their reservation.
    staging_handles: BTreeMap<StagingHandle, ReservationId>,

    /// Requests deferred by admission control, in arrival order.
    queue: VecDeque<ResourceSpec>,

    /// Requests not yet satisfied by an assignment.
    waiting: HashMap<ResourceSpec, usize>,

    associations: BiHashMap<TrialId, ReservationId>,

    next_seq: u64,
    latest_staging_start: Option<i64>,

    /// Set by `shutdown`; released reservations are no longer cached.
    shut_down: bool,
}

impl ReservationPoolManager {
    pub fn new(config: PoolConfig, backend: Box<dyn ReservationBackend>, simulator: Arc<dyn SystemSimulator>) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Reservation pool on backend '{}' (max pending: {:?}, cache per spec: {}, reuse: {})",
            backend.name(),
            config.max_pending_reservations,
            config.cache_capacity_per_spec,
            config.reuse_enabled
        );

        Ok(ReservationPoolManager {
            config,
            backend,
            simulator,
            store: ReservationStore::new(),
            staging: HashMap::new(),
            ready: HashMap::new(),
            cached: HashMap::new(),
            in_use: HashSet::new(),
            pending_removal: Vec::new(),
            staging_handles: BTreeMap::new(),
            queue: VecDeque::new(),
            waiting: HashMap::new(),
            associations: BiHashMap::new(),
            next_seq: 0,
            latest_staging_start: None,
            shut_down: false,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Registers that a trial needs a reservation of shape `spec`.
    ///
    /// Invalid specs are rejected before the backend is contacted. If existing
    /// supply already covers every waiting request nothing is sent; otherwise
    /// the spec is forwarded to the backend, or queued when the admission limit
    /// is reached.
    pub fn request(&mut self, spec: &ResourceSpec) -> Result<RequestOutcome> {
        spec.validate()?;

        *self.waiting.entry(spec.clone()).or_insert(0) += 1;

        if self.supply(spec) >= self.waiting_requests(spec) {
            log::debug!("Request for {} is covered by existing reservations", spec);
            return Ok(RequestOutcome::Covered);
        }
        Ok(self.forward_or_queue(spec.clone()))
    }

    /// Polls every outstanding creation, promotes completed ones to Ready,
    /// retries or surfaces failed ones and forwards queued requests into the
    /// freed admission budget.
    pub fn reconcile(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let outstanding: Vec<(StagingHandle, ReservationId)> = self.staging_handles.iter().map(|(handle, id)| (*handle, *id)).collect();

        for (handle, id) in outstanding {
            match self.backend.poll(handle) {
                CreationStatus::Pending => {}
                CreationStatus::Ready(placement_group_id) => {
                    self.staging_handles.remove(&handle);
                    if self.promote(id, placement_group_id) {
                        report.promoted.push(id);
                    }
                }
                CreationStatus::Failed(reason) => {
                    self.staging_handles.remove(&handle);
                    self.handle_creation_failure(id, reason, true, &mut report);
                }
                CreationStatus::Infeasible(reason) => {
                    self.staging_handles.remove(&handle);
                    self.handle_creation_failure(id, reason, false, &mut report);
                }
            }
        }

        report.dequeued = self.enforce_limits();
        report
    }

    /// A reservation that can serve `spec`: the most recently cached one, else
    /// the oldest Ready one.
    pub fn get_ready(&self, spec: &ResourceSpec) -> Option<ReservationId> {
        self.cached.get(spec).and_then(|ids| ids.back().copied()).or_else(|| self.ready.get(spec).and_then(|ids| ids.front().copied()))
    }

    pub fn assign(&mut self, trial: &TrialId, id: ReservationId) -> Result<()> {
        if self.associations.contains_left(trial) {
            return Err(AssociationError::TrialAlreadyAssigned { trial: trial.clone() }.into());
        }

        let now = self.now();
        let reservation = self.store.get_mut(id).ok_or(AssociationError::UnknownReservation)?;
        let previous = reservation.state();
        if !previous.is_assignable() {
            return Err(AssociationError::NotAssignable { state: previous }.into());
        }

        reservation.transition(ReservationState::InUse, now)?;
        reservation.trial = Some(trial.clone());
        let spec = reservation.spec().clone();
        let name = reservation.name().clone();

        if previous == ReservationState::Cached {
            remove_from(&mut self.cached, &spec, id);
        } else {
            remove_from(&mut self.ready, &spec, id);
        }
        self.in_use.insert(id);
        self.associations.insert(trial.clone(), id);

        if let Some(waiting) = self.waiting.get_mut(&spec) {
            *waiting = waiting.saturating_sub(1);
        }

        log::info!("Assigned {} ({:?}) to trial {}", name, previous, trial);

        self.rebalance(&spec);
        self.enforce_limits();
        Ok(())
    }

    /// Ends the trial's use of its reservation. With `reuse` the reservation is
    /// cached for the next trial of the same spec, evicting the least recently
    /// cached one if the spec's cache is full; otherwise it is scheduled for
    /// removal.
    pub fn release(&mut self, trial: &TrialId, reuse: bool) -> Result<ReleaseOutcome> {
        let id = *self.associations.get_by_left(trial).ok_or_else(|| AssociationError::NoAssociation { trial: trial.clone() })?;
        let (spec, lost) = match self.store.get(id) {
            Some(reservation) => (reservation.spec().clone(), reservation.lost),
            None => return Err(AssociationError::UnknownReservation.into()),
        };

        self.associations.remove_by_left(trial);
        self.in_use.remove(&id);
        if let Some(reservation) = self.store.get_mut(id) {
            reservation.trial = None;
        }

        let capacity = self.config.cache_capacity_per_spec;
        let outcome = if reuse && capacity > 0 && !lost && !self.shut_down {
            let mut evicted = None;
            while len_of(&self.cached, &spec) >= capacity {
                let Some(oldest) = self.cached.get_mut(&spec).and_then(|ids| ids.pop_front()) else {
                    break;
                };
                self.schedule_removal(oldest)?;
                evicted = Some(oldest);
            }

            let now = self.now();
            if let Some(reservation) = self.store.get_mut(id) {
                reservation.transition(ReservationState::Cached, now)?;
            }
            self.cached.entry(spec.clone()).or_default().push_back(id);
            log::info!("Trial {} released its reservation into the cache", trial);
            ReleaseOutcome::Cached { reservation: id, evicted }
        } else {
            self.schedule_removal(id)?;
            log::info!("Trial {} released its reservation for removal", trial);
            ReleaseOutcome::Removal { reservation: id }
        };

        self.rebalance(&spec);
        self.enforce_limits();
        Ok(outcome)
    }

    /// Issues removal for every PendingRemoval reservation. Confirmed ones are
    /// untracked; failed ones are retried on the next call.
    pub fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for id in self.pending_removal.clone() {
            let Some(reservation) = self.store.get(id) else {
                self.pending_removal.retain(|other| *other != id);
                continue;
            };
            let name = reservation.name().clone();

            let result = match (reservation.placement_group_id.clone(), reservation.staging_handle) {
                (Some(placement_group_id), _) => self.backend.remove(&placement_group_id),
                (None, Some(handle)) => self.backend.cancel(handle),
                (None, None) => Ok(()),
            };

            match result {
                Ok(()) | Err(BackendError::UnknownPlacementGroup(_)) => {
                    self.untrack(id);
                    report.removed += 1;
                    log::debug!("Removed {}", name);
                }
                Err(source) => {
                    let err = Error::RemovalFailure { id: name.to_string(), source };
                    let failures = self.store.get_mut(id).map(|reservation| {
                        reservation.removal_failures += 1;
                        reservation.removal_failures
                    });
                    tracing::warn!(failures = failures.unwrap_or_default(), "{}; retrying on next cleanup", err);
                    report.retrying += 1;
                }
            }
        }

        report
    }

    /// Forwards queued requests, oldest first, while the number of Staging +
    /// Ready reservations is below `max_pending_reservations`. Returns the
    /// number of forwarded requests.
    pub fn enforce_limits(&mut self) -> usize {
        let mut dequeued = 0;
        while self.has_admission_budget() {
            let Some(spec) = self.queue.pop_front() else {
                break;
            };
            self.stage(spec);
            dequeued += 1;
        }
        dequeued
    }

    /// Withdraws one waiting request for `spec`, e.g. because its trial was
    /// cancelled before it got a reservation. Surplus supply is cancelled.
    pub fn cancel_request(&mut self, spec: &ResourceSpec) -> Result<()> {
        let waiting = self
            .waiting
            .get_mut(spec)
            .filter(|waiting| **waiting > 0)
            .ok_or_else(|| AssociationError::NoWaitingRequest { spec: spec.to_string() })?;
        *waiting -= 1;

        self.rebalance(spec);
        self.enforce_limits();
        Ok(())
    }

    /// Drops every queued and waiting request and schedules all Staging, Ready
    /// and Cached reservations for removal. InUse reservations stay until
    /// their trials release them; from now on releases never cache.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.queue.clear();
        self.waiting.clear();

        let idle: Vec<ReservationId> = self.staging.values().chain(self.ready.values()).chain(self.cached.values()).flatten().copied().collect();
        for id in idle {
            if let Err(e) = self.schedule_removal(id) {
                log::error!("Could not schedule reservation for removal during shutdown: {}", e);
            }
        }
        log::info!("Reservation pool shut down; {} reservation(s) pending removal", self.pending_removal.len());
    }

    /// Cross-checks tracked reservations against the backend snapshot.
    pub fn audit(&mut self) -> AuditReport {
        let mut report = AuditReport::default();
        let snapshot: HashMap<PlacementGroupId, BackendReservationState> = self.backend.snapshot().into_iter().collect();

        let placed: Vec<(ReservationId, PlacementGroupId)> = self
            .store
            .iter()
            .filter_map(|(id, reservation)| reservation.placement_group_id.clone().map(|placement_group_id| (id, placement_group_id)))
            .collect();

        let mut known = HashSet::new();
        let mut affected = Vec::new();

        for (id, placement_group_id) in placed {
            if snapshot.get(&placement_group_id) == Some(&BackendReservationState::Created) {
                known.insert(placement_group_id);
                continue;
            }

            let Some(reservation) = self.store.get_mut(id) else {
                continue;
            };
            if reservation.state() == ReservationState::InUse {
                reservation.lost = true;
                if let Some(trial) = reservation.trial.clone() {
                    log::warn!("Placement group {} of trial {} vanished from the backend", placement_group_id, trial);
                    report.lost_in_use.push(trial);
                }
                continue;
            }

            log::warn!("Placement group {} was removed outside the pool; untracking it", placement_group_id);
            if let Some(removed) = self.untrack(id) {
                affected.push(removed.spec().clone());
            }
            report.externally_removed += 1;
        }

        // A staged group may already exist on the backend before its handle is
        // polled, so orphans are only swept while nothing is in flight.
        let in_flight = !self.staging_handles.is_empty();
        for (placement_group_id, state) in &snapshot {
            if *state != BackendReservationState::Created || known.contains(placement_group_id) {
                continue;
            }
            if in_flight {
                log::debug!("Deferring orphan check of {} while {} creation(s) are in flight", placement_group_id, self.staging_handles.len());
                continue;
            }
            match self.backend.remove(placement_group_id) {
                Ok(()) => {
                    log::warn!("Removed orphaned placement group {}", placement_group_id);
                    report.orphans_removed += 1;
                }
                Err(e) => log::warn!("Could not remove orphaned placement group {}: {}", placement_group_id, e),
            }
        }

        for spec in affected {
            self.rebalance(&spec);
        }
        self.enforce_limits();
        report
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.store.get(id)
    }

    pub fn reservation_by_name(&self, name: &ReservationName) -> Option<ReservationId> {
        self.store.get_by_name(name)
    }

    pub fn reservation_of(&self, trial: &TrialId) -> Option<ReservationId> {
        self.associations.get_by_left(trial).copied()
    }

    /// Active trial to reservation associations, ordered by trial id.
    pub fn associations(&self) -> Vec<(TrialId, ReservationId)> {
        let mut associations: Vec<(TrialId, ReservationId)> = self.associations.iter().map(|(trial, id)| (trial.clone(), *id)).collect();
        associations.sort_by(|a, b| a.0.cmp(&b.0));
        associations
    }

    pub fn waiting_requests(&self, spec: &ResourceSpec) -> usize {
        self.waiting.get(spec).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats { latest_staging_start: self.latest_staging_start, ..Default::default() };

        for (_, reservation) in self.store.iter() {
            stats.totals.add(reservation.state());
            stats.by_spec.entry(reservation.spec().clone()).or_default().add(reservation.state());
        }
        for spec in &self.queue {
            stats.totals.queued += 1;
            stats.by_spec.entry(spec.clone()).or_default().queued += 1;
        }
        stats
    }

    /// Placement groups the backend reports as created and not removed.
    pub fn backend_live_count(&self) -> usize {
        self.backend.live_count()
    }

    /// True once nothing is tracked, queued or outstanding.
    pub fn is_idle(&self) -> bool {
        self.store.is_empty()
            && self.queue.is_empty()
            && self.staging_handles.is_empty()
            && self.staging.is_empty()
            && self.ready.is_empty()
            && self.cached.is_empty()
            && self.in_use.is_empty()
            && self.pending_removal.is_empty()
            && self.associations.is_empty()
    }

    fn now(&self) -> i64 {
        self.simulator.get_current_time_in_ms()
    }

    fn outstanding(&self) -> usize {
        total_len(&self.staging) + total_len(&self.ready)
    }

    fn has_admission_budget(&self) -> bool {
        match self.config.max_pending_reservations {
            Some(limit) => self.outstanding() < limit,
            None => true,
        }
    }

    fn queued_for(&self, spec: &ResourceSpec) -> usize {
        self.queue.iter().filter(|queued| *queued == spec).count()
    }

    /// Supply that is not Cached: queued requests, Staging and Ready reservations.
    fn pending_supply(&self, spec: &ResourceSpec) -> usize {
        self.queued_for(spec) + len_of(&self.staging, spec) + len_of(&self.ready, spec)
    }

    fn supply(&self, spec: &ResourceSpec) -> usize {
        self.pending_supply(spec) + len_of(&self.cached, spec)
    }

    fn forward_or_queue(&mut self, spec: ResourceSpec) -> RequestOutcome {
        if self.queue.is_empty() && self.has_admission_budget() {
            return RequestOutcome::Staged(self.stage(spec));
        }

        self.queue.push_back(spec);
        let position = self.queue.len() - 1;
        log::debug!("Admission limit reached; request queued at position {}", position);
        RequestOutcome::Queued { position }
    }

    fn stage(&mut self, spec: ResourceSpec) -> ReservationId {
        let handle = self.backend.create(&spec);
        let now = self.now();
        let seq = self.next_seq;
        self.next_seq += 1;

        let name = ReservationName::new(format!("pg-{}", Uuid::new_v4().simple()));
        log::debug!("Staging {} for {} ({})", name, spec, handle);

        let id = self.store.add(Reservation::new_staging(name, spec.clone(), seq, handle, now));
        self.staging.entry(spec).or_default().push_back(id);
        self.staging_handles.insert(handle, id);
        self.latest_staging_start = Some(now);
        id
    }

    fn promote(&mut self, id: ReservationId, placement_group_id: PlacementGroupId) -> bool {
        let now = self.now();
        let Some(reservation) = self.store.get_mut(id) else {
            log::warn!("Backend completed {} for an untracked reservation; removing it", placement_group_id);
            self.discard(&placement_group_id);
            return false;
        };

        if let Err(e) = reservation.transition(ReservationState::Ready, now) {
            log::error!("Cannot promote {}: {}; removing {}", reservation.name(), e, placement_group_id);
            self.discard(&placement_group_id);
            return false;
        }
        reservation.staging_handle = None;
        reservation.placement_group_id = Some(placement_group_id);
        let spec = reservation.spec().clone();
        log::info!("{} is ready ({})", reservation.name(), spec);

        remove_from(&mut self.staging, &spec, id);
        insert_by_seq(self.ready.entry(spec).or_default(), &self.store, id);
        true
    }

    /// Removes a placement group the pool will not track. Failures are left to
    /// the orphan sweep of the next audit.
    fn discard(&mut self, placement_group_id: &PlacementGroupId) {
        match self.backend.remove(placement_group_id) {
            Ok(()) | Err(BackendError::UnknownPlacementGroup(_)) => {}
            Err(e) => log::warn!("Could not remove untracked placement group {}: {}", placement_group_id, e),
        }
    }

    fn handle_creation_failure(&mut self, id: ReservationId, reason: String, retryable: bool, report: &mut ReconcileReport) {
        let Some(reservation) = self.store.get(id) else {
            return;
        };
        let spec = reservation.spec().clone();
        let name = reservation.name().clone();
        let attempts = reservation.creation_attempts;

        if retryable && attempts <= self.config.max_creation_retries {
            tracing::warn!(reservation = %name, attempt = attempts, "Placement group creation failed ({}), retrying", reason);
            let handle = self.backend.create(&spec);
            if let Some(reservation) = self.store.get_mut(id) {
                reservation.staging_handle = Some(handle);
                reservation.creation_attempts += 1;
            }
            self.staging_handles.insert(handle, id);
            report.retried += 1;
            return;
        }

        self.untrack(id);
        if let Some(waiting) = self.waiting.get_mut(&spec) {
            *waiting = waiting.saturating_sub(1);
        }

        let err = Error::CreationFailure { spec: spec.to_string(), reason, attempts };
        log::error!("{}", err);
        report.failures.push((spec, err));
    }

    /// Moves a Staging, Ready, Cached or InUse reservation to PendingRemoval.
    fn schedule_removal(&mut self, id: ReservationId) -> std::result::Result<(), AssociationError> {
        let now = self.now();
        let reservation = self.store.get_mut(id).ok_or(AssociationError::UnknownReservation)?;
        let previous = reservation.state();
        reservation.transition(ReservationState::PendingRemoval, now)?;
        let spec = reservation.spec().clone();
        let handle = reservation.staging_handle;
        log::debug!("{} ({:?}) scheduled for removal", reservation.name(), previous);

        match previous {
            ReservationState::Staging => {
                remove_from(&mut self.staging, &spec, id);
                if let Some(handle) = handle {
                    self.staging_handles.remove(&handle);
                }
            }
            ReservationState::Ready => {
                remove_from(&mut self.ready, &spec, id);
            }
            ReservationState::Cached => {
                remove_from(&mut self.cached, &spec, id);
            }
            ReservationState::InUse => {
                self.in_use.remove(&id);
                self.associations.remove_by_right(&id);
            }
            ReservationState::PendingRemoval => {}
        }

        self.pending_removal.push(id);
        Ok(())
    }

    /// Forgets a reservation entirely.
    fn untrack(&mut self, id: ReservationId) -> Option<Reservation> {
        let reservation = self.store.remove(id)?;
        let spec = reservation.spec();

        match reservation.state() {
            ReservationState::Staging => {
                remove_from(&mut self.staging, spec, id);
                if let Some(handle) = reservation.staging_handle {
                    self.staging_handles.remove(&handle);
                }
            }
            ReservationState::Ready => {
                remove_from(&mut self.ready, spec, id);
            }
            ReservationState::Cached => {
                remove_from(&mut self.cached, spec, id);
            }
            ReservationState::InUse => {
                self.in_use.remove(&id);
                self.associations.remove_by_right(&id);
            }
            ReservationState::PendingRemoval => {
                self.pending_removal.retain(|other| *other != id);
            }
        }
        Some(reservation)
    }

    /// Matches supply of `spec` to its waiting requests: missing supply is
    /// requested, surplus is trimmed newest first (queued requests, then
    /// Staging, then Ready reservations).
    fn rebalance(&mut self, spec: &ResourceSpec) {
        let waiting = self.waiting_requests(spec);
        let target = waiting.saturating_sub(len_of(&self.cached, spec));

        while self.pending_supply(spec) > target {
            if let Some(position) = self.queue.iter().rposition(|queued| queued == spec) {
                self.queue.remove(position);
                continue;
            }

            let newest = self.staging.get(spec).and_then(|ids| ids.back().copied()).or_else(|| self.ready.get(spec).and_then(|ids| ids.back().copied()));
            match newest {
                Some(id) => {
                    if let Err(e) = self.schedule_removal(id) {
                        log::error!("Could not cancel surplus reservation: {}", e);
                        break;
                    }
                }
                None => break,
            }
        }

        while self.supply(spec) < waiting {
            self.forward_or_queue(spec.clone());
        }

        if waiting == 0 {
            self.waiting.remove(spec);
        }
    }
}

fn len_of(index: &SpecIndex, spec: &ResourceSpec) -> usize {
    index.get(spec).map(VecDeque::len).unwrap_or(0)
}

fn total_len(index: &SpecIndex) -> usize {
    index.values().map(VecDeque::len).sum()
}

fn remove_from(index: &mut SpecIndex, spec: &ResourceSpec, id: ReservationId) -> bool {
    let Some(ids) = index.get_mut(spec) else {
        return false;
    };
    let found = match ids.iter().position(|other| *other == id) {
        Some(position) => {
            ids.remove(position);
            true
        }
        None => false,
    };
    if ids.is_empty() {
        index.remove(spec);
    }
    found
}

/// Completions arrive in any order; Ready reservations are kept in creation order.
fn insert_by_seq(ids: &mut VecDeque<ReservationId>, store: &ReservationStore, id: ReservationId) {
    let seq_of = |id: ReservationId| store.get(id).map(|reservation| reservation.seq).unwrap_or(u64::MAX);
    let seq = seq_of(id);
    let position = ids.iter().position(|other| seq_of(*other) > seq).unwrap_or(ids.len());
    ids.insert(position, id);
}

#[cfg(test)]
impl ReservationPoolManager {
    /// Per-state counts taken from the collections instead of the reservations' own state.
    fn index_counts(&self) -> crate::domain::reservation_pool::pool::pool_stats::StateCounts {
        crate::domain::reservation_pool::pool::pool_stats::StateCounts {
            staging: total_len(&self.staging),
            ready: total_len(&self.ready),
            in_use: self.in_use.len(),
            cached: total_len(&self.cached),
            pending_removal: self.pending_removal.len(),
            queued: self.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reservation_pool::backend::cluster_simulator::ClusterSimulator;
    use crate::domain::simulator::simulator_mock::MockSimulator;
    use tracing_test::traced_test;

    fn spec() -> ResourceSpec {
        ResourceSpec::from_bundles(vec![vec![("CPU", 1.0)]])
    }

    fn pool(config: PoolConfig, cluster: &ClusterSimulator) -> ReservationPoolManager {
        ReservationPoolManager::new(config, Box::new(cluster.clone()), Arc::new(MockSimulator::new(0))).unwrap()
    }

    fn assert_indexes_match_states(pool: &ReservationPoolManager) {
        assert_eq!(pool.index_counts(), pool.stats().totals);
    }

    #[test]
    fn indexes_follow_every_transition() {
        let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
        let mut pool = pool(PoolConfig::default().with_reuse(true).with_max_pending_reservations(2), &cluster);
        let trial = TrialId::new("t1");

        for _ in 0..3 {
            pool.request(&spec()).unwrap();
        }
        assert_indexes_match_states(&pool);

        pool.reconcile();
        assert_indexes_match_states(&pool);

        let id = pool.get_ready(&spec()).unwrap();
        pool.assign(&trial, id).unwrap();
        assert_indexes_match_states(&pool);

        pool.release(&trial, true).unwrap();
        assert_indexes_match_states(&pool);

        pool.shutdown();
        assert_indexes_match_states(&pool);
        pool.cleanup();
        assert!(pool.is_idle());
    }

    #[test]
    fn ready_reservations_keep_creation_order() {
        let mut store = ReservationStore::new();
        let ids: Vec<ReservationId> = (0..3)
            .map(|seq| store.add(Reservation::new_staging(ReservationName::new(format!("pg-{}", seq)), spec(), seq, StagingHandle(seq), 0)))
            .collect();

        let mut ready = VecDeque::new();
        insert_by_seq(&mut ready, &store, ids[2]);
        insert_by_seq(&mut ready, &store, ids[0]);
        insert_by_seq(&mut ready, &store, ids[1]);
        assert_eq!(ready, VecDeque::from(ids));
    }

    #[test]
    #[traced_test]
    fn failed_creations_are_retried_with_a_warning() {
        let cluster = ClusterSimulator::single_node(vec![("CPU", 1.0)]);
        let mut pool = pool(PoolConfig::default(), &cluster);

        pool.request(&spec()).unwrap();
        cluster.fail_next_creations(1);

        let report = pool.reconcile();
        assert_eq!(report.retried, 1);
        assert!(report.failures.is_empty());
        assert!(logs_contain("retrying"));

        let report = pool.reconcile();
        assert_eq!(report.promoted.len(), 1);
        assert_eq!(cluster.create_calls(), 2);
    }

    #[test]
    #[traced_test]
    fn removal_failures_are_logged_and_retried() {
        let cluster = ClusterSimulator::single_node(vec![("CPU", 1.0)]);
        let mut pool = pool(PoolConfig::default(), &cluster);
        let trial = TrialId::new("t1");

        pool.request(&spec()).unwrap();
        pool.reconcile();
        let id = pool.get_ready(&spec()).unwrap();
        pool.assign(&trial, id).unwrap();
        pool.release(&trial, false).unwrap();

        cluster.fail_next_removals(1);
        assert_eq!(pool.cleanup(), CleanupReport { removed: 0, retrying: 1 });
        assert!(logs_contain("retrying on next cleanup"));
        assert_eq!(pool.cleanup(), CleanupReport { removed: 1, retrying: 0 });
        assert!(pool.is_idle());
    }

    #[test]
    fn groups_that_cannot_be_promoted_are_removed() {
        let cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
        let mut pool = pool(PoolConfig::default(), &cluster);

        pool.request(&spec()).unwrap();
        pool.reconcile();
        let id = pool.get_ready(&spec()).unwrap();

        let mut direct = cluster.clone();
        let handle = direct.create(&spec());
        let CreationStatus::Ready(extra) = direct.poll(handle) else {
            panic!("expected the second group to be placed");
        };
        assert_eq!(pool.backend_live_count(), 2);

        assert!(!pool.promote(id, extra.clone()));
        assert_eq!(pool.backend_live_count(), 1);
        assert_eq!(pool.reservation(id).unwrap().state(), ReservationState::Ready);
        assert_ne!(pool.reservation(id).unwrap().placement_group_id(), Some(&extra));
    }
}
