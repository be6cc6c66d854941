use serde::Serialize;

use crate::api::pool_dto::TrialGroupDto;
use crate::domain::reservation_pool::resource::resource_spec::ResourceSpec;
use crate::domain::reservation_pool::utils::id::TrialId;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Terminated,
    Error,
}

impl TrialStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TrialStatus::Terminated | TrialStatus::Error)
    }
}

/// A unit of work that occupies one reservation for a fixed number of ticks.
#[derive(Debug, Clone)]
pub struct Trial {
    id: TrialId,
    spec: ResourceSpec,
    duration_ticks: u64,
    status: TrialStatus,

    remaining_ticks: u64,

    /// Tick in which the trial asked the pool for a reservation.
    pub(crate) requested_at: Option<u64>,
    pub(crate) started_at: Option<u64>,
    pub(crate) finished_at: Option<u64>,
}

impl Trial {
    pub fn new(id: TrialId, spec: ResourceSpec, duration_ticks: u64) -> Self {
        Trial { id, spec, duration_ticks, status: TrialStatus::Pending, remaining_ticks: duration_ticks, requested_at: None, started_at: None, finished_at: None }
    }

    /// Expands trial groups into individual trials named `trial_00000`, `trial_00001`, ...
    pub fn from_groups(groups: Vec<TrialGroupDto>) -> Result<Vec<Trial>> {
        let mut trials = Vec::new();
        for group in groups {
            if group.duration_ticks == 0 {
                return Err(Error::ConfigError("Trial duration must be at least one tick".to_string()));
            }
            let spec = ResourceSpec::try_from(group.resources)?;
            for _ in 0..group.count {
                let id = TrialId::new(format!("trial_{:05}", trials.len()));
                trials.push(Trial::new(id, spec.clone(), group.duration_ticks));
            }
        }
        Ok(trials)
    }

    pub fn id(&self) -> &TrialId {
        &self.id
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn duration_ticks(&self) -> u64 {
        self.duration_ticks
    }

    pub fn status(&self) -> TrialStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<u64> {
        self.finished_at
    }

    /// Pending and already waiting on the pool.
    pub(crate) fn is_waiting(&self) -> bool {
        self.status == TrialStatus::Pending && self.requested_at.is_some()
    }

    pub(crate) fn start(&mut self, tick: u64) {
        self.status = TrialStatus::Running;
        self.started_at = Some(tick);
    }

    /// Advances a running trial by one tick. Returns true once its work is done.
    pub(crate) fn advance(&mut self) -> bool {
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
        self.remaining_ticks == 0
    }

    pub(crate) fn finish(&mut self, tick: u64, status: TrialStatus) {
        self.status = status;
        self.finished_at = Some(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::pool_dto::ResourceSpecDto;
    use std::collections::HashMap;

    fn group(count: usize, duration_ticks: u64) -> TrialGroupDto {
        TrialGroupDto { count, resources: ResourceSpecDto { bundles: vec![HashMap::from([("CPU".to_string(), 1.0)])] }, duration_ticks }
    }

    #[test]
    fn groups_expand_into_named_trials() {
        let trials = Trial::from_groups(vec![group(2, 3), group(1, 5)]).unwrap();

        let ids: Vec<&str> = trials.iter().map(|trial| trial.id().as_str()).collect();
        assert_eq!(ids, vec!["trial_00000", "trial_00001", "trial_00002"]);
        assert_eq!(trials[2].duration_ticks(), 5);
        assert!(trials.iter().all(|trial| trial.status() == TrialStatus::Pending));
    }

    #[test]
    fn zero_duration_is_rejected() {
        assert!(matches!(Trial::from_groups(vec![group(1, 0)]), Err(Error::ConfigError(_))));
    }

    #[test]
    fn running_trial_finishes_after_its_duration() {
        let mut trial = Trial::from_groups(vec![group(1, 2)]).unwrap().remove(0);
        trial.start(1);
        assert!(!trial.advance());
        assert!(trial.advance());
        trial.finish(2, TrialStatus::Terminated);
        assert!(trial.status().is_terminal());
        assert_eq!(trial.finished_at(), Some(2));
    }
}
