use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api::pool_dto::ClusterDto;
use crate::domain::reservation_pool::backend::backend_trait::{BackendReservationState, CreationStatus, ReservationBackend, StagingHandle};
use crate::domain::reservation_pool::resource::resource_spec::{Bundle, ResourceSpec};
use crate::domain::reservation_pool::utils::id::{NodeId, PlacementGroupId};
use crate::error::{BackendError, Error};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
struct NodeState {
    id: NodeId,
    capacity: BTreeMap<String, f64>,
    available: BTreeMap<String, f64>,
}

impl NodeState {
    fn fits(resources: &BTreeMap<String, f64>, bundle: &Bundle) -> bool {
        bundle.iter().all(|(name, amount)| resources.get(name).copied().unwrap_or(0.0) + EPSILON >= amount)
    }
}

#[derive(Debug)]
struct PendingGroup {
    spec: ResourceSpec,
    polls: u32,
}

#[derive(Debug)]
struct PlacedGroup {
    spec: ResourceSpec,
    /// Node index of every bundle.
    placement: Vec<usize>,
    state: BackendReservationState,
}

#[derive(Debug)]
struct ClusterState {
    nodes: Vec<NodeState>,
    next_handle: u64,
    next_group: u64,
    pending: BTreeMap<StagingHandle, PendingGroup>,
    groups: BTreeMap<PlacementGroupId, PlacedGroup>,

    /// Polls a group stays pending before the simulator tries to place it.
    ready_after_polls: u32,
    /// Chance that a placeable group is placed on a given poll.
    grant_probability: f64,
    rng: StdRng,

    fail_creations: u32,
    fail_removals: u32,

    create_calls: usize,
    remove_calls: usize,
    cancel_calls: usize,
}

impl ClusterState {
    fn is_infeasible<'a>(&self, spec: &'a ResourceSpec) -> Option<&'a Bundle> {
        spec.bundles().iter().find(|bundle| !self.nodes.iter().any(|node| NodeState::fits(&node.capacity, bundle)))
    }

    /// First-fit placement of every bundle against a tentative copy of the
    /// free resources. Either all bundles fit or nothing is placed.
    fn try_place(&self, spec: &ResourceSpec) -> Option<Vec<usize>> {
        let mut tentative: Vec<BTreeMap<String, f64>> = self.nodes.iter().map(|node| node.available.clone()).collect();
        let mut placement = Vec::with_capacity(spec.num_bundles());

        for bundle in spec.bundles() {
            let index = tentative.iter().position(|available| NodeState::fits(available, bundle))?;
            for (name, amount) in bundle.iter() {
                if let Some(free) = tentative[index].get_mut(name) {
                    *free -= amount;
                }
            }
            placement.push(index);
        }
        Some(placement)
    }

    fn commit(&mut self, spec: &ResourceSpec, placement: &[usize]) {
        for (bundle, &index) in spec.bundles().iter().zip(placement) {
            for (name, amount) in bundle.iter() {
                if let Some(free) = self.nodes[index].available.get_mut(name) {
                    *free -= amount;
                }
            }
        }
    }

    fn release(&mut self, id: &PlacementGroupId) {
        let Some(group) = self.groups.get_mut(id) else {
            return;
        };
        if group.state == BackendReservationState::Removed {
            return;
        }
        group.state = BackendReservationState::Removed;

        for (bundle, &index) in group.spec.bundles().iter().zip(&group.placement) {
            let node = &mut self.nodes[index];
            for (name, amount) in bundle.iter() {
                if let Some(free) = node.available.get_mut(name) {
                    let cap = node.capacity.get(name).copied().unwrap_or(0.0);
                    *free = (*free + amount).min(cap);
                }
            }
        }
    }
}

/// In-memory cluster backend.
///
/// Groups are placed lazily when their handle is polled, so progress is made
/// exactly once per control-loop tick. Clones share the same cluster, which
/// lets tests keep a handle for failure injection and call counting after the
/// backend was moved into a pool.
#[derive(Debug, Clone)]
pub struct ClusterSimulator {
    state: Arc<Mutex<ClusterState>>,
}

impl ClusterSimulator {
    pub fn new<K: Into<String>>(nodes: impl IntoIterator<Item = (NodeId, Vec<(K, f64)>)>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|(id, resources)| {
                let capacity: BTreeMap<String, f64> = resources.into_iter().map(|(name, amount)| (name.into(), amount)).collect();
                NodeState { id, available: capacity.clone(), capacity }
            })
            .collect();

        let state = ClusterState {
            nodes,
            next_handle: 0,
            next_group: 0,
            pending: BTreeMap::new(),
            groups: BTreeMap::new(),
            ready_after_polls: 0,
            grant_probability: 1.0,
            rng: StdRng::seed_from_u64(0),
            fail_creations: 0,
            fail_removals: 0,
            create_calls: 0,
            remove_calls: 0,
            cancel_calls: 0,
        };

        ClusterSimulator { state: Arc::new(Mutex::new(state)) }
    }

    pub fn single_node<K: Into<String>>(resources: Vec<(K, f64)>) -> Self {
        Self::new(vec![(NodeId::new("head"), resources)])
    }

    /// Groups stay pending for `polls` polls before placement is attempted.
    pub fn with_ready_after_polls(self, polls: u32) -> Self {
        self.state().ready_after_polls = polls;
        self
    }

    /// Placeable groups are only placed with the given probability per poll,
    /// which makes completions arrive out of request order.
    pub fn with_grant_probability(self, probability: f64, seed: u64) -> Self {
        {
            let mut state = self.state();
            state.grant_probability = probability.clamp(0.0, 1.0);
            state.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    /// The next `count` placements fail instead of succeeding.
    pub fn fail_next_creations(&self, count: u32) {
        self.state().fail_creations = count;
    }

    /// The next `count` remove/cancel calls report a transient error.
    pub fn fail_next_removals(&self, count: u32) {
        self.state().fail_removals = count;
    }

    /// Removes a group behind the pool's back, e.g. after a node loss.
    pub fn remove_externally(&self, id: &PlacementGroupId) {
        self.state().release(id);
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn remove_calls(&self) -> usize {
        self.state().remove_calls
    }

    pub fn cancel_calls(&self) -> usize {
        self.state().cancel_calls
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Free amount of `resource` summed over all nodes.
    pub fn available(&self, resource: &str) -> f64 {
        self.state().nodes.iter().map(|node| node.available.get(resource).copied().unwrap_or(0.0)).sum()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.state().nodes.iter().map(|node| node.id.clone()).collect()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TryFrom<ClusterDto> for ClusterSimulator {
    type Error = Error;

    fn try_from(dto: ClusterDto) -> Result<Self, Self::Error> {
        if dto.nodes.is_empty() {
            return Err(Error::ConfigError("cluster has no nodes".to_string()));
        }

        let mut nodes = Vec::with_capacity(dto.nodes.len());
        for node in dto.nodes {
            if let Some((name, amount)) = node.resources.iter().find(|(_, amount)| !amount.is_finite() || **amount < 0.0) {
                return Err(Error::ConfigError(format!("node '{}' has invalid capacity {} for '{}'", node.id, amount, name)));
            }
            let resources: Vec<(String, f64)> = node.resources.into_iter().collect();
            nodes.push((NodeId::new(node.id), resources));
        }

        let probability = dto.grant_probability.unwrap_or(1.0);
        Ok(ClusterSimulator::new(nodes).with_ready_after_polls(dto.ready_after_polls).with_grant_probability(probability, dto.seed))
    }
}

impl ReservationBackend for ClusterSimulator {
    fn name(&self) -> &str {
        "cluster-simulator"
    }

    fn create(&mut self, spec: &ResourceSpec) -> StagingHandle {
        let mut state = self.state();
        state.create_calls += 1;

        let handle = StagingHandle(state.next_handle);
        state.next_handle += 1;
        state.pending.insert(handle, PendingGroup { spec: spec.clone(), polls: 0 });

        log::debug!("Simulator accepted placement group request {} for {}", handle, spec);
        handle
    }

    fn poll(&mut self, handle: StagingHandle) -> CreationStatus {
        let mut state = self.state();
        let ready_after_polls = state.ready_after_polls;

        let spec = match state.pending.get_mut(&handle) {
            Some(pending) => {
                pending.polls += 1;
                if pending.polls <= ready_after_polls {
                    return CreationStatus::Pending;
                }
                pending.spec.clone()
            }
            None => return CreationStatus::Failed(format!("unknown staging handle {}", handle)),
        };

        if let Some(bundle) = state.is_infeasible(&spec) {
            let reason = format!("bundle {} does not fit on any node", bundle);
            state.pending.remove(&handle);
            return CreationStatus::Infeasible(reason);
        }

        let Some(placement) = state.try_place(&spec) else {
            return CreationStatus::Pending;
        };

        let probability = state.grant_probability;
        if probability < 1.0 && !state.rng.random_bool(probability) {
            return CreationStatus::Pending;
        }

        state.pending.remove(&handle);

        if state.fail_creations > 0 {
            state.fail_creations -= 1;
            return CreationStatus::Failed("injected creation failure".to_string());
        }

        state.commit(&spec, &placement);
        let id = PlacementGroupId::new(format!("pg_{:06}", state.next_group));
        state.next_group += 1;
        state.groups.insert(id.clone(), PlacedGroup { spec, placement, state: BackendReservationState::Created });

        CreationStatus::Ready(id)
    }

    fn cancel(&mut self, handle: StagingHandle) -> Result<(), BackendError> {
        let mut state = self.state();
        state.cancel_calls += 1;

        if state.fail_removals > 0 {
            state.fail_removals -= 1;
            return Err(BackendError::Unavailable("injected cancel failure".to_string()));
        }

        state.pending.remove(&handle);
        Ok(())
    }

    fn remove(&mut self, id: &PlacementGroupId) -> Result<(), BackendError> {
        let mut state = self.state();
        state.remove_calls += 1;

        if state.fail_removals > 0 {
            state.fail_removals -= 1;
            return Err(BackendError::Unavailable("injected removal failure".to_string()));
        }

        if !state.groups.contains_key(id) {
            return Err(BackendError::UnknownPlacementGroup(id.clone()));
        }
        state.release(id);
        Ok(())
    }

    fn snapshot(&self) -> Vec<(PlacementGroupId, BackendReservationState)> {
        self.state().groups.iter().map(|(id, group)| (id.clone(), group.state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cpus: f64) -> ResourceSpec {
        ResourceSpec::from_bundles(vec![vec![("CPU", cpus)]])
    }

    fn ready_id(status: CreationStatus) -> PlacementGroupId {
        match status {
            CreationStatus::Ready(id) => id,
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn places_groups_until_capacity_is_exhausted() {
        let mut cluster = ClusterSimulator::single_node(vec![("CPU", 8.0)]);
        let a = cluster.create(&spec(4.0));
        let b = cluster.create(&spec(4.0));
        let c = cluster.create(&spec(4.0));

        let a_id = ready_id(cluster.poll(a));
        ready_id(cluster.poll(b));
        assert_eq!(cluster.poll(c), CreationStatus::Pending);
        assert_eq!(cluster.live_count(), 2);

        cluster.remove(&a_id).unwrap();
        ready_id(cluster.poll(c));
        assert_eq!(cluster.create_calls(), 3);
    }

    #[test]
    fn placement_is_atomic_across_bundles() {
        let mut cluster = ClusterSimulator::new(vec![(NodeId::new("a"), vec![("CPU", 2.0)]), (NodeId::new("b"), vec![("CPU", 2.0)])]);
        let three = ResourceSpec::from_bundles(vec![vec![("CPU", 1.0)], vec![("CPU", 2.0)], vec![("CPU", 2.0)]]);
        let handle = cluster.create(&three);

        assert_eq!(cluster.poll(handle), CreationStatus::Pending);
        assert_eq!(cluster.available("CPU"), 4.0);
    }

    #[test]
    fn infeasible_specs_fail() {
        let mut cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
        let handle = cluster.create(&spec(3.0));
        assert!(matches!(cluster.poll(handle), CreationStatus::Infeasible(_)));
        assert_eq!(cluster.pending_count(), 0);
    }

    #[test]
    fn removal_is_idempotent_and_failures_are_injectable() {
        let mut cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]);
        let handle = cluster.create(&spec(2.0));
        let id = ready_id(cluster.poll(handle));

        cluster.fail_next_removals(1);
        assert!(cluster.remove(&id).is_err());
        assert!(cluster.remove(&id).is_ok());
        assert!(cluster.remove(&id).is_ok());
        assert_eq!(cluster.live_count(), 0);
        assert_eq!(cluster.snapshot(), vec![(id, BackendReservationState::Removed)]);
        assert_eq!(cluster.available("CPU"), 2.0);
    }

    #[test]
    fn ready_after_polls_delays_placement() {
        let mut cluster = ClusterSimulator::single_node(vec![("CPU", 2.0)]).with_ready_after_polls(2);
        let handle = cluster.create(&spec(1.0));
        assert_eq!(cluster.poll(handle), CreationStatus::Pending);
        assert_eq!(cluster.poll(handle), CreationStatus::Pending);
        ready_id(cluster.poll(handle));
    }

    #[test]
    fn cancel_drops_pending_creation() {
        let mut cluster = ClusterSimulator::single_node(vec![("CPU", 1.0)]);
        let first = cluster.create(&spec(1.0));
        let second = cluster.create(&spec(1.0));
        ready_id(cluster.poll(first));

        cluster.cancel(second).unwrap();
        assert_eq!(cluster.pending_count(), 0);
        assert!(matches!(cluster.poll(second), CreationStatus::Failed(_)));
    }
}
