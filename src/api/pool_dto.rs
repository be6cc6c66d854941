use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Root of a JSON run description consumed by the demo binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDto {
    pub pool: PoolConfigDto,
    pub cluster: ClusterDto,
    pub trials: Vec<TrialGroupDto>,
    #[serde(default)]
    pub clock: ClockDto,
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfigDto {
    /// Upper bound of Staging + Ready reservations. Unbounded if absent.
    #[serde(default)]
    pub max_pending_reservations: Option<usize>,
    #[serde(default)]
    pub reuse_enabled: bool,
    #[serde(default)]
    pub cache_capacity_per_spec: Option<usize>,
    #[serde(default)]
    pub max_creation_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpecDto {
    pub bundles: Vec<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub id: String,
    pub resources: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDto {
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub ready_after_polls: u32,
    #[serde(default)]
    pub grant_probability: Option<f64>,
    #[serde(default)]
    pub seed: u64,
}

/// `count` identical trials, each holding its reservation for `duration_ticks`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialGroupDto {
    #[serde(default = "default_trial_count")]
    pub count: usize,
    pub resources: ResourceSpecDto,
    pub duration_ticks: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockDto {
    #[serde(default)]
    pub is_simulation: bool,
}

fn default_trial_count() -> usize {
    1
}
