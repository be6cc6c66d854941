pub mod backend_trait;
pub mod cluster_simulator;
