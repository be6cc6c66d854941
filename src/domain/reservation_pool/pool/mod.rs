pub mod pool_config;
pub mod pool_manager;
pub mod pool_report;
pub mod pool_stats;
