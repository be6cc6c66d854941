pub mod reservation_pool;
pub mod simulator;
