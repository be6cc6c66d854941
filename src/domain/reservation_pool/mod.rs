pub mod backend;
pub mod executor;
pub mod pool;
pub mod reservation;
pub mod resource;
pub mod utils;
