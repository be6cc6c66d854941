use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::api::pool_dto::ClockDto;

/// Time source of the pool. Reservation timestamps are taken from here so
/// tests can run against a deterministic clock.
pub trait SystemSimulator: std::fmt::Debug + Send + Sync {
    fn get_current_time_in_s(&self) -> i64;
    fn get_current_time_in_ms(&self) -> i64;
}

/// Wall clock. In simulation mode time is reported relative to the moment the
/// simulator was constructed instead of the unix epoch.
#[derive(Debug, Clone)]
pub struct Simulator {
    is_simulation: bool,
    real_time_base_timestamp: i64,
}

impl Simulator {
    pub fn new(is_simulation: bool) -> Simulator {
        Simulator { is_simulation, real_time_base_timestamp: Self::get_system_time_ms() }
    }

    pub fn shared(is_simulation: bool) -> Arc<dyn SystemSimulator> {
        Arc::new(Self::new(is_simulation))
    }

    fn get_system_time_ms() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as i64
    }
}

impl From<ClockDto> for Simulator {
    fn from(dto: ClockDto) -> Self {
        Simulator::new(dto.is_simulation)
    }
}

impl SystemSimulator for Simulator {
    fn get_current_time_in_s(&self) -> i64 {
        self.get_current_time_in_ms() / 1000
    }

    fn get_current_time_in_ms(&self) -> i64 {
        let now = Self::get_system_time_ms();
        if self.is_simulation { now - self.real_time_base_timestamp } else { now }
    }
}
