use crate::domain::simulator::simulator::SystemSimulator;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Manually driven clock. Clones share the same time, so a test can keep one
/// handle and advance the clock the pool reads from.
#[derive(Debug, Clone)]
pub struct MockSimulator {
    time_ms: Arc<AtomicI64>,
}

impl MockSimulator {
    pub fn new(time_ms: i64) -> MockSimulator {
        MockSimulator { time_ms: Arc::new(AtomicI64::new(time_ms)) }
    }

    pub fn set_current_time(&self, time_ms: i64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.time_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl SystemSimulator for MockSimulator {
    fn get_current_time_in_s(&self) -> i64 {
        self.get_current_time_in_ms() / 1000
    }

    fn get_current_time_in_ms(&self) -> i64 {
        self.time_ms.load(Ordering::SeqCst)
    }
}
