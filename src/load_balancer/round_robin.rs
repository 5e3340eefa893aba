//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, Strategy};

/// Round-robin selector.
/// Advances a shared rotation counter to cycle through healthy backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: Arc<AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a rotation counter that outlives this selector (survives reloads).
    pub fn with_counter(counter: Arc<AtomicUsize>) -> Self {
        Self { counter }
    }
}

impl Strategy for RoundRobin {
    fn select(&self, backends: &[Arc<Backend>], _client: &str) -> Option<usize> {
        let len = backends.len();
        // One counter step per attempt so a skipped backend does not shift
        // the whole rotation onto its neighbour.
        for _ in 0..len {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % len;
            if backends[index].is_healthy() {
                return Some(index);
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
