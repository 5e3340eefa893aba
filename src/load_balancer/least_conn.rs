//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, Strategy};

/// Least connections selector.
/// Selects the healthy backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastConnections {
    fn select(&self, backends: &[Arc<Backend>], _client: &str) -> Option<usize> {
        // Each backend is read under its own lock; in case of tie the first
        // one wins (min_by_key keeps the earliest minimum).
        backends
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                let state = b.state();
                state.healthy.then_some((i, state.active_connections))
            })
            .min_by_key(|&(_, active)| active)
            .map(|(i, _)| i)
    }

    fn name(&self) -> &'static str {
        "least_conn"
    }
}
