//! Smooth weighted round-robin strategy.
//!
//! Every healthy backend gains its static weight on each pick; the one with
//! the largest accumulated weight wins and pays back the total. Weights 3:1
//! produce `A, A, B, A` instead of `A, A, A, B`.
//!
//! The total counts healthy backends only, so the accumulators of the
//! remaining backends stay balanced while one is down.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, Strategy};

#[derive(Debug, Default)]
pub struct WeightedRoundRobin;

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for WeightedRoundRobin {
    fn select(&self, backends: &[Arc<Backend>], _client: &str) -> Option<usize> {
        let mut total: i64 = 0;
        let mut best: Option<(usize, i64)> = None;

        for (i, backend) in backends.iter().enumerate() {
            let weight = i64::from(backend.weight());
            let current = backend.with_state(|state| {
                if !state.healthy {
                    return None;
                }
                state.current_weight += weight;
                Some(state.current_weight)
            });
            let Some(current) = current else { continue };

            total += weight;
            if best.map_or(true, |(_, max)| current > max) {
                best = Some((i, current));
            }
        }

        let (index, _) = best?;
        backends[index].with_state(|state| state.current_weight -= total);
        Some(index)
    }

    fn name(&self) -> &'static str {
        "w_round_robin"
    }
}
