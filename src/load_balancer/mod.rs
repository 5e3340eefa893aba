//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Connection accepted
//!     → balancer.rs (load current snapshot)
//!     → path.rs (path-prefix override, if a path is supplied)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through healthy backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!         - ip_hash.rs (sticky per client host)
//!         - weighted.rs (smooth weighted round robin)
//!     → backend.rs (account the connection, hand out a lease)
//!     → Return Selection or None
//! ```
//!
//! # Design Decisions
//! - Strategies only pick an index; accounting is done once, in the balancer
//! - Per-backend state sits behind the backend's own lock, never a global one
//! - Round robin, least connections and weighted skip unhealthy backends;
//!   IP hash stays sticky regardless of health

pub mod backend;
pub mod balancer;
pub mod ip_hash;
pub mod least_conn;
pub mod path;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

pub use backend::{Backend, BackendLease, BackendState};
pub use balancer::{Balancer, BackendStats, ReloadSummary, Selection};

/// A backend selection policy.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Index of the backend that should take the next connection from
    /// `client`, or `None` when no backend is eligible.
    fn select(&self, backends: &[Arc<Backend>], client: &str) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// The fixed vocabulary of selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
    IpHash,
    WeightedRoundRobin,
}

impl Algorithm {
    /// Parse an algorithm name. Unknown names fall back to round robin.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Algorithm::RoundRobin,
            "least_conn" => Algorithm::LeastConnections,
            "ip_hash" => Algorithm::IpHash,
            "w_round_robin" => Algorithm::WeightedRoundRobin,
            other => {
                tracing::warn!(algorithm = %other, "Unknown algorithm, defaulting to round robin");
                Algorithm::RoundRobin
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConnections => "least_conn",
            Algorithm::IpHash => "ip_hash",
            Algorithm::WeightedRoundRobin => "w_round_robin",
        }
    }

    /// Build the strategy. Round robin shares `rotation` so the counter
    /// survives strategy swaps.
    pub fn strategy(self, rotation: Arc<AtomicUsize>) -> Box<dyn Strategy> {
        match self {
            Algorithm::RoundRobin => Box::new(round_robin::RoundRobin::with_counter(rotation)),
            Algorithm::LeastConnections => Box::new(least_conn::LeastConnections::new()),
            Algorithm::IpHash => Box::new(ip_hash::IpHash::new()),
            Algorithm::WeightedRoundRobin => Box::new(weighted::WeightedRoundRobin::new()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
