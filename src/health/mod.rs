//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Spawn one TCP connect check per backend
//!     → Flip the backend's health flag under its own lock
//!
//! Failure accounting (load_balancer/backend.rs):
//!     Dial or relay error observed
//!     → Increment the backend's failure counter
//!     → Cleared by the next successful check
//! ```
//!
//! # Design Decisions
//! - One failed check marks a backend unhealthy, one success restores it
//! - Check results never surface to callers; dispatch sees fewer candidates
//! - Only transitions are logged

pub mod active;

pub use active::HealthMonitor;
