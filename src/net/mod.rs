//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept)
//!     → dispatcher.rs (admission, backend selection, dial)
//!     → connection.rs (pair tracking for shutdown)
//!     → relay.rs (two directions, pooled buffers from buffer.rs)
//! ```
//!
//! # Design Decisions
//! - Over-limit clients are closed, never queued
//! - A failure in either direction tears down both
//! - EOF in one direction is forwarded as a half-close

pub mod buffer;
pub mod connection;
pub mod dispatcher;
pub mod listener;
pub mod relay;

pub use dispatcher::{DispatchError, Dispatcher};
pub use listener::{Listener, ListenerError};
