//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active connections (for Least Connections LB)
//! - Track health, failures and the smooth-weighted accumulator
//! - Hand out one-shot leases that undo selection-time accounting

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::BackendConfig;
use crate::observability::metrics;

/// Mutable per-backend state. Always accessed under the backend's own lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendState {
    pub healthy: bool,
    pub active_connections: usize,
    /// Smooth weighted round robin accumulator.
    pub current_weight: i64,
    /// Failures since the last successful health check.
    pub failures: u64,
}

impl Default for BackendState {
    fn default() -> Self {
        Self {
            healthy: true,
            active_connections: 0,
            current_weight: 0,
            failures: 0,
        }
    }
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// The network address of the backend (`host:port`).
    pub address: String,
    /// Static weight for weighted round robin.
    weight: AtomicU32,
    /// Path prefixes this backend serves.
    paths: RwLock<Vec<String>>,
    state: Mutex<BackendState>,
    /// Selections that chose this backend.
    served: AtomicU64,
    /// Selections whose backend dial succeeded.
    dispatched: AtomicU64,
}

impl Backend {
    /// Create a new healthy backend.
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight: AtomicU32::new(weight),
            paths: RwLock::new(Vec::new()),
            state: Mutex::new(BackendState::default()),
            served: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        let backend = Self::new(config.address.clone(), config.weight);
        *backend.paths.write() = config.paths.clone();
        backend
    }

    /// Take weight and paths from a reloaded config, keeping live state.
    pub(crate) fn apply_config(&self, config: &BackendConfig) {
        self.weight.store(config.weight, Ordering::Relaxed);
        *self.paths.write() = config.paths.clone();
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.read().clone()
    }

    /// Copy of the current state, read under the lock.
    pub fn state(&self) -> BackendState {
        *self.state.lock()
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    pub fn active_connections(&self) -> usize {
        self.state.lock().active_connections
    }

    pub fn failures(&self) -> u64 {
        self.state.lock().failures
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Run `f` with exclusive access to this backend's state.
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut BackendState) -> T) -> T {
        f(&mut self.state.lock())
    }

    /// Set the health flag. Returns `true` when the flag changed.
    ///
    /// A healthy result also clears the failure counter.
    pub fn set_health(&self, healthy: bool) -> bool {
        let mut state = self.state.lock();
        let changed = state.healthy != healthy;
        state.healthy = healthy;
        if healthy {
            state.failures = 0;
        }
        changed
    }

    /// Count a dial or relay failure against this backend.
    pub fn record_failure(&self) {
        self.state.lock().failures += 1;
        metrics::record_backend_failure(&self.address);
    }

    pub(crate) fn record_served(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection that reached this backend. Only these are
    /// exported as served.
    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::record_backend_served(&self.address);
    }

    pub(crate) fn inc_connections(&self) {
        self.state.lock().active_connections += 1;
    }

    pub(crate) fn dec_connections(&self) {
        let mut state = self.state.lock();
        state.active_connections = state.active_connections.saturating_sub(1);
    }
}

/// Release handle for the accounting done when a backend was selected.
///
/// Clones share one guard: whichever clone calls [`BackendLease::release`]
/// first undoes the accounting, later calls are no-ops. If nobody releases
/// explicitly, the accounting is undone when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct BackendLease {
    inner: Arc<LeaseInner>,
}

#[derive(Debug)]
struct LeaseInner {
    backend: Arc<Backend>,
    active_total: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl BackendLease {
    /// Takes over one unit of already-incremented accounting on `backend`
    /// and on `active_total`.
    pub(crate) fn new(backend: Arc<Backend>, active_total: Arc<AtomicUsize>) -> Self {
        Self {
            inner: Arc::new(LeaseInner {
                backend,
                active_total,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.inner.backend
    }

    /// Undo the selection accounting. Returns `true` only for the call that
    /// actually performed the release.
    pub fn release(&self) -> bool {
        self.inner.release()
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}

impl LeaseInner {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.backend.dec_connections();
        let remaining = self.active_total.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_active_connections(remaining);
        true
    }
}

impl Drop for LeaseInner {
    fn drop(&mut self) {
        self.release();
    }
}
