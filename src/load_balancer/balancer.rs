//! Backend registry and selection entry point.
//!
//! # Responsibilities
//! - Own the ordered backend list built from configuration
//! - Run the configured strategy (or the path override) per connection
//! - Account every selection and hand out a [`BackendLease`] to undo it
//! - Reconcile the backend list on reload, keeping live state by address

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::BalancerConfig;
use crate::load_balancer::path::PathRoutes;
use crate::load_balancer::{Algorithm, Backend, BackendLease, Strategy};
use crate::observability::metrics;

/// The outcome of a successful selection.
#[derive(Debug)]
pub struct Selection {
    pub backend: Arc<Backend>,
    /// Position of `backend` in the current backend list.
    pub index: usize,
    /// Must be released once the connection ends.
    pub lease: BackendLease,
}

/// Point-in-time counters for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStats {
    pub address: String,
    pub healthy: bool,
    pub active_connections: usize,
    pub served: u64,
    pub dispatched: u64,
    pub failures: u64,
}

/// What a reload changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub kept: usize,
    pub added: usize,
    pub removed: usize,
}

/// Everything a selection needs, swapped as one unit on reload.
#[derive(Debug)]
struct Snapshot {
    config: Arc<BalancerConfig>,
    algorithm: Algorithm,
    strategy: Box<dyn Strategy>,
    backends: Vec<Arc<Backend>>,
    routes: PathRoutes,
}

/// Shared load balancer state.
#[derive(Debug)]
pub struct Balancer {
    snapshot: ArcSwap<Snapshot>,
    rotation: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    /// Held across load-reconcile-store so concurrent reloads cannot
    /// interleave.
    reload_lock: Mutex<()>,
}

impl Balancer {
    /// Build the registry; every backend starts healthy.
    pub fn from_config(config: BalancerConfig) -> Self {
        let backends: Vec<Arc<Backend>> = config
            .backends
            .iter()
            .map(|b| Arc::new(Backend::from_config(b)))
            .collect();
        let rotation = Arc::new(AtomicUsize::new(0));
        let snapshot = Self::build_snapshot(config, backends, &rotation);

        tracing::info!(
            backends = snapshot.backends.len(),
            algorithm = %snapshot.algorithm,
            "Load balancer initialized"
        );

        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            rotation,
            active: Arc::new(AtomicUsize::new(0)),
            reload_lock: Mutex::new(()),
        }
    }

    fn build_snapshot(
        config: BalancerConfig,
        backends: Vec<Arc<Backend>>,
        rotation: &Arc<AtomicUsize>,
    ) -> Snapshot {
        let algorithm = Algorithm::parse(&config.algorithm);
        let routes = PathRoutes::new(&backends);
        Snapshot {
            strategy: algorithm.strategy(rotation.clone()),
            config: Arc::new(config),
            algorithm,
            backends,
            routes,
        }
    }

    /// Choose a backend for a connection from `client`.
    ///
    /// A `path` matching a healthy backend's declared prefix wins outright;
    /// otherwise the configured algorithm decides. On success the global and
    /// per-backend active counts and the served counter have been advanced.
    pub fn select(&self, client: &str, path: Option<&str>) -> Option<Selection> {
        let snapshot = self.snapshot.load();
        if snapshot.backends.is_empty() {
            return None;
        }

        let index = path
            .and_then(|p| snapshot.routes.resolve(&snapshot.backends, p))
            .or_else(|| snapshot.strategy.select(&snapshot.backends, client));

        let Some(index) = index else {
            tracing::debug!(
                client = %client,
                algorithm = %snapshot.algorithm,
                backend_count = snapshot.backends.len(),
                "No backend available"
            );
            return None;
        };

        let backend = snapshot.backends[index].clone();
        backend.inc_connections();
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_active_connections(active);
        backend.record_served();

        Some(Selection {
            lease: BackendLease::new(backend.clone(), self.active.clone()),
            backend,
            index,
        })
    }

    /// Replace configuration and algorithm atomically, reconciling backends
    /// by address: kept backends retain health and counters, new ones start
    /// healthy and zeroed, missing ones are dropped.
    pub fn reload(&self, config: BalancerConfig) -> ReloadSummary {
        let _reloading = self.reload_lock.lock();
        let current = self.snapshot.load();
        let mut existing: HashMap<&str, &Arc<Backend>> = current
            .backends
            .iter()
            .map(|b| (b.address.as_str(), b))
            .collect();

        let mut summary = ReloadSummary::default();
        let backends: Vec<Arc<Backend>> = config
            .backends
            .iter()
            .map(|cfg| match existing.remove(cfg.address.as_str()) {
                Some(old) => {
                    summary.kept += 1;
                    old.apply_config(cfg);
                    old.clone()
                }
                None => {
                    summary.added += 1;
                    Arc::new(Backend::from_config(cfg))
                }
            })
            .collect();
        summary.removed = existing.len();

        let snapshot = Self::build_snapshot(config, backends, &self.rotation);
        tracing::info!(
            backends = snapshot.backends.len(),
            algorithm = %snapshot.algorithm,
            kept = summary.kept,
            added = summary.added,
            removed = summary.removed,
            "Configuration reloaded"
        );
        self.snapshot.store(Arc::new(snapshot));
        summary
    }

    /// All backends, in index order.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.snapshot.load().backends.clone()
    }

    pub fn config(&self) -> Arc<BalancerConfig> {
        self.snapshot.load().config.clone()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.snapshot.load().algorithm
    }

    /// Connections selected and not yet released.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Counters for every backend, in index order.
    pub fn stats(&self) -> Vec<BackendStats> {
        self.snapshot
            .load()
            .backends
            .iter()
            .map(|b| {
                let state = b.state();
                BackendStats {
                    address: b.address.clone(),
                    healthy: state.healthy,
                    active_connections: state.active_connections,
                    served: b.served(),
                    dispatched: b.dispatched(),
                    failures: state.failures,
                }
            })
            .collect()
    }
}
