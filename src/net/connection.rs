//! Connection tracking for graceful shutdown.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Keep the set of live client/backend pairs
//! - Force-close tracked pairs and wait for them to drain

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One tracked client/backend pair.
#[derive(Debug)]
struct TrackedConnection {
    client: SocketAddr,
    backend: String,
    close_tx: Arc<watch::Sender<bool>>,
}

#[derive(Debug)]
struct TrackerInner {
    connections: DashMap<ConnectionId, TrackedConnection>,
    /// Number of tracked pairs; watchers wait for it to reach zero.
    count_tx: watch::Sender<usize>,
    closing: AtomicBool,
}

/// The set of live connection pairs.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                connections: DashMap::new(),
                count_tx,
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Register a pair. The entry lives as long as the returned guard.
    ///
    /// After [`close_all`](Self::close_all) new pairs are born closed.
    pub fn track(&self, client: SocketAddr, backend: impl Into<String>) -> ConnectionGuard {
        let id = ConnectionId::new();
        let (close_tx, close_rx) = watch::channel(self.inner.closing.load(Ordering::Acquire));
        let close_tx = Arc::new(close_tx);

        self.inner.connections.insert(
            id,
            TrackedConnection {
                client,
                backend: backend.into(),
                close_tx: close_tx.clone(),
            },
        );
        self.inner.count_tx.send_modify(|count| *count += 1);

        ConnectionGuard {
            id,
            inner: self.inner.clone(),
            handle: ConnectionHandle {
                close_tx,
                close_rx,
                activity: Arc::new(PairActivity::new()),
            },
        }
    }

    /// Current number of tracked pairs.
    pub fn active_count(&self) -> usize {
        *self.inner.count_tx.borrow()
    }

    /// Signal every tracked pair to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        self.inner.closing.store(true, Ordering::Release);
        let mut closed = 0;
        for entry in self.inner.connections.iter() {
            tracing::debug!(
                connection_id = %entry.key(),
                client = %entry.client,
                backend = %entry.backend,
                "Closing active connection"
            );
            entry.close_tx.send_replace(true);
            closed += 1;
        }
        closed
    }

    /// Wait until every tracked pair has been dropped.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.count_tx.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Last time either direction of a pair moved bytes.
#[derive(Debug)]
pub struct PairActivity {
    started: Instant,
    /// Milliseconds after `started`.
    last: AtomicU64,
}

impl PairActivity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last.fetch_max(now, Ordering::Relaxed);
    }

    /// How long the whole pair has been quiet.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// Close signal and activity clock for one pair, shared by both relay
/// directions.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
    activity: Arc<PairActivity>,
}

impl ConnectionHandle {
    pub fn activity(&self) -> Arc<PairActivity> {
        self.activity.clone()
    }

    /// Ask both directions of this pair to stop.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_rx.borrow()
    }

    /// Resolves once the pair has been asked to close.
    pub async fn closed(&mut self) {
        let _ = self.close_rx.wait_for(|closed| *closed).await;
    }
}

/// Keeps a pair in the tracked set; removes it when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    inner: Arc<TrackerInner>,
    handle: ConnectionHandle,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.connections.remove(&self.id);
        self.inner.count_tx.send_modify(|count| *count -= 1);
        tracing::trace!(connection_id = %self.id, "Connection untracked");
    }
}
