//! Accept loop and per-connection dispatch.
//!
//! # Data Flow
//! ```text
//! accept
//!     → admission (shutting down? at max_connections?)
//!     → select backend (synchronous, so the count is current for the next accept)
//!     → track pair
//!     → spawn: dial backend with connect timeout
//!         → two relays, one per direction
//!         → untrack when both have ended
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time;

use crate::load_balancer::{Balancer, Selection};
use crate::net::buffer::BufferPool;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::Listener;
use crate::net::relay::{relay, Direction, RelayContext};

/// Why a client connection was not relayed.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("shutting down")]
    ShuttingDown,
    #[error("connection limit reached ({active}/{max})")]
    AtCapacity { active: usize, max: usize },
    #[error("no healthy backend available")]
    NoBackend,
    #[error("failed to connect to backend {backend}: {source}")]
    Dial {
        backend: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to backend {backend} after {timeout:?}")]
    DialTimeout { backend: String, timeout: Duration },
    #[error("connection closed while dialing {backend}")]
    Cancelled { backend: String },
}

/// Owns the accept loop and every connection it spawns.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    balancer: Arc<Balancer>,
    tracker: ConnectionTracker,
    buffers: Arc<BufferPool>,
    shutting_down: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(balancer: Arc<Balancer>) -> Self {
        Self {
            balancer,
            tracker: ConnectionTracker::new(),
            buffers: Arc::new(BufferPool::default()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Accept and relay connections until `shutdown` fires, then stop
    /// accepting, close every tracked pair and wait for them to drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        let mut accept_errors = 0u32;
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept_errors = 0;
                        if let Err(e) = self.admit(stream, peer) {
                            tracing::warn!(client = %peer, error = %e, "Connection rejected");
                        }
                    }
                    Err(e) => {
                        // e.g. EMFILE: retrying at once would spin.
                        accept_errors = accept_errors.saturating_add(1);
                        let pause = accept_backoff(accept_errors);
                        tracing::warn!(error = %e, retry_in = ?pause, "Accept failed");
                        time::sleep(pause).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Dispatcher received shutdown signal, no longer accepting");
                    break;
                }
            }
        }

        self.shutting_down.store(true, Ordering::Release);
        drop(listener);

        let closing = self.tracker.close_all();
        tracing::info!(connections = closing, "Closing active connections");
        self.tracker.wait_idle().await;
        tracing::info!("All connections drained");
    }

    /// Admission, selection and tracking for one accepted client. Rejected
    /// clients are closed by dropping `stream`.
    pub fn admit(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), DispatchError> {
        if self.is_shutting_down() {
            return Err(DispatchError::ShuttingDown);
        }

        let config = self.balancer.config();
        let active = self.balancer.active_connections();
        let max = config.listener.max_connections;
        if active >= max {
            return Err(DispatchError::AtCapacity { active, max });
        }

        let selection = self
            .balancer
            .select(&peer.to_string(), config.listener.route_path.as_deref())
            .ok_or(DispatchError::NoBackend)?;
        let guard = self.tracker.track(peer, selection.backend.address.clone());

        tracing::debug!(
            connection_id = %guard.id(),
            client = %peer,
            backend = %selection.backend.address,
            "Backend selected"
        );

        let this = self.clone();
        let connect_timeout = config.timeouts.connect();
        let idle_timeout = config.timeouts.idle();
        tokio::spawn(async move {
            if let Err(e) = this
                .serve(stream, selection, guard, connect_timeout, idle_timeout)
                .await
            {
                tracing::warn!(client = %peer, error = %e, "Connection failed");
            }
        });
        Ok(())
    }

    async fn serve(
        &self,
        client: TcpStream,
        selection: Selection,
        guard: ConnectionGuard,
        connect_timeout: Duration,
        idle_timeout: Option<Duration>,
    ) -> Result<(), DispatchError> {
        let Selection { backend, lease, .. } = selection;
        let mut handle = guard.handle();

        let dialed = tokio::select! {
            _ = handle.closed() => Err(DispatchError::Cancelled { backend: backend.address.clone() }),
            dialed = time::timeout(connect_timeout, TcpStream::connect(&backend.address)) => match dialed {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(source)) => Err(DispatchError::Dial { backend: backend.address.clone(), source }),
                Err(_) => Err(DispatchError::DialTimeout { backend: backend.address.clone(), timeout: connect_timeout }),
            },
        };

        let upstream = match dialed {
            Ok(stream) => stream,
            Err(e) => {
                if !matches!(e, DispatchError::Cancelled { .. }) {
                    backend.record_failure();
                }
                lease.release();
                return Err(e);
            }
        };

        backend.record_dispatched();
        let pair_lease = lease.clone();

        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();
        let ctx = RelayContext {
            backend,
            lease,
            connection: handle,
            buffers: self.buffers.clone(),
            idle_timeout,
        };

        let up = tokio::spawn(relay(client_read, upstream_write, Direction::ClientToBackend, ctx.clone()));
        let down = tokio::spawn(relay(upstream_read, client_write, Direction::BackendToClient, ctx));
        let (up, down) = tokio::join!(up, down);

        for report in [up, down] {
            match report {
                Ok(report) => tracing::debug!(
                    connection_id = %guard.id(),
                    direction = %report.direction,
                    bytes = report.bytes,
                    outcome = ?report.outcome,
                    "Relay finished"
                ),
                Err(e) => tracing::error!(connection_id = %guard.id(), error = %e, "Relay task panicked"),
            }
        }

        // Half-closed pairs keep their slot until both directions are done.
        pair_lease.release();
        drop(guard);
        Ok(())
    }
}

/// First pause after a failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_millis(500);

fn accept_backoff(consecutive_errors: u32) -> Duration {
    let doublings = consecutive_errors.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << doublings)
        .min(ACCEPT_BACKOFF_MAX)
}
