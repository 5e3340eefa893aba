//! Active health checking.
//!
//! # Responsibilities
//! - Periodically check backends with a bounded TCP connect
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::load_balancer::{Backend, Balancer};
use crate::observability::metrics;

pub struct HealthMonitor {
    balancer: Arc<Balancer>,
}

impl HealthMonitor {
    pub fn new(balancer: Arc<Balancer>) -> Self {
        Self { balancer }
    }

    /// Check every backend each interval until `shutdown` fires.
    ///
    /// Interval, timeout and the enabled flag are re-read from the current
    /// configuration every round, so reloads apply without a restart.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let initial = self.balancer.config().health_check.clone();
        tracing::info!(
            enabled = initial.enabled,
            interval = ?initial.interval(),
            timeout = ?initial.timeout(),
            "Health monitor starting"
        );

        loop {
            let config = self.balancer.config().health_check.clone();
            if config.enabled {
                self.check_all();
            }

            tokio::select! {
                _ = time::sleep(config.interval()) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Spawn one independent check per backend.
    ///
    /// Returns the check handles; the monitor loop itself never waits on them.
    pub fn check_all(&self) -> Vec<JoinHandle<bool>> {
        let timeout = self.balancer.config().health_check.timeout();
        self.balancer
            .backends()
            .into_iter()
            .map(|backend| tokio::spawn(check_backend(backend, timeout)))
            .collect()
    }
}

/// Check one backend and record the result. Returns the observed health.
pub async fn check_backend(backend: Arc<Backend>, timeout: Duration) -> bool {
    let healthy = match time::timeout(timeout, TcpStream::connect(&backend.address)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            tracing::debug!(backend = %backend.address, error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::debug!(backend = %backend.address, timeout = ?timeout, "Health check failed: timeout");
            false
        }
    };

    if backend.set_health(healthy) {
        if healthy {
            tracing::info!(backend = %backend.address, "Backend health changed → healthy");
        } else {
            tracing::warn!(backend = %backend.address, "Backend health changed → unhealthy");
        }
    }
    metrics::record_backend_health(&backend.address, healthy);
    healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn check_marks_unreachable_backend_unhealthy() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let backend = Arc::new(Backend::new(addr.to_string(), 1));

        assert!(!check_backend(backend.clone(), Duration::from_millis(500)).await);
        assert!(!backend.is_healthy());
    }

    #[tokio::test]
    async fn check_recovers_and_resets_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = Arc::new(Backend::new(listener.local_addr().unwrap().to_string(), 1));
        backend.set_health(false);
        backend.record_failure();

        assert!(check_backend(backend.clone(), Duration::from_millis(500)).await);
        assert!(backend.is_healthy());
        assert_eq!(backend.failures(), 0);
    }
}
