//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tcp_balancer::config::{BackendConfig, BalancerConfig, HealthCheckConfig, ListenerConfig};
use tcp_balancer::{Balancer, Dispatcher, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Start a backend that echoes everything back until the client half-closes.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Start a backend that sends `tag` as its first byte, then echoes.
pub async fn start_tagged_backend(tag: u8) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if socket.write_all(&[tag]).await.is_err() {
                    return;
                }
                let (mut r, mut w) = socket.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Start a backend that reads until EOF, then replies with the byte count.
pub async fn start_counting_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut received = Vec::new();
                if socket.read_to_end(&mut received).await.is_err() {
                    return;
                }
                let reply = format!("received {} bytes", received.len());
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that streams `count` single bytes, one per `interval`,
/// then half-closes. It drains whatever the client sends meanwhile.
pub async fn start_streaming_backend(count: usize, interval: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = socket.into_split();
                let drain = tokio::spawn(async move {
                    let mut sink = Vec::new();
                    let _ = r.read_to_end(&mut sink).await;
                });
                for _ in 0..count {
                    if w.write_all(b"s").await.is_err() {
                        return;
                    }
                    tokio::time::sleep(interval).await;
                }
                let _ = w.shutdown().await;
                let _ = drain.await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
}

pub fn balancer_config(backends: &[SocketAddr], algorithm: &str) -> BalancerConfig {
    BalancerConfig {
        algorithm: algorithm.to_string(),
        listener: ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            ..ListenerConfig::default()
        },
        backends: backends
            .iter()
            .map(|addr| BackendConfig::new(addr.to_string()))
            .collect(),
        health_check: HealthCheckConfig {
            enabled: false,
            ..HealthCheckConfig::default()
        },
        ..BalancerConfig::default()
    }
}

/// A running balancer on an ephemeral port.
pub struct TestBalancer {
    pub addr: SocketAddr,
    pub balancer: Arc<Balancer>,
    pub shutdown: Shutdown,
    pub server: JoinHandle<()>,
}

impl TestBalancer {
    pub async fn start(config: BalancerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let balancer = Arc::new(Balancer::from_config(config));
        let shutdown = Shutdown::new();
        let server = tokio::spawn(
            Dispatcher::new(balancer.clone()).run(listener.into(), shutdown.subscribe()),
        );
        Self {
            addr,
            balancer,
            shutdown,
            server,
        }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    /// Connect and read the backend's tag byte.
    pub async fn connect_tagged(&self) -> (TcpStream, u8) {
        let mut stream = self.connect().await;
        let mut tag = [0u8; 1];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut tag))
            .await
            .expect("timed out waiting for backend tag")
            .unwrap();
        (stream, tag[0])
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
