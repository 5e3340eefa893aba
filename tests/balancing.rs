//! End-to-end selection behaviour through a live dispatcher.

use std::collections::HashMap;
use std::time::Duration;

use tcp_balancer::config::BackendConfig;
use tcp_balancer::health::HealthMonitor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod common;
use common::TestBalancer;

async fn tagged_backends(count: u8) -> Vec<std::net::SocketAddr> {
    let mut addrs = Vec::new();
    for tag in 0..count {
        addrs.push(common::start_tagged_backend(tag).await);
    }
    addrs
}

#[tokio::test]
async fn test_round_robin_spreads_connections_evenly() {
    let backends = tagged_backends(3).await;
    let lb = TestBalancer::start(common::balancer_config(&backends, "round_robin")).await;

    let mut seen = Vec::new();
    for _ in 0..6 {
        let (_stream, tag) = lb.connect_tagged().await;
        seen.push(tag);
    }
    assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);

    let served: Vec<u64> = lb.balancer.stats().iter().map(|s| s.served).collect();
    assert_eq!(served, vec![2, 2, 2]);
    let dispatched: Vec<u64> = lb.balancer.stats().iter().map(|s| s.dispatched).collect();
    assert_eq!(dispatched, vec![2, 2, 2]);
}

#[tokio::test]
async fn test_unhealthy_backend_receives_no_connections() {
    let backends = tagged_backends(3).await;
    let lb = TestBalancer::start(common::balancer_config(&backends, "round_robin")).await;
    lb.balancer.backends()[1].set_health(false);

    let mut counts: HashMap<u8, usize> = HashMap::new();
    for _ in 0..6 {
        let (_stream, tag) = lb.connect_tagged().await;
        *counts.entry(tag).or_default() += 1;
    }
    assert_eq!(counts.get(&1), None);
    assert_eq!(counts.values().sum::<usize>(), 6);
    assert!(counts[&0] >= 2 && counts[&2] >= 2);
}

#[tokio::test]
async fn test_least_connections_prefers_idle_backend() {
    let backends = tagged_backends(3).await;
    let lb = TestBalancer::start(common::balancer_config(&backends, "least_conn")).await;

    let (_a, tag_a) = lb.connect_tagged().await;
    let (b, tag_b) = lb.connect_tagged().await;
    let (_c, tag_c) = lb.connect_tagged().await;
    assert_eq!((tag_a, tag_b, tag_c), (0, 1, 2));

    drop(b);
    let backend = lb.balancer.backends()[1].clone();
    assert!(common::wait_until(|| backend.active_connections() == 0).await);

    let (_d, tag_d) = lb.connect_tagged().await;
    assert_eq!(tag_d, 1);
}

#[tokio::test]
async fn test_ip_hash_pins_client_to_one_backend() {
    let backends = tagged_backends(3).await;
    let lb = TestBalancer::start(common::balancer_config(&backends, "ip_hash")).await;

    let (_first, pinned) = lb.connect_tagged().await;
    for _ in 0..4 {
        let (_stream, tag) = lb.connect_tagged().await;
        assert_eq!(tag, pinned);
    }
}

#[tokio::test]
async fn test_weighted_round_robin_honours_weights() {
    let backends = tagged_backends(2).await;
    let mut config = common::balancer_config(&backends, "w_round_robin");
    config.backends[0].weight = 3;
    let lb = TestBalancer::start(config).await;

    let mut seen = Vec::new();
    for _ in 0..8 {
        let (_stream, tag) = lb.connect_tagged().await;
        seen.push(tag);
    }
    assert_eq!(seen.iter().filter(|&&t| t == 0).count(), 6);
    assert_eq!(seen.iter().filter(|&&t| t == 1).count(), 2);
}

#[tokio::test]
async fn test_path_override_beats_algorithm() {
    let backends = tagged_backends(3).await;
    let mut config = common::balancer_config(&backends, "round_robin");
    config.listener.route_path = Some("/api/users".into());
    config.backends[2] = BackendConfig::new(backends[2].to_string()).with_paths(["/api"]);
    let lb = TestBalancer::start(config).await;

    for _ in 0..3 {
        let (_stream, tag) = lb.connect_tagged().await;
        assert_eq!(tag, 2);
    }
}

#[tokio::test]
async fn test_half_close_reaches_backend() {
    let backend = common::start_counting_backend().await;
    let lb = TestBalancer::start(common::balancer_config(&[backend], "round_robin")).await;

    let mut stream = lb.connect().await;
    stream.write_all(b"hello").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_string(&mut reply))
        .await
        .expect("backend never saw EOF")
        .unwrap();
    assert_eq!(reply, "received 5 bytes");
}

#[tokio::test]
async fn test_dial_failure_counts_against_backend() {
    let dead = common::dead_address().await;
    let lb = TestBalancer::start(common::balancer_config(&[dead], "round_robin")).await;

    let mut stream = lb.connect().await;
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("client should be closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    let backend = lb.balancer.backends()[0].clone();
    assert!(common::wait_until(|| backend.failures() == 1).await);
    assert_eq!(lb.balancer.active_connections(), 0);

    // Selected, but never reached the backend.
    let stats = lb.balancer.stats();
    assert_eq!(stats[0].served, 1);
    assert_eq!(stats[0].dispatched, 0);
}

#[tokio::test]
async fn test_health_monitor_evicts_and_restores_backend() {
    let live = common::start_tagged_backend(0).await;
    let dead = common::dead_address().await;
    let lb = TestBalancer::start(common::balancer_config(&[live, dead], "round_robin")).await;
    let monitor = HealthMonitor::new(lb.balancer.clone());

    for check in monitor.check_all() {
        check.await.unwrap();
    }
    let stats = lb.balancer.stats();
    assert!(stats[0].healthy);
    assert!(!stats[1].healthy);

    for _ in 0..4 {
        let (_stream, tag) = lb.connect_tagged().await;
        assert_eq!(tag, 0);
    }

    // Bring the dead address back.
    let revived = tokio::net::TcpListener::bind(dead).await.unwrap();
    for check in monitor.check_all() {
        check.await.unwrap();
    }
    assert!(lb.balancer.backends()[1].is_healthy());
    drop(revived);
}
