//! Client IP hash load balancing strategy.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, Strategy};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Host portion of a client address; the input as-is when it has no port.
fn client_host(client: &str) -> Cow<'_, str> {
    match client.parse::<SocketAddr>() {
        Ok(addr) => Cow::Owned(addr.ip().to_string()),
        Err(_) => Cow::Borrowed(client),
    }
}

/// Sticky selector: the same client host always lands on the same index
/// while the backend count is unchanged. Health is deliberately ignored so
/// that stickiness is never broken by a flapping health check.
#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for IpHash {
    fn select(&self, backends: &[Arc<Backend>], client: &str) -> Option<usize> {
        if backends.is_empty() {
            return None;
        }
        let hash = fnv1a_32(client_host(client).as_bytes());
        Some(hash as usize % backends.len())
    }

    fn name(&self) -> &'static str {
        "ip_hash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(n: usize) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| Arc::new(Backend::new(format!("127.0.0.1:{}", 8080 + i), 1)))
            .collect()
    }

    #[test]
    fn fnv1a_reference_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn port_is_ignored() {
        assert_eq!(client_host("192.168.1.7:51000"), "192.168.1.7");
        assert_eq!(client_host("[::1]:51000"), "::1");
        assert_eq!(client_host("not-an-address"), "not-an-address");
    }

    #[test]
    fn same_host_same_backend() {
        let lb = IpHash::new();
        let backends = backends(4);

        let first = lb.select(&backends, "192.168.1.7:51000").unwrap();
        for port in 51001..51020 {
            let client = format!("192.168.1.7:{}", port);
            assert_eq!(lb.select(&backends, &client), Some(first));
        }
        let expected = fnv1a_32(b"192.168.1.7") as usize % 4;
        assert_eq!(first, expected);
    }

    #[test]
    fn unhealthy_target_is_not_bypassed() {
        let lb = IpHash::new();
        let backends = backends(3);
        let index = lb.select(&backends, "10.1.2.3:4000").unwrap();
        backends[index].set_health(false);

        assert_eq!(lb.select(&backends, "10.1.2.3:4000"), Some(index));
    }
}
