//! Path-prefix override routing.
//!
//! A backend may declare path prefixes it serves. When the caller supplies a
//! path, the longest matching prefix owned by a healthy backend wins and the
//! selection algorithm is not consulted.

use std::sync::Arc;

use crate::load_balancer::backend::Backend;

#[derive(Debug, Default)]
pub struct PathRoutes {
    /// (prefix, backend index), longest prefix first.
    routes: Vec<(String, usize)>,
}

impl PathRoutes {
    pub fn new(backends: &[Arc<Backend>]) -> Self {
        let mut routes: Vec<(String, usize)> = backends
            .iter()
            .enumerate()
            .flat_map(|(i, b)| b.paths().into_iter().map(move |p| (p, i)))
            .collect();
        // Stable sort keeps declaration order among equal-length prefixes.
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { routes }
    }

    /// Index of the backend that should serve `path`, if any.
    pub fn resolve(&self, backends: &[Arc<Backend>], path: &str) -> Option<usize> {
        self.routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|&(_, index)| index)
            .find(|&index| backends[index].is_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn backend(addr: &str, paths: &[&str]) -> Arc<Backend> {
        let config = BackendConfig::new(addr).with_paths(paths.iter().copied());
        Arc::new(Backend::from_config(&config))
    }

    #[test]
    fn longest_prefix_wins() {
        let backends = vec![
            backend("127.0.0.1:9000", &["/api"]),
            backend("127.0.0.1:9001", &["/api/v2"]),
            backend("127.0.0.1:9002", &[]),
        ];
        let routes = PathRoutes::new(&backends);

        assert_eq!(routes.resolve(&backends, "/api/v2/users"), Some(1));
        assert_eq!(routes.resolve(&backends, "/api/v1/users"), Some(0));
        assert_eq!(routes.resolve(&backends, "/static"), None);
    }

    #[test]
    fn unhealthy_owner_falls_back_to_shorter_prefix() {
        let backends = vec![
            backend("127.0.0.1:9000", &["/api"]),
            backend("127.0.0.1:9001", &["/api/v2"]),
        ];
        let routes = PathRoutes::new(&backends);
        backends[1].set_health(false);

        assert_eq!(routes.resolve(&backends, "/api/v2/users"), Some(0));

        backends[0].set_health(false);
        assert_eq!(routes.resolve(&backends, "/api/v2/users"), None);
    }
}
