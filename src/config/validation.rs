//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (weights, connection limits, ports)
//! - Detect duplicate backend addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::BalancerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,
    #[error("invalid bind address '{0}'")]
    BindAddress(String),
    #[error("max_connections must be at least 1")]
    ZeroMaxConnections,
    #[error("backend address '{0}' is not host:port")]
    BackendAddress(String),
    #[error("backend '{0}' is declared more than once")]
    DuplicateBackend(String),
    #[error("backend '{0}' has weight 0")]
    ZeroWeight(String),
    #[error("backend '{0}' declares an empty path prefix")]
    EmptyPath(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if !is_host_port(&backend.address) {
            errors.push(ValidationError::BackendAddress(backend.address.clone()));
        }
        if !seen.insert(backend.address.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.address.clone()));
        }
        if backend.weight == 0 {
            errors.push(ValidationError::ZeroWeight(backend.address.clone()));
        }
        if backend.paths.iter().any(|p| p.is_empty()) {
            errors.push(ValidationError::EmptyPath(backend.address.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Accepts `host:port` and `[v6]:port`; hostnames are resolved at dial time.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
