//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer sizes > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// Smallest request buffer that can hold a minimal request line.
const MIN_REQUEST_BUFFER: usize = 64;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("listener.max_connections must be greater than 0")]
    MaxConnections,

    #[error("cache.directory must not be empty when caching is enabled")]
    CacheDirectory,

    #[error("cache.methods must not be empty when caching is enabled")]
    CacheMethods,

    #[error("limits.request_buffer_bytes must be at least {MIN_REQUEST_BUFFER}")]
    RequestBuffer,

    #[error("limits.chunk_bytes must be greater than 0")]
    ChunkSize,

    #[error("limits.max_header_bytes must be at least 4")]
    MaxHeaderBytes,

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    if config.cache.enabled {
        if config.cache.directory.as_os_str().is_empty() {
            errors.push(ValidationError::CacheDirectory);
        }
        if config.cache.methods.is_empty() {
            errors.push(ValidationError::CacheMethods);
        }
    }

    if config.limits.request_buffer_bytes < MIN_REQUEST_BUFFER {
        errors.push(ValidationError::RequestBuffer);
    }
    if config.limits.chunk_bytes == 0 {
        errors.push(ValidationError::ChunkSize);
    }
    if config.limits.max_header_bytes < 4 {
        errors.push(ValidationError::MaxHeaderBytes);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
