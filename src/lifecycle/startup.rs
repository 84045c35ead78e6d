//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate the final configuration
//! - Initialize subsystems in dependency order: metrics, blocklist, cache
//! - Bind the listener and run until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic arrives only when everything is ready

use std::sync::Arc;

use thiserror::Error;

use crate::cache::CacheError;
use crate::censor::Blocklist;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::ProxyConfig;
use crate::http::ProxyServer;
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;

/// Errors that stop the proxy from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),

    #[error("failed to read blocklist: {0}")]
    Blocklist(#[source] std::io::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The blocklist for `config`: loaded from disk when censoring is enabled,
/// empty otherwise.
pub async fn load_blocklist(config: &ProxyConfig) -> Result<Arc<Blocklist>, StartupError> {
    if !config.censor.enabled {
        return Ok(Arc::new(Blocklist::default()));
    }
    let blocklist = Blocklist::load(&config.censor.blocklist_path)
        .await
        .map_err(StartupError::Blocklist)?;
    if blocklist.is_empty() {
        tracing::warn!(
            path = %config.censor.blocklist_path.display(),
            "Censoring enabled but blocklist is empty"
        );
    }
    Ok(Arc::new(blocklist))
}

/// Start every subsystem and serve until `shutdown` triggers.
pub async fn run(config: ProxyConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    validate_config(&config).map_err(StartupError::Invalid)?;

    let shutdown_rx = shutdown.subscribe();

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let blocklist = load_blocklist(&config).await?;
    let listener_config = config.listener.clone();
    let server = ProxyServer::from_config(config, blocklist).await?;

    let listener = Listener::bind(&listener_config).await?;
    server.run(listener, shutdown_rx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn invalid_config_is_rejected_with_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.max_connections = 0;
        config.limits.chunk_bytes = 0;

        let err = run(config, &Shutdown::new()).await.unwrap_err();
        match err {
            StartupError::Invalid(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn blocklist_only_loaded_when_censoring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "bad\nworse\n").unwrap();

        let mut config = ProxyConfig::default();
        config.censor.blocklist_path = path;
        assert!(load_blocklist(&config).await.unwrap().is_empty());

        config.censor.enabled = true;
        assert_eq!(load_blocklist(&config).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cache_path_that_is_a_file_fails_startup() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("cache");
        std::fs::write(&file, b"").unwrap();

        let mut config = ProxyConfig::default();
        config.listener.bind_address = "127.0.0.1:0".to_string();
        config.cache.enabled = true;
        config.cache.directory = file;

        let err = run(config, &Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, StartupError::Cache(CacheError::NotADirectory(_))));
    }
}
