//! Proxy server accept loop.
//!
//! # Responsibilities
//! - Open the cache and build the shared connection handler
//! - Accept connections and spawn one task per connection
//! - Stop accepting on shutdown and wait for open connections to drain
//! - Record per-connection metrics

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cache::{CacheError, ContentCache};
use crate::censor::Blocklist;
use crate::config::ProxyConfig;
use crate::http::handler::{ConnectionHandler, HandlerError};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;

/// How long shutdown waits for open connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// The forward proxy server.
pub struct ProxyServer {
    handler: Arc<ConnectionHandler>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Create a server from prepared parts.
    pub fn new(
        config: Arc<ProxyConfig>,
        cache: Option<Arc<ContentCache>>,
        blocklist: Arc<Blocklist>,
    ) -> Self {
        Self {
            handler: Arc::new(ConnectionHandler::new(config, cache, blocklist)),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Create a server, opening the cache directory when caching is enabled.
    pub async fn from_config(config: ProxyConfig, blocklist: Arc<Blocklist>) -> Result<Self, CacheError> {
        let cache = if config.cache.enabled {
            let cache = ContentCache::from_config(&config).await?;
            tracing::info!(directory = %cache.directory().display(), "Cache enabled");
            Some(Arc::new(cache))
        } else {
            None
        };
        if config.censor.enabled {
            tracing::info!(words = blocklist.len(), "Censoring enabled");
        }
        Ok(Self::new(Arc::new(config), cache, blocklist))
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "Proxy server starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let handler = Arc::clone(&self.handler);
                        let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);
                        tokio::spawn(
                            async move {
                                let _permit = permit;
                                let _guard = guard;
                                serve_connection(&handler, stream).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        let open = self.tracker.active_count();
        if open > 0 {
            tracing::info!(connections = open, "Waiting for connections to drain");
            if !self.tracker.wait_for_drain(DRAIN_TIMEOUT).await {
                tracing::warn!(
                    connections = self.tracker.active_count(),
                    "Drain timed out, abandoning open connections"
                );
            }
        }
        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

async fn serve_connection(handler: &ConnectionHandler, mut stream: TcpStream) {
    match handler.handle(&mut stream).await {
        Ok(outcome) => {
            if let Some(report) = outcome.report() {
                metrics::record_censored_words(report.redactions);
            }
            metrics::record_request(outcome.as_str());
        }
        Err(HandlerError::Request(e)) => {
            tracing::debug!(error = %e, "Invalid request, closing without response");
            metrics::record_request("invalid");
        }
        Err(e) => {
            tracing::debug!(error = %e, "Connection abandoned");
            metrics::record_request("aborted");
        }
    }
    let _ = stream.shutdown().await;
}
