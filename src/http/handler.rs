//! Per-connection request handling.
//!
//! # Responsibilities
//! - Read and parse the single request of a connection
//! - Serve from the cache when a usable entry exists
//! - Relay to the origin and forward the response to the client and cache
//! - Answer `502 Bad Gateway` when the origin fails before any reply byte
//!   reached the client
//!
//! # Design Decisions
//! - One request per connection (HTTP/1.0); the caller closes the socket
//! - The request is read with a single bounded read; a request that does
//!   not fit is relayed truncated and logged
//! - Invalid requests get no response at all

use std::io;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::cache::{CacheError, CacheWriter, ContentCache};
use crate::censor::Blocklist;
use crate::config::ProxyConfig;
use crate::http::forward::{Destination, ForwardError, ForwardOptions, ForwardReport, ResponseForwarder};
use crate::http::request::{Request, RequestError};
use crate::http::response::bad_gateway;
use crate::net::transport::{connect, read_with_timeout};

/// Errors that end a connection without a normal response.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("reading request failed: {0}")]
    ClientRead(#[source] io::Error),

    #[error("origin {address} unreachable: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("sending request to origin failed: {0}")]
    OriginWrite(#[source] io::Error),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl HandlerError {
    /// True when the origin, not the client, caused the failure.
    pub fn is_origin_side(&self) -> bool {
        matches!(
            self,
            HandlerError::Connect { .. }
                | HandlerError::OriginWrite(_)
                | HandlerError::Forward(ForwardError::Source { .. })
        )
    }

    /// True when the client can still be sent a `502`: the origin failed
    /// and no response byte has gone out.
    pub fn allows_bad_gateway(&self) -> bool {
        match self {
            HandlerError::Forward(e) => e.delivered() == Some(0),
            e => e.is_origin_side(),
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The origin response was forwarded.
    Relayed(ForwardReport),
    /// A cached response was served.
    CacheHit(ForwardReport),
    /// The origin failed early and the client got a `502`.
    BadGateway,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Relayed(_) => "relayed",
            Outcome::CacheHit(_) => "cache_hit",
            Outcome::BadGateway => "bad_gateway",
        }
    }

    pub fn report(&self) -> Option<&ForwardReport> {
        match self {
            Outcome::Relayed(report) | Outcome::CacheHit(report) => Some(report),
            Outcome::BadGateway => None,
        }
    }
}

/// State shared by every connection: configuration, cache and forwarder.
#[derive(Debug)]
pub struct ConnectionHandler {
    config: Arc<ProxyConfig>,
    cache: Option<Arc<ContentCache>>,
    forwarder: ResponseForwarder,
}

impl ConnectionHandler {
    /// `cache` is used only when caching is enabled in `config`.
    pub fn new(
        config: Arc<ProxyConfig>,
        cache: Option<Arc<ContentCache>>,
        blocklist: Arc<Blocklist>,
    ) -> Self {
        let forwarder = ResponseForwarder::new(ForwardOptions::from_config(&config, &blocklist));
        let cache = cache.filter(|_| config.cache.enabled);
        Self { config, cache, forwarder }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Handle the one request on `client`.
    pub async fn handle<S>(&self, client: &mut S) -> Result<Outcome, HandlerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let request = self.read_request(client).await?;
        tracing::debug!(fields = %request.describe_fields(), "Request parsed");

        let cache = self.cache.as_ref().filter(|_| {
            self.config.cache.is_cacheable(request.method()) && request.has_absolute_uri()
        });

        if let Some(cache) = cache {
            if let Some(report) = self.serve_cached(cache, &request, client).await? {
                return Ok(Outcome::CacheHit(report));
            }
        }

        match self.relay(&request, cache, client).await {
            Ok(report) => Ok(Outcome::Relayed(report)),
            Err(e) if e.allows_bad_gateway() => {
                tracing::warn!(
                    uri = %request.uri(),
                    error = %e,
                    "Origin failed, answering 502"
                );
                client
                    .write_all(&bad_gateway(Utc::now()))
                    .await
                    .map_err(|source| ForwardError::Destination { name: "client", source })?;
                client
                    .flush()
                    .await
                    .map_err(|source| ForwardError::Destination { name: "client", source })?;
                Ok(Outcome::BadGateway)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_request<S>(&self, client: &mut S) -> Result<Request, HandlerError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.config.limits.request_buffer_bytes];
        let n = read_with_timeout(client, &mut buf, self.config.timeouts.read())
            .await
            .map_err(HandlerError::ClientRead)?;
        let request = Request::parse(&buf[..n])?;

        if request.is_truncated() {
            tracing::warn!(
                uri = %request.uri(),
                limit = self.config.limits.request_buffer_bytes,
                "Request does not fit the read buffer, relaying what was read"
            );
        }
        Ok(request)
    }

    /// Serve `request` from the cache. `None` means the cache had nothing usable.
    async fn serve_cached<S>(
        &self,
        cache: &ContentCache,
        request: &Request,
        client: &mut S,
    ) -> Result<Option<ForwardReport>, HandlerError>
    where
        S: AsyncWrite + Unpin + Send,
    {
        let mut hit = match cache.lookup(request.uri()).await {
            Ok(Some(hit)) => hit,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(uri = %request.uri(), error = %e, "Cache lookup failed, fetching from origin");
                return Ok(None);
            }
        };

        let report = self
            .forwarder
            .forward(&mut hit, &mut [Some(Destination::required("client", client))])
            .await?;
        tracing::info!(
            uri = %request.uri(),
            freshness = hit.freshness().as_str(),
            bytes = report.delivered,
            "Served from cache"
        );
        Ok(Some(report))
    }

    async fn relay<S>(
        &self,
        request: &Request,
        cache: Option<&Arc<ContentCache>>,
        client: &mut S,
    ) -> Result<ForwardReport, HandlerError>
    where
        S: AsyncWrite + Unpin + Send,
    {
        let mut origin = connect(
            request.host_address(),
            request.port(),
            self.config.timeouts.connect(),
        )
        .await
        .map_err(|source| HandlerError::Connect {
            address: format!("{}:{}", request.host_address(), request.port()),
            source,
        })?;
        origin
            .write_all(request.as_bytes())
            .await
            .map_err(HandlerError::OriginWrite)?;

        let mut writer = match cache {
            Some(cache) => open_writer(cache, request.uri()).await,
            None => None,
        };

        let report = self
            .forwarder
            .forward(
                &mut origin,
                &mut [
                    Some(Destination::required("client", client)),
                    writer.as_mut().map(|w| Destination::optional("cache", w)),
                ],
            )
            .await?;

        if let Some(writer) = writer {
            if report.detached.contains(&"cache") {
                tracing::warn!(uri = %request.uri(), "Cache write failed, response not cached");
            } else if let Err(e) = writer.commit().await {
                tracing::warn!(uri = %request.uri(), error = %e, "Failed to commit cache entry");
            }
        }

        tracing::info!(
            uri = %request.uri(),
            status = report.status,
            bytes = report.delivered,
            censored = report.censored,
            "Relayed response"
        );
        Ok(report)
    }
}

async fn open_writer(cache: &ContentCache, uri: &str) -> Option<CacheWriter> {
    match cache.create(uri).await {
        Ok(writer) => Some(writer),
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "Cannot open cache entry, relaying uncached");
            None
        }
    }
}
