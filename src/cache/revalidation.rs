//! Conditional revalidation against the origin.
//!
//! The stored timestamp goes out as `If-Modified-Since`. A `304` keeps the
//! entry; any other reply replaces it with the reply itself. When the origin
//! cannot be asked, the stored copy is served anyway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::cache::entry::CacheEntry;
use crate::cache::writer::CacheWriter;
use crate::cache::CacheError;
use crate::censor::scan::find;
use crate::http::request::Request;
use crate::http::response::parse_status_line;
use crate::net::transport::{connect, read_with_timeout};
use crate::observability::metrics;

/// Longest status line accepted from the origin.
const MAX_STATUS_LINE: usize = 8192;

/// Outcome of a revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The origin answered `304`; the stored copy stands.
    NotModified,
    /// The origin sent a new response, which now backs the entry.
    Replaced,
    /// The origin could not be asked; the stored copy is served as is.
    FailOpen,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::NotModified => "not_modified",
            Freshness::Replaced => "replaced",
            Freshness::FailOpen => "fail_open",
        }
    }
}

/// Origin-facing settings for revalidation.
#[derive(Debug, Clone, Copy)]
pub struct RevalidationOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub chunk_bytes: usize,
}

impl Default for RevalidationOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(30)),
            chunk_bytes: 8192,
        }
    }
}

/// Ask the origin whether `entry` is still current, replacing the stored
/// response when it is not. Never fails; errors become [`Freshness::FailOpen`].
pub async fn revalidate(entry: &Arc<CacheEntry>, options: &RevalidationOptions) -> Freshness {
    let freshness = match try_revalidate(entry, options).await {
        Ok(freshness) => freshness,
        Err(e) => {
            tracing::warn!(
                uri = %entry.uri(),
                error = %e,
                "Revalidation failed, serving cached copy"
            );
            Freshness::FailOpen
        }
    };
    metrics::record_revalidation(freshness.as_str());
    tracing::debug!(uri = %entry.uri(), result = freshness.as_str(), "Revalidated cache entry");
    freshness
}

async fn try_revalidate(
    entry: &Arc<CacheEntry>,
    options: &RevalidationOptions,
) -> Result<Freshness, CacheError> {
    let since = entry
        .retrieved()
        .ok_or_else(|| CacheError::MissingMetadata(entry.uri().to_string()))?;
    let request = Request::conditional(entry.uri(), since)?;

    let mut origin = connect(request.host_address(), request.port(), options.connect_timeout)
        .await
        .map_err(CacheError::Origin)?;
    origin
        .write_all(request.as_bytes())
        .await
        .map_err(CacheError::Origin)?;

    let mut buf = vec![0u8; options.chunk_bytes.max(1)];
    let mut head = Vec::new();
    let line_end = loop {
        if let Some(end) = find(&head, b"\r\n") {
            break end;
        }
        if head.len() > MAX_STATUS_LINE {
            return Err(CacheError::MalformedReply);
        }
        let n = read_with_timeout(&mut origin, &mut buf, options.read_timeout)
            .await
            .map_err(CacheError::Origin)?;
        if n == 0 {
            return Err(CacheError::MalformedReply);
        }
        head.extend_from_slice(&buf[..n]);
    };

    let status = parse_status_line(&String::from_utf8_lossy(&head[..line_end]))
        .ok_or(CacheError::MalformedReply)?;
    if status == 304 {
        return Ok(Freshness::NotModified);
    }

    // Stale: the reply replaces the stored response.
    let mut writer = CacheWriter::create(Arc::clone(entry), Utc::now()).await?;
    let path = entry.path().to_path_buf();
    writer
        .write_all(&head)
        .await
        .map_err(|e| CacheError::io(&path, e))?;
    loop {
        let n = read_with_timeout(&mut origin, &mut buf, options.read_timeout)
            .await
            .map_err(CacheError::Origin)?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| CacheError::io(&path, e))?;
    }
    writer.commit().await?;
    tracing::info!(uri = %entry.uri(), status, "Cache entry replaced by origin");
    Ok(Freshness::Replaced)
}
