//! Response forwarding with fan-out.
//!
//! # Responsibilities
//! - Split the response into header and body while streaming it
//! - Copy header bytes uncensored, pass body bytes through the censor filter
//! - Write the same bytes to every destination, then flush them all
//!
//! # Design Decisions
//! - The header block is buffered (up to `max_header_bytes`) so its
//!   `Content-Type` can be inspected before any body byte is written
//! - Censored responses lose their `Content-Length`; HTTP/1.0 framing by
//!   connection close takes over
//! - A failing optional destination is detached; a failing required one
//!   aborts the forward
//! - Destinations are written in order. An optional write that stalls past
//!   `optional_write_timeout` counts as failed, so a stuck cache file holds
//!   the client back for at most that long

use std::borrow::Cow;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::censor::{Blocklist, CensorFilter, TerminatorScanner};
use crate::config::ProxyConfig;
use crate::http::response::{strip_header, ResponseHead};
use crate::net::transport::read_with_timeout;

/// What happens when writing to a destination fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The forward fails with the destination.
    Required,
    /// The destination is dropped; the others continue.
    Optional,
}

/// One sink of a forwarded response.
pub struct Destination<'a> {
    name: &'static str,
    writer: &'a mut (dyn AsyncWrite + Unpin + Send),
    delivery: Delivery,
    detached: bool,
}

impl<'a> Destination<'a> {
    pub fn required(name: &'static str, writer: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self { name, writer, delivery: Delivery::Required, detached: false }
    }

    pub fn optional(name: &'static str, writer: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self { name, writer, delivery: Delivery::Optional, detached: false }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once a write to this optional destination has failed.
    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

/// Errors that end a forward.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Reading the response failed after `delivered` bytes reached required destinations.
    #[error("reading response failed after {delivered} bytes: {source}")]
    Source {
        delivered: u64,
        #[source]
        source: io::Error,
    },

    /// A required destination could not be written.
    #[error("writing to {name} failed: {source}")]
    Destination {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ForwardError {
    /// Bytes already written to required destinations when the error hit.
    pub fn delivered(&self) -> Option<u64> {
        match self {
            ForwardError::Source { delivered, .. } => Some(*delivered),
            ForwardError::Destination { .. } => None,
        }
    }
}

/// Summary of a completed forward.
#[derive(Debug, Clone, Default)]
pub struct ForwardReport {
    /// Status code from the response's status line, if it parsed.
    pub status: Option<u16>,
    /// Bytes read from the source.
    pub bytes_read: u64,
    /// Bytes written to each required destination.
    pub delivered: u64,
    /// Whether the body went through the censor filter.
    pub censored: bool,
    /// Words replaced by the censor filter.
    pub redactions: u64,
    /// Optional destinations dropped after a write error.
    pub detached: Vec<&'static str>,
}

/// Settings for [`ResponseForwarder`].
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    pub chunk_bytes: usize,
    pub max_header_bytes: usize,
    pub read_timeout: Option<Duration>,
    /// Censor text bodies against this blocklist.
    pub censor: Option<Arc<Blocklist>>,
    /// Longest a single write or flush to an optional destination may take.
    pub optional_write_timeout: Duration,
}

/// Default for [`ForwardOptions::optional_write_timeout`].
pub const OPTIONAL_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

impl ForwardOptions {
    /// Options from the proxy configuration. `blocklist` is used only when
    /// censoring is enabled.
    pub fn from_config(config: &ProxyConfig, blocklist: &Arc<Blocklist>) -> Self {
        Self {
            chunk_bytes: config.limits.chunk_bytes,
            max_header_bytes: config.limits.max_header_bytes,
            read_timeout: config.timeouts.read(),
            censor: config.censor.enabled.then(|| Arc::clone(blocklist)),
            optional_write_timeout: OPTIONAL_WRITE_TIMEOUT,
        }
    }
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            chunk_bytes: 8192,
            max_header_bytes: 64 * 1024,
            read_timeout: None,
            censor: None,
            optional_write_timeout: OPTIONAL_WRITE_TIMEOUT,
        }
    }
}

/// Streams one response to many destinations.
#[derive(Debug, Clone)]
pub struct ResponseForwarder {
    options: ForwardOptions,
}

impl ResponseForwarder {
    pub fn new(options: ForwardOptions) -> Self {
        Self { options }
    }

    /// Forward everything `source` yields. `None` destinations are skipped.
    pub async fn forward<R>(
        &self,
        source: &mut R,
        destinations: &mut [Option<Destination<'_>>],
    ) -> Result<ForwardReport, ForwardError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut report = ForwardReport::default();
        let mut buf = vec![0u8; self.options.chunk_bytes.max(1)];
        let mut head = Vec::new();
        let mut scanner = TerminatorScanner::new();
        let mut in_head = true;
        let mut filter: Option<CensorFilter> = None;
        let stall = self.options.optional_write_timeout;

        loop {
            let n = read_with_timeout(source, &mut buf, self.options.read_timeout)
                .await
                .map_err(|source| ForwardError::Source { delivered: report.delivered, source })?;
            if n == 0 {
                break;
            }
            report.bytes_read += n as u64;
            let chunk = &buf[..n];

            let body = if in_head {
                match scanner.feed(chunk) {
                    Some(end) => {
                        head.extend_from_slice(&chunk[..end]);
                        in_head = false;
                        let (head_out, body_filter) = self.prepare_head(&head, &mut report);
                        filter = body_filter;
                        write_all(destinations, stall, &head_out, &mut report).await?;
                        &chunk[end..]
                    }
                    None => {
                        head.extend_from_slice(chunk);
                        if head.len() >= self.options.max_header_bytes {
                            tracing::warn!(
                                limit = self.options.max_header_bytes,
                                "Response header exceeds limit, forwarding without inspection"
                            );
                            in_head = false;
                            report.status = ResponseHead::parse(&head).status();
                            write_all(destinations, stall, &head, &mut report).await?;
                        }
                        continue;
                    }
                }
            } else {
                chunk
            };

            let out = match filter.as_mut() {
                Some(filter) => Cow::Owned(filter.process(body)),
                None => Cow::Borrowed(body),
            };
            write_all(destinations, stall, &out, &mut report).await?;
        }

        if in_head && !head.is_empty() {
            // Source ended inside the header block.
            report.status = ResponseHead::parse(&head).status();
            write_all(destinations, stall, &head, &mut report).await?;
        }

        if let Some(mut filter) = filter {
            let tail = filter.finish();
            write_all(destinations, stall, &tail, &mut report).await?;
            report.redactions = filter.redactions();
        }

        flush_all(destinations, stall, &mut report).await?;
        Ok(report)
    }

    /// Inspect a complete header block and decide how the body is treated.
    fn prepare_head<'h>(
        &self,
        head: &'h [u8],
        report: &mut ForwardReport,
    ) -> (Cow<'h, [u8]>, Option<CensorFilter>) {
        let parsed = ResponseHead::parse(head);
        report.status = parsed.status();

        match &self.options.censor {
            Some(blocklist) if parsed.is_text() => {
                report.censored = true;
                let filter = CensorFilter::for_body(Arc::clone(blocklist));
                if parsed.header("Content-Length").is_some() {
                    (Cow::Owned(strip_header(head, "Content-Length")), Some(filter))
                } else {
                    (Cow::Borrowed(head), Some(filter))
                }
            }
            _ => (Cow::Borrowed(head), None),
        }
    }
}

/// Write `bytes` to each attached destination in turn. Optional writes are
/// bounded by `stall`.
async fn write_all(
    destinations: &mut [Option<Destination<'_>>],
    stall: Duration,
    bytes: &[u8],
    report: &mut ForwardReport,
) -> Result<(), ForwardError> {
    if bytes.is_empty() {
        return Ok(());
    }
    for dest in destinations.iter_mut().flatten() {
        if dest.detached {
            continue;
        }
        let result = match dest.delivery {
            Delivery::Required => dest.writer.write_all(bytes).await,
            Delivery::Optional => bounded(stall, dest.writer.write_all(bytes)).await,
        };
        if let Err(source) = result {
            detach_or_fail(dest, source, report)?;
        }
    }
    report.delivered += bytes.len() as u64;
    Ok(())
}

async fn flush_all(
    destinations: &mut [Option<Destination<'_>>],
    stall: Duration,
    report: &mut ForwardReport,
) -> Result<(), ForwardError> {
    for dest in destinations.iter_mut().flatten() {
        if dest.detached {
            continue;
        }
        let result = match dest.delivery {
            Delivery::Required => dest.writer.flush().await,
            Delivery::Optional => bounded(stall, dest.writer.flush()).await,
        };
        if let Err(source) = result {
            detach_or_fail(dest, source, report)?;
        }
    }
    Ok(())
}

async fn bounded<F>(limit: Duration, op: F) -> io::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write stalled for {:?}", limit),
        )),
    }
}

fn detach_or_fail(
    dest: &mut Destination<'_>,
    source: io::Error,
    report: &mut ForwardReport,
) -> Result<(), ForwardError> {
    match dest.delivery {
        Delivery::Required => Err(ForwardError::Destination { name: dest.name, source }),
        Delivery::Optional => {
            tracing::warn!(destination = dest.name, error = %source, "Detaching failed destination");
            dest.detached = true;
            report.detached.push(dest.name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Yields the given chunks one read at a time.
    struct Chunked {
        chunks: Vec<Vec<u8>>,
    }

    impl Chunked {
        fn new(chunks: &[&[u8]]) -> Self {
            Self { chunks: chunks.iter().rev().map(|c| c.to_vec()).collect() }
        }
    }

    impl AsyncRead for Chunked {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if let Some(chunk) = self.chunks.pop() {
                buf.put_slice(&chunk);
            }
            Poll::Ready(Ok(()))
        }
    }

    /// Accepts a few bytes and then fails every write.
    struct Flaky {
        accepted: Vec<u8>,
        budget: usize,
    }

    impl AsyncWrite for Flaky {
        fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.accepted.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Never completes a write.
    struct Stalled;

    impl AsyncWrite for Stalled {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    fn censoring(words: &[&str]) -> ResponseForwarder {
        ResponseForwarder::new(ForwardOptions {
            censor: Some(Arc::new(Blocklist::new(words.iter().copied()))),
            ..ForwardOptions::default()
        })
    }

    #[tokio::test]
    async fn forwards_to_every_destination() {
        let response: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nhello";
        let mut source = Chunked::new(&[response]);
        let mut client = Vec::new();
        let mut cache = Vec::new();
        let report = ResponseForwarder::new(ForwardOptions::default())
            .forward(
                &mut source,
                &mut [
                    Some(Destination::required("client", &mut client)),
                    None,
                    Some(Destination::optional("cache", &mut cache)),
                ],
            )
            .await
            .unwrap();

        assert_eq!(client, response);
        assert_eq!(cache, response);
        assert_eq!(report.status, Some(200));
        assert_eq!(report.delivered, response.len() as u64);
        assert!(!report.censored);
    }

    #[tokio::test]
    async fn censors_text_body_and_drops_content_length() {
        let mut source = Chunked::new(&[
            b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 12\r\nX-Word: bad\r\n\r\nthis is b",
            b"ad.",
        ]);
        let mut client = Vec::new();
        let report = censoring(&["bad"])
            .forward(&mut source, &mut [Some(Destination::required("client", &mut client))])
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(client).unwrap(),
            "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nX-Word: bad\r\n\r\nthis is ---."
        );
        assert!(report.censored);
        assert_eq!(report.redactions, 1);
    }

    #[tokio::test]
    async fn header_split_across_reads_is_never_censored() {
        let mut source = Chunked::new(&[
            b"HTTP/1.0 200 OK\r\nContent-Type: text/html\r\nX-Bad: bad\r",
            b"\n\r",
            b"\nbad",
        ]);
        let mut client = Vec::new();
        censoring(&["bad"])
            .forward(&mut source, &mut [Some(Destination::required("client", &mut client))])
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(client).unwrap(),
            "HTTP/1.0 200 OK\r\nContent-Type: text/html\r\nX-Bad: bad\r\n\r\n---"
        );
    }

    #[tokio::test]
    async fn binary_bodies_bypass_censoring() {
        let response: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: 3\r\n\r\nbad";
        let mut source = Chunked::new(&[response]);
        let mut client = Vec::new();
        let report = censoring(&["bad"])
            .forward(&mut source, &mut [Some(Destination::required("client", &mut client))])
            .await
            .unwrap();
        assert_eq!(client, response);
        assert!(!report.censored);
    }

    #[tokio::test]
    async fn failed_optional_destination_is_detached() {
        let response: &[u8] = b"HTTP/1.0 200 OK\r\n\r\n0123456789";
        let mut source = Chunked::new(&[&response[..10], &response[10..]]);
        let mut client = Vec::new();
        let mut cache = Flaky { accepted: Vec::new(), budget: 4 };
        let report = ResponseForwarder::new(ForwardOptions::default())
            .forward(
                &mut source,
                &mut [
                    Some(Destination::optional("cache", &mut cache)),
                    Some(Destination::required("client", &mut client)),
                ],
            )
            .await
            .unwrap();

        assert_eq!(client, response);
        assert_eq!(report.detached, vec!["cache"]);
        assert_eq!(cache.accepted, &response[..4]);
    }

    #[tokio::test]
    async fn failed_required_destination_aborts() {
        let mut source = Chunked::new(&[b"HTTP/1.0 200 OK\r\n\r\nbody"]);
        let mut client = Flaky { accepted: Vec::new(), budget: 0 };
        let err = ResponseForwarder::new(ForwardOptions::default())
            .forward(&mut source, &mut [Some(Destination::required("client", &mut client))])
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Destination { name: "client", .. }));
    }

    #[tokio::test]
    async fn truncated_header_is_still_forwarded() {
        let mut source = Chunked::new(&[b"HTTP/1.0 200 OK\r\nX-Partial: y"]);
        let mut client = Vec::new();
        let report = censoring(&["y"])
            .forward(&mut source, &mut [Some(Destination::required("client", &mut client))])
            .await
            .unwrap();
        assert_eq!(client, b"HTTP/1.0 200 OK\r\nX-Partial: y");
        assert_eq!(report.status, Some(200));
    }

    #[tokio::test]
    async fn oversized_header_is_passed_through() {
        let mut head = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nX-Pad: ".to_vec();
        head.resize(100, b'p');
        let mut source = Chunked::new(&[&head, b"\r\n\r\nbad"]);
        let mut client = Vec::new();
        let forwarder = ResponseForwarder::new(ForwardOptions {
            max_header_bytes: 64,
            censor: Some(Arc::new(Blocklist::new(["bad"]))),
            ..ForwardOptions::default()
        });
        let report = forwarder
            .forward(&mut source, &mut [Some(Destination::required("client", &mut client))])
            .await
            .unwrap();
        assert!(client.ends_with(b"\r\n\r\nbad"));
        assert!(!report.censored);
    }

    #[tokio::test]
    async fn stalled_optional_destination_is_detached_after_timeout() {
        let response: &[u8] = b"HTTP/1.0 200 OK\r\n\r\nstill delivered";
        let mut source = Chunked::new(&[&response[..19], &response[19..]]);
        let mut cache = Stalled;
        let mut client = Vec::new();
        let forwarder = ResponseForwarder::new(ForwardOptions {
            optional_write_timeout: Duration::from_millis(50),
            ..ForwardOptions::default()
        });
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            forwarder.forward(
                &mut source,
                &mut [
                    Some(Destination::optional("cache", &mut cache)),
                    Some(Destination::required("client", &mut client)),
                ],
            ),
        )
        .await
        .expect("stalled cache must not hold the client")
        .unwrap();

        assert_eq!(client, response);
        assert_eq!(report.detached, vec!["cache"]);
    }
}
