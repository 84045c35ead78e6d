//! HTTP/1.0 request parsing.
//!
//! # Responsibilities
//! - Parse the request line and headers from a single bounded read
//! - Derive the origin host/port from the `Host` header or an absolute URI
//! - Keep the raw bytes for verbatim retransmission to the origin
//! - Build the conditional (If-Modified-Since) request used for cache revalidation
//!
//! # Design Decisions
//! - A request is parsed from exactly one read; bytes beyond the read buffer are
//!   never reassembled. `is_truncated` reports requests whose header block did
//!   not fit, so callers can log the hard limit instead of hiding it
//! - Only `HTTP/1.0` is accepted
//! - Malformed header lines are skipped, not rejected

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

use crate::censor::scan::HEADER_TERMINATOR;

/// Port used when neither the `Host` header nor the URI names one.
pub const DEFAULT_PORT: u16 = 80;

/// The only protocol version this proxy speaks.
pub const SUPPORTED_VERSION: &str = "HTTP/1.0";

/// Reasons a client request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("empty request")]
    Empty,

    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("cannot resolve origin host for {0:?}")]
    UnresolvableHost(String),
}

/// `[scheme://]host[:port][/path]`, where host may be a bracketed IPv6 literal.
fn uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i:https?://)?(\[[^\]/\s]+\]|[^/:?#\s\[\]]+)(?::(\d+))?(?:[/?#].*)?$")
            .expect("URI pattern is valid")
    })
}

/// Host (as written, brackets kept) and explicit port (if any) extracted from a URI.
fn match_uri(uri: &str) -> Option<(&str, Option<&str>)> {
    let captures = uri_pattern().captures(uri)?;
    let host = captures.get(1)?.as_str();
    let port = captures.get(2).map(|m| m.as_str());
    Some((host, port))
}

/// `[::1]` -> `::1`; other hosts unchanged.
fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// True when `uri` names its origin (`http://host/...`). Only such URIs
/// identify a single resource across clients.
pub fn is_absolute_uri(uri: &str) -> bool {
    let lower = uri.get(..8).unwrap_or(uri).to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && match_uri(uri).is_some()
}

/// Split a `Host` value into host and port text. A bracketed IPv6 literal
/// keeps its colons.
fn split_authority(authority: &str) -> Result<(&str, Option<&str>), RequestError> {
    let authority = authority.trim();
    let Some(rest) = authority.strip_prefix('[') else {
        let mut parts = authority.splitn(2, ':');
        return Ok((parts.next().unwrap_or_default().trim(), parts.next()));
    };
    let close = rest
        .find(']')
        .ok_or_else(|| RequestError::UnresolvableHost(authority.to_string()))?;
    match &rest[close + 1..] {
        "" => Ok((&rest[..close], None)),
        tail => match tail.strip_prefix(':') {
            Some(port) => Ok((&rest[..close], Some(port))),
            None => Err(RequestError::InvalidPort(tail.to_string())),
        },
    }
}

fn parse_port(port: Option<&str>) -> Result<u16, RequestError> {
    match port {
        None => Ok(DEFAULT_PORT),
        Some(p) => p
            .trim()
            .parse::<u16>()
            .map_err(|_| RequestError::InvalidPort(p.to_string())),
    }
}

/// Split `Name: value` on the first colon followed by whitespace.
fn split_header(line: &str) -> Option<(&str, &str)> {
    let idx = line
        .as_bytes()
        .windows(2)
        .position(|w| w[0] == b':' && w[1].is_ascii_whitespace())?;
    let name = line[..idx].trim();
    if name.is_empty() {
        return None;
    }
    Some((name, line[idx + 1..].trim()))
}

/// A parsed HTTP/1.0 request.
///
/// A value of this type is always valid: parsing failures are reported as
/// [`RequestError`] instead.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    uri: String,
    version: String,
    host_address: String,
    port: u16,
    headers: Vec<(String, String)>,
    raw: Vec<u8>,
    truncated: bool,
}

impl Request {
    /// Parse the bytes of one client read.
    pub fn parse(bytes: &[u8]) -> Result<Self, RequestError> {
        if bytes.is_empty() {
            return Err(RequestError::Empty);
        }

        let text = String::from_utf8_lossy(bytes);
        let mut lines = text.split("\r\n");
        let request_line = lines.next().unwrap_or_default();

        let params: Vec<&str> = request_line.split_whitespace().collect();
        let [method, uri, version] = params.as_slice() else {
            return Err(RequestError::MalformedRequestLine(request_line.to_string()));
        };

        let method = method.to_ascii_uppercase();
        let version = version.to_ascii_uppercase();
        if version != SUPPORTED_VERSION {
            return Err(RequestError::UnsupportedVersion(version));
        }

        let mut request = Self {
            method,
            uri: uri.to_string(),
            version,
            host_address: String::new(),
            port: DEFAULT_PORT,
            headers: Vec::new(),
            raw: bytes.to_vec(),
            truncated: !bytes.windows(4).any(|w| w == HEADER_TERMINATOR),
        };

        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = split_header(line) {
                request.set_header(name, value);
            }
        }

        let (host, port) = match request.header("Host") {
            Some(host) => {
                let (address, port) = split_authority(host)?;
                (address.to_string(), parse_port(port)?)
            }
            None => {
                let (host, port) = match_uri(&request.uri)
                    .ok_or_else(|| RequestError::UnresolvableHost(request.uri.clone()))?;
                (unbracket(host).to_string(), parse_port(port)?)
            }
        };
        if host.is_empty() {
            return Err(RequestError::UnresolvableHost(request.uri));
        }
        request.host_address = host;
        request.port = port;

        Ok(request)
    }

    /// Build `GET <uri> HTTP/1.0` carrying `If-Modified-Since: <since>`.
    ///
    /// The `Host` header includes the port only when the URI names one.
    pub fn conditional(uri: &str, since: DateTime<Utc>) -> Result<Self, RequestError> {
        let (host, explicit_port) =
            match_uri(uri).ok_or_else(|| RequestError::UnresolvableHost(uri.to_string()))?;
        let port = parse_port(explicit_port)?;

        let host_header = match explicit_port {
            Some(p) => format!("{}:{}", host, p),
            None => host.to_string(),
        };
        let since = format_http_date(since);
        let raw = format!(
            "GET {} {}\r\nHost: {}\r\nIf-Modified-Since: {}\r\n\r\n",
            uri, SUPPORTED_VERSION, host_header, since
        );

        Ok(Self {
            method: "GET".to_string(),
            uri: uri.to_string(),
            version: SUPPORTED_VERSION.to_string(),
            host_address: unbracket(host).to_string(),
            port,
            headers: vec![
                ("Host".to_string(), host_header),
                ("If-Modified-Since".to_string(), since),
            ],
            raw: raw.into_bytes(),
            truncated: false,
        })
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// See [`is_absolute_uri`].
    pub fn has_absolute_uri(&self) -> bool {
        is_absolute_uri(&self.uri)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn host_address(&self) -> &str {
        &self.host_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Headers in the order received, names as sent by the client.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The bytes to send to the origin unchanged.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// True when the header terminator was not part of the single read.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// `Name: value` lines for every field, in insertion order. Debug aid.
    pub fn describe_fields(&self) -> String {
        let mut lines = vec![
            format!("Method: {}", self.method),
            format!("URI: {}", self.uri),
            format!("Http-Version: {}", self.version),
        ];
        lines.extend(self.headers.iter().map(|(n, v)| format!("{}: {}", n, v)));
        lines.push(format!("Host-Address: {}", self.host_address));
        lines.push(format!("Port: {}", self.port));
        lines.join("\n")
    }
}

/// RFC 1123 date in GMT, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
