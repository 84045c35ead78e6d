//! Response inspection and synthesized responses.
//!
//! # Responsibilities
//! - Read the status code and headers of a buffered response head
//! - Decide whether a response carries text (and may be censored)
//! - Drop headers from a head before it is forwarded
//! - Build the fixed `502 Bad Gateway` response

use chrono::{DateTime, Utc};

use crate::http::request::format_http_date;

/// Body sent when the origin cannot be reached.
pub const BAD_GATEWAY_BODY: &str = "<html><head><title>502 Bad Gateway</title></head><body><h1>Bad Gateway</h1><p>The origin server could not be reached</p></body></html>";

/// Build the complete `502 Bad Gateway` response.
pub fn bad_gateway(now: DateTime<Utc>) -> Vec<u8> {
    format!(
        "HTTP/1.0 502 Bad Gateway\r\nDate: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        format_http_date(now),
        BAD_GATEWAY_BODY.len(),
        BAD_GATEWAY_BODY
    )
    .into_bytes()
}

/// Status line and headers of a response.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    status: Option<u16>,
    headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Parse the header block (status line through the blank line).
    /// Unparseable lines are ignored.
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut lines = text.split("\r\n");
        let status = lines.next().and_then(parse_status_line);

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self { status, headers }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True when `Content-Type` declares a `text/*` media type.
    pub fn is_text(&self) -> bool {
        self.header("Content-Type")
            .map(|ct| ct.len() >= 5 && ct[..5].eq_ignore_ascii_case("text/"))
            .unwrap_or(false)
    }
}

/// Status code from a line such as `HTTP/1.0 304 Not Modified`.
pub fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.to_ascii_uppercase().starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Remove every header line called `name` from a response head.
pub fn strip_header(head: &[u8], name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.len());
    let mut first = true;
    for line in head.split_inclusive(|&b| b == b'\n') {
        let drop = !first
            && line
                .iter()
                .position(|&b| b == b':')
                .map(|idx| line[..idx].trim_ascii().eq_ignore_ascii_case(name.as_bytes()))
                .unwrap_or(false);
        if !drop {
            out.extend_from_slice(line);
        }
        first = false;
    }
    out
}
