//! Cache entries and their on-disk metadata.
//!
//! File layout:
//! ```text
//! <uri>\r\n
//! <epoch millis>\r\n
//! <raw HTTP response, status line onward>
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest accepted timestamp line, CRLF included.
const MAX_TIMESTAMP_LINE: u64 = 24;

/// What the metadata header of a cache file says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    /// When the stored response was fetched from the origin.
    pub retrieved: DateTime<Utc>,
    /// Offset of the first response byte in the file.
    pub body_offset: u64,
}

/// Result of checking a cache file against a URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredMeta {
    /// The file belongs to the URI.
    Matches(EntryMeta),
    /// The file holds another URI with the same digest.
    Collision,
    /// The header is unreadable.
    Corrupt,
}

/// One cached URI. Shared through an `Arc` by every connection that
/// touches the URI.
#[derive(Debug)]
pub struct CacheEntry {
    uri: String,
    path: PathBuf,
    meta: RwLock<Option<EntryMeta>>,
}

impl CacheEntry {
    pub fn new(uri: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.into(),
            path: path.into(),
            meta: RwLock::new(None),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata from the last time the file was read or written, if any.
    pub fn meta(&self) -> Option<EntryMeta> {
        match self.meta.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn retrieved(&self) -> Option<DateTime<Utc>> {
        self.meta().map(|m| m.retrieved)
    }

    pub(crate) fn set_meta(&self, meta: EntryMeta) {
        match self.meta.write() {
            Ok(mut guard) => *guard = Some(meta),
            Err(poisoned) => *poisoned.into_inner() = Some(meta),
        }
    }

    pub(crate) fn clear_meta(&self) {
        match self.meta.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Metadata header for a response fetched at `retrieved`.
pub fn encode_metadata(uri: &str, retrieved: DateTime<Utc>) -> Vec<u8> {
    format!("{}\r\n{}\r\n", uri, retrieved.timestamp_millis()).into_bytes()
}

/// Read the metadata header from the start of a cache file, leaving the
/// reader positioned at the response.
pub async fn read_metadata<R>(reader: &mut R, uri: &str) -> io::Result<StoredMeta>
where
    R: AsyncBufRead + Unpin,
{
    let expected = format!("{}\r\n", uri);
    let mut line = Vec::with_capacity(expected.len());
    (&mut *reader)
        .take(expected.len() as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if line != expected.as_bytes() {
        return Ok(StoredMeta::Collision);
    }

    let mut stamp = Vec::new();
    (&mut *reader)
        .take(MAX_TIMESTAMP_LINE)
        .read_until(b'\n', &mut stamp)
        .await?;
    let Some(digits) = stamp.strip_suffix(b"\r\n") else {
        return Ok(StoredMeta::Corrupt);
    };
    let retrieved = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    Ok(match retrieved {
        Some(retrieved) => StoredMeta::Matches(EntryMeta {
            retrieved,
            body_offset: (line.len() + stamp.len()) as u64,
        }),
        None => StoredMeta::Corrupt,
    })
}
