//! The content cache.
//!
//! # Responsibilities
//! - Map URIs to cache files and keep one in-memory entry per URI
//! - Serve verified, revalidated entries
//! - Hand out staged writers for new responses

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use dashmap::DashMap;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt, BufReader, ReadBuf};

use crate::cache::entry::{read_metadata, CacheEntry, EntryMeta, StoredMeta};
use crate::cache::key::KeyMemo;
use crate::cache::revalidation::{revalidate, Freshness, RevalidationOptions};
use crate::cache::writer::CacheWriter;
use crate::cache::CacheError;
use crate::config::ProxyConfig;
use crate::http::request::{is_absolute_uri, RequestError};
use crate::observability::metrics;

/// A usable cache entry, positioned at its stored response.
#[derive(Debug)]
pub struct CacheHit {
    entry: Arc<CacheEntry>,
    freshness: Freshness,
    file: File,
}

impl CacheHit {
    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }
}

impl AsyncRead for CacheHit {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

/// Disk-backed response cache keyed by URI.
#[derive(Debug)]
pub struct ContentCache {
    directory: PathBuf,
    keys: KeyMemo,
    entries: DashMap<String, Arc<CacheEntry>>,
    revalidation: RevalidationOptions,
}

impl ContentCache {
    /// Open the cache in `directory`, creating it if missing.
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        match tokio::fs::metadata(&directory).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(CacheError::NotADirectory(directory)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&directory)
                    .await
                    .map_err(|e| CacheError::io(&directory, e))?;
                tracing::info!(directory = %directory.display(), "Created cache directory");
            }
            Err(e) => return Err(CacheError::io(&directory, e)),
        }

        Ok(Self {
            directory,
            keys: KeyMemo::new(),
            entries: DashMap::new(),
            revalidation: RevalidationOptions::default(),
        })
    }

    /// Open the cache described by the `[cache]` section, using the
    /// configured origin timeouts for revalidation.
    pub async fn from_config(config: &ProxyConfig) -> Result<Self, CacheError> {
        Ok(Self::new(&config.cache.directory)
            .await?
            .with_revalidation(RevalidationOptions {
                connect_timeout: config.timeouts.connect(),
                read_timeout: config.timeouts.read(),
                chunk_bytes: config.limits.chunk_bytes,
            }))
    }

    pub fn with_revalidation(mut self, options: RevalidationOptions) -> Self {
        self.revalidation = options;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file that backs `uri`.
    pub fn path_for(&self, uri: &str) -> PathBuf {
        self.directory.join(self.keys.file_name(uri))
    }

    /// The shared entry for `uri`.
    pub fn entry(&self, uri: &str) -> Arc<CacheEntry> {
        if let Some(entry) = self.entries.get(uri) {
            return Arc::clone(entry.value());
        }
        let path = self.path_for(uri);
        Arc::clone(
            self.entries
                .entry(uri.to_string())
                .or_insert_with(|| Arc::new(CacheEntry::new(uri, path)))
                .value(),
        )
    }

    /// Number of URIs with an in-memory entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find a usable entry for `uri`.
    ///
    /// A missing file, a digest collision or an unreadable header is a miss.
    /// A present entry is revalidated before it is returned. A URI that does
    /// not name its origin can be neither shared nor revalidated, so it is
    /// always a miss.
    pub async fn lookup(&self, uri: &str) -> Result<Option<CacheHit>, CacheError> {
        if !is_absolute_uri(uri) {
            metrics::record_cache_lookup("uncacheable");
            return Ok(None);
        }
        let entry = self.entry(uri);

        match open_verified(&entry).await? {
            Opened::Ready(_) => {}
            Opened::Missing => {
                metrics::record_cache_lookup("miss");
                return Ok(None);
            }
            Opened::Rejected(reason) => {
                tracing::debug!(uri = %uri, reason, "Cache file does not match URI");
                metrics::record_cache_lookup("collision");
                return Ok(None);
            }
        }

        let freshness = self.revalidate(&entry).await;

        // Reopen: revalidation may have replaced the file.
        match open_verified(&entry).await? {
            Opened::Ready(file) => {
                metrics::record_cache_lookup("hit");
                tracing::debug!(uri = %uri, freshness = freshness.as_str(), "Cache hit");
                Ok(Some(CacheHit { entry, freshness, file }))
            }
            Opened::Missing | Opened::Rejected(_) => {
                metrics::record_cache_lookup("miss");
                Ok(None)
            }
        }
    }

    /// Start writing a fresh response for `uri`. Nothing is visible until
    /// [`CacheWriter::commit`].
    pub async fn create(&self, uri: &str) -> Result<CacheWriter, CacheError> {
        if !is_absolute_uri(uri) {
            return Err(RequestError::UnresolvableHost(uri.to_string()).into());
        }
        CacheWriter::create(self.entry(uri), Utc::now()).await
    }

    /// Check `entry` with its origin; see [`Freshness`].
    pub async fn revalidate(&self, entry: &Arc<CacheEntry>) -> Freshness {
        revalidate(entry, &self.revalidation).await
    }
}

enum Opened {
    Ready(File),
    Missing,
    Rejected(&'static str),
}

/// Open the entry's file, check it belongs to the entry's URI, record its
/// metadata and leave the handle positioned at the response.
async fn open_verified(entry: &CacheEntry) -> Result<Opened, CacheError> {
    let file = match File::open(entry.path()).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            entry.clear_meta();
            return Ok(Opened::Missing);
        }
        Err(e) => return Err(CacheError::io(entry.path(), e)),
    };

    let mut reader = BufReader::new(file);
    let stored = read_metadata(&mut reader, entry.uri())
        .await
        .map_err(|e| CacheError::io(entry.path(), e))?;
    let meta: EntryMeta = match stored {
        StoredMeta::Matches(meta) => meta,
        StoredMeta::Collision => return Ok(Opened::Rejected("collision")),
        StoredMeta::Corrupt => return Ok(Opened::Rejected("corrupt metadata")),
    };

    let mut file = reader.into_inner();
    file.seek(SeekFrom::Start(meta.body_offset))
        .await
        .map_err(|e| CacheError::io(entry.path(), e))?;
    entry.set_meta(meta);
    Ok(Opened::Ready(file))
}
