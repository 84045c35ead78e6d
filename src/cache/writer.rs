//! Staged cache writes.
//!
//! Response bytes go to a temporary file next to the entry. `commit` renames
//! it over the entry's file, so a concurrent reader opens either the old or
//! the new complete file. A writer dropped without `commit` deletes its
//! temporary file.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::cache::entry::{encode_metadata, CacheEntry, EntryMeta};
use crate::cache::CacheError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write side of a cache entry.
#[derive(Debug)]
pub struct CacheWriter {
    entry: Arc<CacheEntry>,
    file: Option<BufWriter<File>>,
    temp_path: PathBuf,
    meta: EntryMeta,
    committed: bool,
}

impl CacheWriter {
    /// Start a new file for `entry` with its metadata header already written.
    pub(crate) async fn create(
        entry: Arc<CacheEntry>,
        retrieved: DateTime<Utc>,
    ) -> Result<Self, CacheError> {
        let temp_path = temp_path_for(&entry);
        let file = File::create(&temp_path)
            .await
            .map_err(|e| CacheError::io(&temp_path, e))?;

        let header = encode_metadata(entry.uri(), retrieved);
        let meta = EntryMeta {
            retrieved,
            body_offset: header.len() as u64,
        };
        let mut writer = Self {
            entry,
            file: Some(BufWriter::new(file)),
            temp_path,
            meta,
            committed: false,
        };
        writer
            .write_all(&header)
            .await
            .map_err(|e| CacheError::io(&writer.temp_path, e))?;
        Ok(writer)
    }

    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    /// Flush, close and publish the file under the entry's name.
    pub async fn commit(mut self) -> Result<(), CacheError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| CacheError::io(&self.temp_path, e))?;
            file.into_inner()
                .sync_all()
                .await
                .map_err(|e| CacheError::io(&self.temp_path, e))?;
        }
        tokio::fs::rename(&self.temp_path, self.entry.path())
            .await
            .map_err(|e| CacheError::io(self.entry.path(), e))?;
        self.committed = true;
        self.entry.set_meta(self.meta);

        tracing::debug!(uri = %self.entry.uri(), path = %self.entry.path().display(), "Cache entry written");
        Ok(())
    }
}

fn temp_path_for(entry: &CacheEntry) -> PathBuf {
    let name = entry
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    entry
        .path()
        .with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), unique))
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "cache writer already closed")
}

impl AsyncWrite for CacheWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut().file.as_mut() {
            Some(file) => Pin::new(file).poll_write(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.temp_path.display(), error = %e, "Failed to remove abandoned cache file");
            }
        }
        tracing::debug!(uri = %self.entry.uri(), "Discarded uncommitted cache write");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry_in(dir: &std::path::Path) -> Arc<CacheEntry> {
        Arc::new(CacheEntry::new("http://example.com/", dir.join("entry")))
    }

    #[tokio::test]
    async fn commit_publishes_file() {
        let dir = tempdir().unwrap();
        let entry = entry_in(dir.path());
        let now = Utc::now();

        let mut writer = CacheWriter::create(Arc::clone(&entry), now).await.unwrap();
        writer.write_all(b"HTTP/1.0 200 OK\r\n\r\nbody").await.unwrap();
        assert!(!entry.path().exists());
        writer.commit().await.unwrap();

        let written = std::fs::read(entry.path()).unwrap();
        let mut expected = encode_metadata("http://example.com/", now);
        expected.extend_from_slice(b"HTTP/1.0 200 OK\r\n\r\nbody");
        assert_eq!(written, expected);
        assert_eq!(entry.retrieved().map(|r| r.timestamp_millis()), Some(now.timestamp_millis()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn dropped_writer_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let entry = entry_in(dir.path());
        std::fs::write(entry.path(), b"previous").unwrap();

        let mut writer = CacheWriter::create(Arc::clone(&entry), Utc::now()).await.unwrap();
        writer.write_all(b"HTTP/1.0 200 OK\r\n").await.unwrap();
        drop(writer);

        assert_eq!(std::fs::read(entry.path()).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
