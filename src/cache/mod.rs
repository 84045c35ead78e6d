//! Disk cache subsystem.
//!
//! # Data Flow
//! ```text
//! lookup(uri)
//!     → key.rs (MD5 file name, memoized)
//!     → entry.rs (verify stored URI, read timestamp)
//!     → revalidation.rs (If-Modified-Since against the origin)
//!     → CacheHit positioned at the stored response
//!
//! create(uri)
//!     → writer.rs (temp file, metadata header)
//!     → commit renames over the entry's file
//! ```
//!
//! # Design Decisions
//! - Every read checks the URI stored in the file; the digest is only a name
//! - Revalidation fails open: an unreachable origin serves the stored copy
//! - No eviction; files live until removed by hand

pub mod entry;
pub mod key;
pub mod revalidation;
pub mod store;
pub mod writer;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::http::request::RequestError;

pub use entry::CacheEntry;
pub use revalidation::{Freshness, RevalidationOptions};
pub use store::{CacheHit, ContentCache};
pub use writer::CacheWriter;

/// Errors from the cache subsystem.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache path {} exists but is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("cache I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot build revalidation request: {0}")]
    Request(#[from] RequestError),

    #[error("origin unavailable for revalidation: {0}")]
    Origin(#[source] io::Error),

    #[error("origin reply has no readable status line")]
    MalformedReply,

    #[error("no stored timestamp for {0}")]
    MissingMetadata(String),
}

impl CacheError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
