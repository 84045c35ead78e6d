//! Cache file names.
//!
//! A URI maps to the lowercase hex MD5 of its bytes. The digest only makes
//! a filesystem-safe name; it says nothing about uniqueness, so readers
//! always compare the URI stored inside the file.

use dashmap::DashMap;
use md5::{Digest, Md5};

/// Lowercase hex MD5 of `input`.
pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Per-process memo of URI → file name.
#[derive(Debug, Default)]
pub struct KeyMemo {
    names: DashMap<String, String>,
}

impl KeyMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// File name for `uri`, computed once per URI.
    pub fn file_name(&self, uri: &str) -> String {
        if let Some(name) = self.names.get(uri) {
            return name.clone();
        }
        self.names
            .entry(uri.to_string())
            .or_insert_with(|| md5_hex(uri))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("http://example.com/"), md5_hex("http://example.com/"));
        assert_ne!(md5_hex("http://example.com/"), md5_hex("http://example.com"));
    }

    #[test]
    fn memo_is_stable_and_filesystem_safe() {
        let memo = KeyMemo::new();
        let first = memo.file_name("http://example.com/a?b=c#d");
        let second = memo.file_name("http://example.com/a?b=c#d");
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(memo.len(), 1);
    }
}
