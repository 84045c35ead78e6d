//! The set of words to redact.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

/// Lower-cased words to censor.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    words: HashSet<String>,
    longest: usize,
}

impl Blocklist {
    /// Build a blocklist from words. Entries are trimmed and lower-cased;
    /// blank entries are dropped.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for word in words {
            let word = word.as_ref().trim();
            if word.is_empty() {
                continue;
            }
            if !word.bytes().all(|b| b.is_ascii_alphabetic()) {
                // The filter only groups ASCII letters into words.
                tracing::debug!(word = %word, "Blocklist entry contains non-letters and can never match");
                continue;
            }
            let word = word.to_ascii_lowercase();
            list.longest = list.longest.max(word.len());
            list.words.insert(word);
        }
        list
    }

    /// Load one word per line. A missing file, or a directory, yields an
    /// empty blocklist.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                tracing::warn!(path = %path.display(), "Blocklist path is a directory, censoring nothing");
                return Ok(Self::default());
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No blocklist file, censoring nothing");
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        }

        let content = tokio::fs::read_to_string(path).await?;
        let list = Self::new(content.lines());
        tracing::info!(path = %path.display(), words = list.len(), "Blocklist loaded");
        Ok(list)
    }

    /// Case-insensitive membership test for a run of ASCII letters.
    pub fn contains(&self, word: &[u8]) -> bool {
        if word.len() > self.longest {
            return false;
        }
        match std::str::from_utf8(word) {
            Ok(word) => self.words.contains(&word.to_ascii_lowercase()),
            Err(_) => false,
        }
    }

    /// Length of the longest entry; longer runs can never match.
    pub fn longest_word(&self) -> usize {
        self.longest
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
