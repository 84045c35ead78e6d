//! Header terminator detection across chunk boundaries.

/// The blank line separating an HTTP header block from its body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const TAIL: usize = HEADER_TERMINATOR.len() - 1;

/// Finds `\r\n\r\n` in a stream fed one chunk at a time.
///
/// Keeps the last three bytes seen so a terminator split across two reads
/// (`"...\r\n"` | `"\r\n..."`) is still recognized.
#[derive(Debug, Clone, Default)]
pub struct TerminatorScanner {
    tail: [u8; TAIL],
    tail_len: usize,
    found: bool,
}

impl TerminatorScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminator has been seen.
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Scan the next chunk.
    ///
    /// Returns the offset in `chunk` just past the terminator when it
    /// completes inside this chunk. Returns `None` once the terminator has
    /// already been reported.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        if self.found {
            return None;
        }

        // Terminators that start in the saved tail and end in this chunk.
        if self.tail_len > 0 {
            let mut joined = [0u8; 2 * TAIL];
            joined[..self.tail_len].copy_from_slice(&self.tail[..self.tail_len]);
            let head = chunk.len().min(TAIL);
            joined[self.tail_len..self.tail_len + head].copy_from_slice(&chunk[..head]);
            let joined = &joined[..self.tail_len + head];

            if let Some(start) = joined
                .windows(HEADER_TERMINATOR.len())
                .position(|w| w == HEADER_TERMINATOR)
                .filter(|&start| start < self.tail_len)
            {
                self.found = true;
                return Some(start + HEADER_TERMINATOR.len() - self.tail_len);
            }
        }

        if let Some(start) = find(chunk, HEADER_TERMINATOR) {
            self.found = true;
            return Some(start + HEADER_TERMINATOR.len());
        }

        self.remember_tail(chunk);
        None
    }

    fn remember_tail(&mut self, chunk: &[u8]) {
        if chunk.len() >= TAIL {
            self.tail.copy_from_slice(&chunk[chunk.len() - TAIL..]);
            self.tail_len = TAIL;
            return;
        }
        let keep = (TAIL - chunk.len()).min(self.tail_len);
        let mut tail = [0u8; TAIL];
        tail[..keep].copy_from_slice(&self.tail[self.tail_len - keep..self.tail_len]);
        tail[keep..keep + chunk.len()].copy_from_slice(chunk);
        self.tail = tail;
        self.tail_len = keep + chunk.len();
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
