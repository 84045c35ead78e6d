//! Streaming word redaction.
//!
//! Bytes are grouped into runs of ASCII letters. A run is only judged once
//! it is complete, that is once a non-letter byte follows it or the stream
//! ends, so a word cut in half by a read boundary is carried into the next
//! call instead of being evaluated early.

use std::sync::Arc;

use crate::censor::blocklist::Blocklist;
use crate::censor::scan::TerminatorScanner;

/// Replacement for every blocklisted word, whatever its length.
pub const REDACTION: &[u8] = b"---";

/// Per-response censoring state.
#[derive(Debug)]
pub struct CensorFilter {
    blocklist: Arc<Blocklist>,
    header_passed: bool,
    scanner: TerminatorScanner,
    /// Letters of a word that may continue in the next chunk.
    carry: Vec<u8>,
    /// The current run outgrew every blocklisted word and is passed through.
    overlong: bool,
    redactions: u64,
}

impl CensorFilter {
    /// A filter positioned at the start of a response; header bytes pass
    /// through untouched until `\r\n\r\n`.
    pub fn new(blocklist: Arc<Blocklist>) -> Self {
        Self {
            blocklist,
            header_passed: false,
            scanner: TerminatorScanner::new(),
            carry: Vec::new(),
            overlong: false,
            redactions: 0,
        }
    }

    /// A filter for a stream that holds body bytes only.
    pub fn for_body(blocklist: Arc<Blocklist>) -> Self {
        Self {
            header_passed: true,
            ..Self::new(blocklist)
        }
    }

    /// Whether the header terminator has been passed.
    pub fn header_passed(&self) -> bool {
        self.header_passed
    }

    /// Number of words replaced so far.
    pub fn redactions(&self) -> u64 {
        self.redactions
    }

    /// Censor the next chunk.
    ///
    /// The output may be shorter or longer than the input: letters at the
    /// end of `chunk` are held back until the word is known to be complete.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len() + self.carry.len());

        let body = if self.header_passed {
            chunk
        } else {
            match self.scanner.feed(chunk) {
                Some(end) => {
                    out.extend_from_slice(&chunk[..end]);
                    self.header_passed = true;
                    &chunk[end..]
                }
                None => {
                    out.extend_from_slice(chunk);
                    return out;
                }
            }
        };

        for &byte in body {
            if byte.is_ascii_alphabetic() {
                if self.overlong {
                    out.push(byte);
                    continue;
                }
                self.carry.push(byte);
                if self.carry.len() > self.blocklist.longest_word() {
                    out.append(&mut self.carry);
                    self.overlong = true;
                }
            } else {
                self.finish_word(&mut out);
                self.overlong = false;
                out.push(byte);
            }
        }

        out
    }

    /// Flush a word left pending at end of stream.
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.finish_word(&mut out);
        self.overlong = false;
        out
    }

    fn finish_word(&mut self, out: &mut Vec<u8>) {
        if self.carry.is_empty() {
            return;
        }
        if self.blocklist.contains(&self.carry) {
            out.extend_from_slice(REDACTION);
            self.redactions += 1;
        } else {
            out.extend_from_slice(&self.carry);
        }
        self.carry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocklist(words: &[&str]) -> Arc<Blocklist> {
        Arc::new(Blocklist::new(words.iter().copied()))
    }

    fn run(filter: &mut CensorFilter, chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(filter.process(chunk));
        }
        out.extend(filter.finish());
        out
    }

    #[test]
    fn redacts_body_word() {
        let mut filter = CensorFilter::for_body(blocklist(&["bad"]));
        assert_eq!(run(&mut filter, &[b"this is bad."]), b"this is ---.");
        assert_eq!(filter.redactions(), 1);
    }

    #[test]
    fn matching_is_case_insensitive_and_whole_word() {
        let mut filter = CensorFilter::for_body(blocklist(&["bad"]));
        assert_eq!(
            run(&mut filter, &[b"BAD badge Bad, abad bad"]),
            b"--- badge ---, abad ---"
        );
    }

    #[test]
    fn long_words_become_fixed_token() {
        let mut filter = CensorFilter::for_body(blocklist(&["extraordinarily"]));
        assert_eq!(run(&mut filter, &[b"(extraordinarily)"]), b"(---)");
    }

    #[test]
    fn word_split_across_chunks_is_redacted() {
        let mut filter = CensorFilter::for_body(blocklist(&["example", "bad"]));
        let first = filter.process(b"an examp");
        assert_eq!(first, b"an ");
        let second = filter.process(b"le bad");
        assert_eq!(second, b"--- ");
        assert_eq!(filter.finish(), b"---");
    }

    #[test]
    fn word_at_end_of_stream_is_evaluated() {
        let mut filter = CensorFilter::for_body(blocklist(&["bad"]));
        assert_eq!(run(&mut filter, &[b"so b", b"a", b"d"]), b"so ---");
    }

    #[test]
    fn header_words_are_never_redacted() {
        let mut filter = CensorFilter::new(blocklist(&["bad", "text"]));
        let response = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nX-Note: bad\r\n\r\nbad text";
        assert_eq!(
            run(&mut filter, &[response]),
            b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nX-Note: bad\r\n\r\n--- ---".to_vec()
        );
        assert!(filter.header_passed());
    }

    #[test]
    fn header_terminator_split_across_chunks() {
        let mut filter = CensorFilter::new(blocklist(&["bad"]));
        let out = run(&mut filter, &[b"HTTP/1.0 200 OK\r\nX: bad\r\n\r", b"\nbad"]);
        assert_eq!(out, b"HTTP/1.0 200 OK\r\nX: bad\r\n\r\n---");
    }

    #[test]
    fn header_passed_is_false_until_terminator() {
        let mut filter = CensorFilter::new(blocklist(&["bad"]));
        assert_eq!(filter.process(b"HTTP/1.0 200 OK\r\nbad"), b"HTTP/1.0 200 OK\r\nbad");
        assert!(!filter.header_passed());
    }

    #[test]
    fn redaction_is_idempotent() {
        let words = blocklist(&["bad", "ugly"]);
        let input: &[u8] = b"the bad, the ugly and the good";
        let once = run(&mut CensorFilter::for_body(words.clone()), &[input]);
        let twice = run(&mut CensorFilter::for_body(words), &[&once]);
        assert_eq!(once, twice);
    }

    #[test]
    fn overlong_runs_pass_through_without_buffering() {
        let mut filter = CensorFilter::for_body(blocklist(&["bad"]));
        let out = filter.process(b"badbadbad");
        assert_eq!(out, b"badbadbad");
        assert_eq!(run(&mut filter, &[b"bad bad"]), b"bad ---");
    }

    #[test]
    fn empty_blocklist_is_a_no_op() {
        let mut filter = CensorFilter::for_body(Arc::new(Blocklist::default()));
        let input: &[u8] = b"nothing to see here\r\n";
        assert_eq!(run(&mut filter, &[input]), input);
        assert_eq!(filter.redactions(), 0);
    }

    #[test]
    fn non_ascii_bytes_end_words() {
        let mut filter = CensorFilter::for_body(blocklist(&["bad"]));
        assert_eq!(run(&mut filter, &["bad\u{e9}".as_bytes()]), "---\u{e9}".as_bytes());
    }
}
