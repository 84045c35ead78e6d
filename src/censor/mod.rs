//! Response body censoring subsystem.
//!
//! # Data Flow
//! ```text
//! blocklist file
//!     → blocklist.rs (one lower-cased word per line, loaded once at startup)
//!     → Arc<Blocklist> shared read-only by every connection
//!
//! response chunk
//!     → scan.rs (find \r\n\r\n, even across chunk boundaries)
//!     → filter.rs (group letters into words, redact complete matches)
//!     → censored chunk
//! ```
//!
//! # Design Decisions
//! - Header bytes are never censored
//! - A word is judged only when complete; partial words carry to the next chunk
//! - Every match becomes the same 3-byte token, independent of word length

pub mod blocklist;
pub mod filter;
pub mod scan;

pub use blocklist::Blocklist;
pub use filter::{CensorFilter, REDACTION};
pub use scan::{TerminatorScanner, HEADER_TERMINATOR};
