//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Pick the log filter from `RUST_LOG`, falling back to the configured level
//!
//! # Design Decisions
//! - Uses the tracing crate for structured, span-aware logging
//! - Human-readable `fmt` output; the filter is the only runtime knob

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter used by [`init_tracing`].
///
/// `RUST_LOG` wins when set and valid; otherwise `default_level` applies to
/// this crate only.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sieve_proxy={}", default_level)))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing("debug");
        init_tracing("info");
    }
}
