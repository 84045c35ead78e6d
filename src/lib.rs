//! Sieve: an HTTP/1.0 forward proxy with a disk cache and body censoring.

pub mod cache;
pub mod censor;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use cache::ContentCache;
pub use censor::{Blocklist, CensorFilter};
pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
