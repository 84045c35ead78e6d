//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI flags override individual fields (main.rs)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to every connection task
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Caching and censoring are switched here, never by compile-time constants

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ProxyConfig;
pub use schema::ListenerConfig;
pub use schema::CacheConfig;
pub use schema::CensorConfig;
pub use schema::TimeoutConfig;
pub use schema::LimitsConfig;
pub use schema::ObservabilityConfig;
