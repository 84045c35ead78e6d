//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID, lifetime tracking)
//!     → Hand off to HTTP layer
//!
//! Outgoing origin connection
//!     → transport.rs (connect and read with optional timeouts)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;
pub mod transport;
