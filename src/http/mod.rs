//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, one task per connection)
//!     → handler.rs (read request, cache check, origin relay, 502)
//!     → request.rs (parse request line and headers, resolve origin)
//!     → forward.rs (split header/body, censor, fan out)
//!     → response.rs (inspect response head, build 502)
//!     → client socket and/or cache file
//! ```

pub mod forward;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use handler::{ConnectionHandler, HandlerError, Outcome};
pub use request::{Request, RequestError};
pub use server::ProxyServer;
