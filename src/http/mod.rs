//! HTTP/2 protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! h2c connection
//!     → server.rs (Axum setup, request-id and trace layers)
//!     → local routes, or the fallback:
//!     → proxy.rs (validate path, StreamDirector picks a backend)
//!     → request.rs (outbound request, deadline)
//!     → relay.rs (inbound ⇄ outbound frame loops)
//!     → response.rs (statuses as trailers)
//!     → Send to client
//! ```

pub mod proxy;
pub mod relay;
pub mod request;
pub mod response;
pub mod server;

pub use proxy::{proxy_handler, ProxyState};
pub use relay::RelayError;
pub use request::X_REQUEST_ID;
pub use server::RelayServer;
