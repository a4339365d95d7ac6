//! gRPC relay library: service directory, resolver, load balancing pickers,
//! routing director and a protocol-oblivious reverse proxy.

// Core subsystems
pub mod config;
pub mod discovery;
pub mod http;
pub mod resolver;
pub mod routing;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::RelayConfig;
pub use http::RelayServer;
pub use lifecycle::Shutdown;
