//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → startup wires resolver, balancer, routing and server from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → static service table republished into the in-process directory
//! ```
//!
//! # Design Decisions
//! - Only the static service table is hot-reloaded; everything else needs a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BalancerConfig, HealthConfig, ListenerConfig, ObservabilityConfig, RelayConfig,
    ResolverConfig, RoutingConfig, ServiceConfigEntry, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
