//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound call (headers, :path = /pkg.Service/Method)
//!     → metadata.rs (configured keys, case-insensitive lookup)
//!     → director.rs (pure: service name + balancer hint)
//!     → router.rs (StreamDirector)
//!         - DiscoveryDirector: hint → pool policy → BackendManager → pick
//!         - UpstreamDirector: one pinned service on a fixed address
//!     → Return: reserved backend or an RPC status
//! ```
//!
//! # Design Decisions
//! - The routing function is pure; all I/O lives behind `StreamDirector`
//! - Explicit app-name metadata wins over the method path
//! - An app id always pins the call with the specify policy

pub mod director;
pub mod metadata;
pub mod router;

pub use director::{route, BalancerHint, RouteTarget};
pub use metadata::MetadataKeys;
pub use router::{DiscoveryDirector, Outbound, StreamDirector, UpstreamDirector};
