//! Service directory interface.
//!
//! # Data Flow
//! ```text
//! Directory backend (memory.rs, or any external registry)
//!     → watch(name) → WatchStream of full Service snapshots
//!     → resolver (sole consumer, sole writer of resolver state)
//! ```
//!
//! # Design Decisions
//! - Every emission is the complete instance set, never a delta
//! - Snapshot coalescing is allowed: only the latest snapshot matters
//! - Cancellation and deadline errors mean "expected shutdown"

pub mod memory;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use memory::MemoryDiscovery;

/// Service config directive naming the load-balancing policy.
pub const LOAD_BALANCING_CONFIG: &str = "LoadBalancingConfig";
/// Service config directive naming the gray-release policy.
pub const GRAY_RELEASE_CONFIG: &str = "GrayReleaseConfig";

/// One network-addressable instance of a logical service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEntry {
    /// Globally unique instance id.
    pub id: String,
    /// Logical service name.
    pub name: String,
    /// Module alias.
    pub alias: String,
    /// Semantic version, e.g. `1.2.0` or `v1.2.0`.
    pub version: String,
    /// Scheme-prefixed addresses such as `grpc://10.0.0.1:9000`, in order.
    pub endpoints: Vec<String>,
    /// Balancer-visible attributes. Keys and values must not contain `=`.
    pub metadata: BTreeMap<String, String>,
}

impl PartialEq for ServiceEntry {
    /// Alias and version do not take part in equality.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.endpoints == other.endpoints
            && self.metadata == other.metadata
    }
}

impl Eq for ServiceEntry {}

/// A key/value scheduling directive attached to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub key: String,
    pub value: String,
}

impl ConfigItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Full instance set of a named service plus its scheduling directives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub entries: Vec<ServiceEntry>,
    pub configs: Vec<ConfigItem>,
}

/// Errors produced by a directory backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("watch cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("service {name} not found")]
    NotFound { name: String },
    #[error("instance {id} of service {name} not found")]
    InstanceNotFound { name: String, id: String },
    #[error("invalid service entry: {0}")]
    InvalidEntry(String),
    #[error("directory backend failure: {0}")]
    Backend(String),
}

impl DiscoveryError {
    /// True for errors that signal an expected end of a watch.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DiscoveryError::Cancelled | DiscoveryError::DeadlineExceeded)
    }
}

/// Stream of full snapshots for one service name.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<Service, DiscoveryError>> + Send>>;

/// Service registration and discovery.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Publish one instance.
    async fn register(&self, entry: ServiceEntry) -> Result<(), DiscoveryError>;

    /// Find the instance with the given name and id.
    async fn lookup(&self, name: &str, id: &str) -> Result<ServiceEntry, DiscoveryError>;

    /// Current full instance set of a service.
    async fn browse(&self, name: &str) -> Result<Service, DiscoveryError>;

    /// Subscribe to a service. The stream yields the current snapshot first
    /// (when instances exist) and a fresh full snapshot on every change. It
    /// ends once `cancel` fires.
    async fn watch(&self, name: &str, cancel: CancellationToken)
        -> Result<WatchStream, DiscoveryError>;
}

/// Check the `=`-free rule for balancer attributes.
pub fn validate_entry(entry: &ServiceEntry) -> Result<(), DiscoveryError> {
    if entry.name.is_empty() {
        return Err(DiscoveryError::InvalidEntry("empty service name".into()));
    }
    if let Some((k, v)) = entry
        .metadata
        .iter()
        .find(|(k, v)| k.contains('=') || v.contains('='))
    {
        return Err(DiscoveryError::InvalidEntry(format!(
            "metadata {k}={v} of {} contains '='",
            entry.name
        )));
    }
    Ok(())
}
