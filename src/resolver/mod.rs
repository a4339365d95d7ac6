//! Name resolution subsystem.
//!
//! # Data Flow
//! ```text
//! dial target "relay://<service>/?schema=grpc://"
//!     → target.rs (parse service name + endpoint schema)
//!     → local table hit? seed state, no watch
//!     → otherwise Discovery::watch(service)
//!         → first snapshot (blocking) → push
//!         → watcher.rs background task: every snapshot replaces state
//!             → service_config.rs (LoadBalancingConfig, GrayReleaseConfig)
//!             → gray_release.rs (single version cohort)
//!             → ResolverState pushed to the owning ClientConn
//! ```
//!
//! # Design Decisions
//! - The watch task is the only writer of resolver state
//! - Snapshots replace, never merge
//! - Empty snapshots are debounced by a grace timer
//! - Watch errors stop the resolver; the owner re-dials to recover

pub mod gray_release;
pub mod service_config;
pub mod target;
pub mod watcher;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::{Discovery, DiscoveryError, ServiceEntry};

pub use gray_release::GrayRelease;
pub use service_config::ServiceConfig;
pub use target::{Target, TargetError, DEFAULT_ENDPOINT_SCHEMA};
pub use watcher::{Resolver, ResolverPhase};

/// Default resolver scheme.
pub const DEFAULT_SCHEME: &str = "relay";

/// Grace period before an empty snapshot is applied.
pub const DEFAULT_EMPTY_GRACE: Duration = Duration::from_secs(5 * 60);

/// One dialable address with its picker-visible attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// `host:port`.
    pub addr: String,
    /// Logical service the address belongs to.
    pub server_name: String,
    /// Instance metadata plus `id` and `name`.
    pub attributes: BTreeMap<String, String>,
}

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            server_name: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// What a resolver advertises to its connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverState {
    pub addresses: Vec<Address>,
    /// Load-balancing policy named by the service config, if honored.
    pub load_balancing_policy: Option<String>,
}

/// Receiver of resolver state; implemented by the backend pool.
pub trait ClientConn: Send + Sync {
    fn update_state(&self, state: ResolverState) -> Result<(), ResolverError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Ignore `LoadBalancingConfig` directives from the directory.
    pub disable_service_config: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("discovery watch failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("discovery stream for {0} ended before the first snapshot")]
    StreamEnded(String),
    #[error("state rejected: {0}")]
    StateRejected(String),
}

/// Builds resolvers for one scheme.
///
/// Owns the directory handle and the table of locally pinned services that
/// bypass discovery entirely.
pub struct ResolverRegistry {
    scheme: String,
    discovery: Arc<dyn Discovery>,
    local: HashMap<String, Vec<ServiceEntry>>,
    empty_grace: Duration,
}

impl ResolverRegistry {
    pub fn new(scheme: impl Into<String>, discovery: Arc<dyn Discovery>) -> Self {
        Self {
            scheme: scheme.into(),
            discovery,
            local: HashMap::new(),
            empty_grace: DEFAULT_EMPTY_GRACE,
        }
    }

    /// Pin entries to their service names; resolvers for those names never watch.
    pub fn with_local_services(mut self, entries: impl IntoIterator<Item = ServiceEntry>) -> Self {
        for entry in entries {
            self.local.entry(entry.name.clone()).or_default().push(entry);
        }
        self
    }

    pub fn with_empty_grace(mut self, grace: Duration) -> Self {
        self.empty_grace = grace;
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn discovery(&self) -> &Arc<dyn Discovery> {
        &self.discovery
    }

    /// Build a resolver for `target` and push its first state to `conn`.
    ///
    /// Blocks until the first snapshot arrives; callers bound it with their
    /// own dial timeout.
    pub async fn build(
        &self,
        target: &str,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
    ) -> Result<Resolver, ResolverError> {
        let target = Target::parse(target)?;
        if target.scheme != self.scheme {
            return Err(TargetError::SchemeMismatch {
                expected: self.scheme.clone(),
                found: target.scheme,
            }
            .into());
        }

        if let Some(entries) = self.local.get(&target.service_name) {
            return Ok(Resolver::local(target, conn, opts, entries.clone()));
        }

        Resolver::watch(
            target,
            conn,
            opts,
            Arc::clone(&self.discovery),
            self.empty_grace,
        )
        .await
    }
}
