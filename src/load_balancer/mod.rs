//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! ResolverState (addresses + advertised policy)
//!     → pool.rs (BackendPool: reuse backend handles, pick policy)
//!     → registry.rs (policy name → PickerBuilder)
//!     → build an immutable Picker snapshot, swap it in
//!
//! Per call:
//!     PickInfo (method, ring-hash key, specify policy)
//!     → current Picker (lock-free load)
//!         - round_robin.rs
//!         - weighted_round_robin.rs
//!         - ring_hash.rs
//!         - specify.rs
//!     → backend.rs (reserve a call slot)
//! ```
//!
//! # Design Decisions
//! - Pickers are rebuilt on every address-set change, never mutated
//! - Unhealthy backends are skipped while any healthy one remains
//! - `specify` never falls back to another backend

pub mod backend;
pub mod pool;
pub mod registry;
pub mod ring_hash;
pub mod round_robin;
pub mod specify;
pub mod weighted_round_robin;

use std::fmt;
use std::sync::Arc;

use tonic::Status;

use crate::load_balancer::backend::Backend;

pub use pool::{BackendManager, BackendPool, PoolPolicy};
pub use registry::BalancerRegistry;

pub const ROUND_ROBIN: &str = "round_robin";
pub const WEIGHTED_ROUND_ROBIN: &str = "weighted_round_robin";
pub const RING_HASH: &str = "ring_hash";
pub const SPECIFY: &str = "specify";

/// Per-call inputs a picker may use.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickInfo<'a> {
    /// Full method name, e.g. `/pkg.Service/Method`.
    pub method: &'a str,
    /// Ring-hash key; `None` hashes the empty string.
    pub hash_key: Option<&'a str>,
    /// `attr=value` pin for the specify policy.
    pub specify_policy: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PickError {
    #[error("no addresses resolved for {service}")]
    NoAddresses { service: String },
    #[error("specify policy is missing")]
    MissingPolicy,
    #[error("specify policy {0:?} is malformed, expected attr=value")]
    MalformedPolicy(String),
    #[error("no backend matches specify policy {0}")]
    NoMatch(String),
    #[error("backend {0} is at its concurrent call limit")]
    Overloaded(String),
}

impl From<PickError> for Status {
    fn from(err: PickError) -> Self {
        match err {
            PickError::MissingPolicy | PickError::MalformedPolicy(_) => {
                Status::invalid_argument(format!("balancer specify: {err}"))
            }
            PickError::Overloaded(_) => Status::resource_exhausted(err.to_string()),
            PickError::NoAddresses { .. } | PickError::NoMatch(_) => {
                Status::unavailable(err.to_string())
            }
        }
    }
}

/// Chooses one backend per call from an immutable snapshot.
pub trait Picker: Send + Sync + fmt::Debug {
    fn pick(&self, info: &PickInfo<'_>) -> Result<Arc<Backend>, PickError>;
}

/// Builds a picker for one address-set snapshot. One builder per policy name.
pub trait PickerBuilder: Send + Sync {
    fn name(&self) -> &str;
    /// `backends` is non-empty and ordered as the resolver advertised them.
    fn build(&self, backends: Vec<Arc<Backend>>) -> Arc<dyn Picker>;
}

/// Picker installed while a pool has no addresses.
#[derive(Debug)]
pub struct EmptyPicker {
    pub service: String,
}

impl Picker for EmptyPicker {
    fn pick(&self, _info: &PickInfo<'_>) -> Result<Arc<Backend>, PickError> {
        Err(PickError::NoAddresses {
            service: self.service.clone(),
        })
    }
}

/// Indices of healthy backends, or of all backends when none is healthy.
pub(crate) fn ready_indices(backends: &[Arc<Backend>]) -> Vec<usize> {
    let healthy: Vec<usize> = (0..backends.len())
        .filter(|&i| backends[i].is_healthy())
        .collect();
    if healthy.is_empty() {
        (0..backends.len()).collect()
    } else {
        healthy
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::load_balancer::backend::Backend;
    use crate::resolver::Address;

    pub fn backends(addrs: &[&str]) -> Vec<Arc<Backend>> {
        addrs
            .iter()
            .map(|a| Arc::new(Backend::new(Address::new(*a), 1000)))
            .collect()
    }

    pub fn tagged(addr: &str, key: &str, value: &str) -> Arc<Backend> {
        Arc::new(Backend::new(Address::new(addr).with_attribute(key, value), 1000))
    }
}
