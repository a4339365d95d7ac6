//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Turn a routed call into a reserved backend
//! - Map balancer hints onto pool policies
//! - Return explicit RPC errors instead of silent defaults

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use tonic::Status;

use crate::load_balancer::backend::{Backend, BackendCallGuard};
use crate::load_balancer::{BackendManager, PickError, PickInfo, PoolPolicy, SPECIFY};
use crate::observability::metrics;
use crate::resolver::Address;
use crate::routing::director::{route, BalancerHint};
use crate::routing::metadata::{first_value, MetadataKeys};

/// Backend chosen for one call.
#[derive(Debug)]
pub struct Outbound {
    pub service: String,
    pub backend: BackendCallGuard,
}

/// Resolves an inbound call to an outbound backend.
#[async_trait]
pub trait StreamDirector: Send + Sync {
    async fn connect(&self, headers: &HeaderMap, full_method: &str) -> Result<Outbound, Status>;
}

/// Routes every call through discovery, resolver and picker.
pub struct DiscoveryDirector {
    manager: Arc<BackendManager>,
    keys: MetadataKeys,
}

impl DiscoveryDirector {
    pub fn new(manager: Arc<BackendManager>, keys: MetadataKeys) -> Self {
        Self { manager, keys }
    }

    pub fn manager(&self) -> &Arc<BackendManager> {
        &self.manager
    }

    fn pool_policy(&self, service: &str, hint: &BalancerHint) -> PoolPolicy {
        match hint {
            BalancerHint::None => PoolPolicy::Default,
            BalancerHint::AppId(_) => PoolPolicy::Forced(SPECIFY.to_string()),
            BalancerHint::Named(name) if self.manager.has_policy(name) => {
                PoolPolicy::Preferred(name.clone())
            }
            BalancerHint::Named(name) => {
                tracing::warn!(service = %service, policy = %name, "Unknown balancer hint ignored");
                PoolPolicy::Default
            }
        }
    }
}

#[async_trait]
impl StreamDirector for DiscoveryDirector {
    async fn connect(&self, headers: &HeaderMap, full_method: &str) -> Result<Outbound, Status> {
        let target = route(headers, full_method, &self.keys);
        let policy = self.pool_policy(&target.service, &target.hint);

        let pinned;
        let specify_policy = match (&target.hint, first_value(headers, &self.keys.specify_policy_key)) {
            (_, Some(explicit)) => Some(explicit),
            (BalancerHint::AppId(id), None) => {
                pinned = format!("{}={}", self.keys.app_id_attribute, id);
                Some(pinned.as_str())
            }
            _ => None,
        };
        let info = PickInfo {
            method: full_method,
            hash_key: first_value(headers, &self.keys.ring_hash_key),
            specify_policy,
        };

        let pool = self.manager.pool(&target.service, policy).await.map_err(|e| {
            tracing::warn!(service = %target.service, error = %e, "No connection for service");
            Status::from(e)
        })?;

        match pool.pick(&info) {
            Ok(backend) => {
                tracing::debug!(
                    service = %target.service,
                    method = %full_method,
                    addr = %backend.addr(),
                    hint = %target.hint,
                    "Call routed"
                );
                Ok(Outbound {
                    service: target.service,
                    backend,
                })
            }
            Err(e) => {
                let policy = pool.core().policy();
                tracing::warn!(service = %target.service, policy = %policy, error = %e, "Pick failed");
                metrics::record_pick_failure(&policy);
                Err(e.into())
            }
        }
    }
}

/// Forwards one service to a fixed upstream; every other call is unimplemented.
pub struct UpstreamDirector {
    service: String,
    backend: Arc<Backend>,
    keys: MetadataKeys,
}

impl UpstreamDirector {
    pub fn new(
        service: impl Into<String>,
        address: impl Into<String>,
        max_concurrent_calls: usize,
        keys: MetadataKeys,
    ) -> Self {
        let service = service.into();
        let mut address = Address::new(address);
        address.server_name = service.clone();
        Self {
            service,
            backend: Arc::new(Backend::new(address, max_concurrent_calls)),
            keys,
        }
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

#[async_trait]
impl StreamDirector for UpstreamDirector {
    async fn connect(&self, headers: &HeaderMap, full_method: &str) -> Result<Outbound, Status> {
        let target = route(headers, full_method, &self.keys);
        if target.service != self.service {
            return Err(Status::unimplemented(format!(
                "unknown service {}",
                target.service
            )));
        }

        let backend = self.backend.try_create_guard().ok_or_else(|| {
            Status::from(PickError::Overloaded(self.backend.addr().to_string()))
        })?;
        Ok(Outbound {
            service: target.service,
            backend,
        })
    }
}
