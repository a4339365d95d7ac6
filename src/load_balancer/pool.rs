//! Backend pool management.
//!
//! # Responsibilities
//! - Receive resolver state for one service and rebuild its picker
//! - Keep backend handles (call counts, health) alive across rebuilds
//! - Cache one pool per (service, policy) and dial new ones on demand
//! - Provide call guards for tracking

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tonic::Status;

use crate::load_balancer::backend::{Backend, BackendCallGuard};
use crate::load_balancer::{
    BalancerRegistry, EmptyPicker, PickError, PickInfo, Picker, ROUND_ROBIN,
};
use crate::resolver::{
    BuildOptions, ClientConn, Resolver, ResolverError, ResolverPhase, ResolverRegistry,
    ResolverState, Target,
};

/// How a pool chooses its balancing policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolPolicy {
    /// Configured default, overridable by the service's `LoadBalancingConfig`.
    Default,
    /// Named default, overridable by the service's `LoadBalancingConfig`.
    Preferred(String),
    /// Always this policy, whatever the directory advertises.
    Forced(String),
}

impl PoolPolicy {
    fn resolve<'a>(&'a self, advertised: Option<&'a str>, fallback: &'a str) -> &'a str {
        match self {
            PoolPolicy::Forced(name) => name.as_str(),
            PoolPolicy::Preferred(name) => advertised.unwrap_or(name.as_str()),
            PoolPolicy::Default => advertised.unwrap_or(fallback),
        }
    }
}

/// Pool tuning shared by every pool of a manager.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub endpoint_schema: String,
    pub default_policy: String,
    pub max_concurrent_calls: usize,
    pub dial_timeout: Duration,
    pub disable_service_config: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            endpoint_schema: crate::resolver::DEFAULT_ENDPOINT_SCHEMA.to_string(),
            default_policy: ROUND_ROBIN.to_string(),
            max_concurrent_calls: 10_000,
            dial_timeout: Duration::from_secs(5),
            disable_service_config: false,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    policy: String,
    backends: Vec<Arc<Backend>>,
    picker: Arc<dyn Picker>,
}

/// Receiving half of a pool: the resolver pushes into it.
pub struct PoolCore {
    service: String,
    policy: PoolPolicy,
    settings: PoolSettings,
    balancers: Arc<BalancerRegistry>,
    state: ArcSwap<PoolState>,
}

impl PoolCore {
    pub fn new(
        service: impl Into<String>,
        policy: PoolPolicy,
        settings: PoolSettings,
        balancers: Arc<BalancerRegistry>,
    ) -> Self {
        let service = service.into();
        let initial = PoolState {
            policy: policy
                .resolve(None, &settings.default_policy)
                .to_string(),
            backends: Vec::new(),
            picker: Arc::new(EmptyPicker {
                service: service.clone(),
            }),
        };
        Self {
            service,
            policy,
            settings,
            balancers,
            state: ArcSwap::from_pointee(initial),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Policy of the current picker.
    pub fn policy(&self) -> String {
        self.state.load().policy.clone()
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.state.load().backends.clone()
    }

    pub fn pick(&self, info: &PickInfo<'_>) -> Result<Arc<Backend>, PickError> {
        let state = self.state.load();
        state.picker.pick(info).map_err(|e| match e {
            PickError::NoAddresses { .. } => PickError::NoAddresses {
                service: self.service.clone(),
            },
            other => other,
        })
    }

    fn choose_policy(&self, advertised: Option<&str>) -> String {
        let wanted = self.policy.resolve(advertised, &self.settings.default_policy);
        if self.balancers.contains(wanted) {
            return wanted.to_string();
        }
        tracing::warn!(
            service = %self.service,
            policy = %wanted,
            fallback = %self.settings.default_policy,
            "Unknown balancing policy, using default"
        );
        self.settings.default_policy.clone()
    }
}

impl ClientConn for PoolCore {
    fn update_state(&self, state: ResolverState) -> Result<(), ResolverError> {
        let policy = self.choose_policy(state.load_balancing_policy.as_deref());
        let current = self.state.load();

        // reuse handles for unchanged addresses so call counts and health survive
        let backends: Vec<Arc<Backend>> = state
            .addresses
            .into_iter()
            .map(|address| {
                current
                    .backends
                    .iter()
                    .find(|b| b.address == address)
                    .cloned()
                    .unwrap_or_else(|| {
                        Arc::new(Backend::new(address, self.settings.max_concurrent_calls))
                    })
            })
            .collect();

        if backends.is_empty() {
            self.state.store(Arc::new(PoolState {
                policy,
                backends,
                picker: Arc::new(EmptyPicker {
                    service: self.service.clone(),
                }),
            }));
            return Err(ResolverError::StateRejected(format!(
                "no addresses for {}",
                self.service
            )));
        }

        let builder = self
            .balancers
            .get(&policy)
            .ok_or_else(|| ResolverError::StateRejected(format!("policy {policy} is not registered")))?;
        let picker = builder.build(backends.clone());

        tracing::debug!(
            service = %self.service,
            policy = %policy,
            backends = backends.len(),
            "Picker rebuilt"
        );
        self.state.store(Arc::new(PoolState {
            policy,
            backends,
            picker,
        }));
        Ok(())
    }
}

/// One resolved service: a resolver feeding a picker.
pub struct BackendPool {
    core: Arc<PoolCore>,
    resolver: Resolver,
}

impl BackendPool {
    pub fn core(&self) -> &Arc<PoolCore> {
        &self.core
    }

    /// Pick a backend and reserve a call slot on it.
    pub fn pick(&self, info: &PickInfo<'_>) -> Result<BackendCallGuard, PickError> {
        let backend = self.core.pick(info)?;
        backend
            .try_create_guard()
            .ok_or_else(|| PickError::Overloaded(backend.addr().to_string()))
    }

    /// True once the resolver has stopped; the pool no longer receives updates.
    pub fn is_closed(&self) -> bool {
        self.resolver.phase() == ResolverPhase::Closed
    }

    pub fn close(&self) {
        self.resolver.close();
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            service: self.core.service.clone(),
            policy: self.core.policy(),
            phase: format!("{:?}", self.resolver.phase()),
            backends: self
                .core
                .backends()
                .iter()
                .map(|b| BackendSnapshot {
                    addr: b.addr().to_string(),
                    health: format!("{:?}", b.health()),
                    active_calls: b.active_calls(),
                    attributes: b.address.attributes.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub service: String,
    pub policy: String,
    pub phase: String,
    pub backends: Vec<BackendSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub addr: String,
    pub health: String,
    pub active_calls: usize,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("resolving {service} timed out after {after:?}")]
    Timeout { service: String, after: Duration },
    #[error("resolving {service} failed: {source}")]
    Resolver {
        service: String,
        #[source]
        source: ResolverError,
    },
}

impl From<DialError> for Status {
    fn from(err: DialError) -> Self {
        Status::unavailable(err.to_string())
    }
}

/// Manages backend pools and load balancing.
pub struct BackendManager {
    resolvers: Arc<ResolverRegistry>,
    balancers: Arc<BalancerRegistry>,
    settings: PoolSettings,
    pools: DashMap<(String, PoolPolicy), Arc<BackendPool>>,
}

impl BackendManager {
    pub fn new(
        resolvers: Arc<ResolverRegistry>,
        balancers: Arc<BalancerRegistry>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            resolvers,
            balancers,
            settings,
            pools: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn has_policy(&self, name: &str) -> bool {
        self.balancers.contains(name)
    }

    /// Cached pool for `service`, dialing a new one when absent or closed.
    pub async fn pool(
        &self,
        service: &str,
        policy: PoolPolicy,
    ) -> Result<Arc<BackendPool>, DialError> {
        let key = (service.to_string(), policy);
        if let Some(pool) = self.pools.get(&key) {
            if !pool.is_closed() {
                return Ok(Arc::clone(pool.value()));
            }
        }

        let pool = Arc::new(self.dial(service, key.1.clone()).await?);

        // another call may have dialed the same pool concurrently
        let mut slot = self.pools.entry(key).or_insert_with(|| Arc::clone(&pool));
        if slot.is_closed() {
            *slot = Arc::clone(&pool);
        }
        Ok(Arc::clone(slot.value()))
    }

    async fn dial(&self, service: &str, policy: PoolPolicy) -> Result<BackendPool, DialError> {
        let target = Target::format(self.resolvers.scheme(), service, &self.settings.endpoint_schema);
        let core = Arc::new(PoolCore::new(
            service,
            policy,
            self.settings.clone(),
            Arc::clone(&self.balancers),
        ));
        let opts = BuildOptions {
            disable_service_config: self.settings.disable_service_config,
        };

        tracing::info!(service = %service, target = %target, "Dialing service");
        let conn: Arc<dyn ClientConn> = core.clone();
        let build = self.resolvers.build(&target, conn, opts);
        let resolver = match tokio::time::timeout(self.settings.dial_timeout, build).await {
            Ok(Ok(resolver)) => resolver,
            Ok(Err(source)) => {
                return Err(DialError::Resolver {
                    service: service.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(DialError::Timeout {
                    service: service.to_string(),
                    after: self.settings.dial_timeout,
                })
            }
        };

        Ok(BackendPool { core, resolver })
    }

    pub fn snapshot(&self) -> Vec<PoolSnapshot> {
        let mut pools: Vec<PoolSnapshot> = self.pools.iter().map(|p| p.snapshot()).collect();
        pools.sort_by(|a, b| a.service.cmp(&b.service).then(a.policy.cmp(&b.policy)));
        pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Stop every resolver and drop the cache.
    pub fn close_all(&self) {
        for pool in self.pools.iter() {
            pool.close();
        }
        self.pools.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Address;

    fn core(policy: PoolPolicy) -> PoolCore {
        PoolCore::new(
            "echo",
            policy,
            PoolSettings::default(),
            Arc::new(BalancerRegistry::with_defaults(10)),
        )
    }

    fn state(addrs: &[&str], policy: Option<&str>) -> ResolverState {
        ResolverState {
            addresses: addrs.iter().map(|a| Address::new(*a)).collect(),
            load_balancing_policy: policy.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_pool_reports_service() {
        let c = core(PoolPolicy::Default);
        assert_eq!(
            c.pick(&PickInfo::default()).unwrap_err(),
            PickError::NoAddresses {
                service: "echo".into()
            }
        );
    }

    #[test]
    fn test_advertised_policy_overrides_default() {
        let c = core(PoolPolicy::Default);
        c.update_state(state(&["a:1"], Some("ring_hash"))).unwrap();
        assert_eq!(c.policy(), "ring_hash");

        let c = core(PoolPolicy::Preferred("weighted_round_robin".into()));
        c.update_state(state(&["a:1"], None)).unwrap();
        assert_eq!(c.policy(), "weighted_round_robin");
        c.update_state(state(&["a:1"], Some("ring_hash"))).unwrap();
        assert_eq!(c.policy(), "ring_hash");
    }

    #[test]
    fn test_forced_policy_ignores_advertised() {
        let c = core(PoolPolicy::Forced("specify".into()));
        c.update_state(state(&["a:1"], Some("ring_hash"))).unwrap();
        assert_eq!(c.policy(), "specify");
    }

    #[test]
    fn test_unknown_policy_falls_back() {
        let c = core(PoolPolicy::Default);
        c.update_state(state(&["a:1"], Some("p2c"))).unwrap();
        assert_eq!(c.policy(), "round_robin");
    }

    #[test]
    fn test_backend_handles_survive_updates() {
        let c = core(PoolPolicy::Default);
        c.update_state(state(&["a:1", "b:1"], None)).unwrap();
        let a = Arc::clone(&c.backends()[0]);
        a.mark_failure(1);

        c.update_state(state(&["c:1", "a:1"], None)).unwrap();
        let backends = c.backends();
        assert_eq!(backends.len(), 2);
        assert!(Arc::ptr_eq(&backends[1], &a));
        assert!(!backends[1].is_healthy());
    }

    #[test]
    fn test_empty_update_is_rejected_and_clears() {
        let c = core(PoolPolicy::Default);
        c.update_state(state(&["a:1"], None)).unwrap();
        assert!(c.update_state(state(&[], None)).is_err());
        assert!(c.backends().is_empty());
        assert!(c.pick(&PickInfo::default()).is_err());
    }
}
