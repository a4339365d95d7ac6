//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::{ConfigItem, Service, ServiceEntry};
use crate::load_balancer::pool::PoolSettings;
use crate::routing::MetadataKeys;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Name resolution settings.
    pub resolver: ResolverConfig,

    /// Load balancing settings.
    pub balancer: BalancerConfig,

    /// Metadata keys and optional pinned upstream.
    pub routing: RoutingConfig,

    /// Passive health thresholds.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Static instances published into the in-process directory.
    pub services: Vec<ServiceEntry>,

    /// Scheduling directives attached to static services.
    pub service_configs: Vec<ServiceConfigEntry>,

    /// Instances that bypass discovery entirely.
    pub local_services: Vec<ServiceEntry>,
}

impl RelayConfig {
    /// Group `services` and `service_configs` into directory snapshots.
    pub fn static_services(&self) -> HashMap<String, Service> {
        let mut table: HashMap<String, Service> = HashMap::new();
        for entry in &self.services {
            table
                .entry(entry.name.clone())
                .or_default()
                .entries
                .push(entry.clone());
        }
        for directive in &self.service_configs {
            table
                .entry(directive.name.clone())
                .or_default()
                .configs
                .push(ConfigItem::new(&directive.key, &directive.value));
        }
        table
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            endpoint_schema: self.resolver.endpoint_schema.clone(),
            default_policy: self.balancer.default_policy.clone(),
            max_concurrent_calls: self.balancer.max_concurrent_calls,
            dial_timeout: Duration::from_secs(self.resolver.dial_timeout_secs),
            disable_service_config: self.resolver.disable_service_config,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Target scheme handled by the resolver registry.
    pub scheme: String,

    /// Preferred endpoint prefix, e.g. `grpc://`.
    pub endpoint_schema: String,

    /// Seconds an empty snapshot must persist before it is applied.
    pub empty_grace_secs: u64,

    /// Ignore `LoadBalancingConfig` directives from the directory.
    pub disable_service_config: bool,

    /// Bound on waiting for a service's first snapshot.
    pub dial_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scheme: crate::resolver::DEFAULT_SCHEME.to_string(),
            endpoint_schema: crate::resolver::DEFAULT_ENDPOINT_SCHEMA.to_string(),
            empty_grace_secs: crate::resolver::DEFAULT_EMPTY_GRACE.as_secs(),
            disable_service_config: false,
            dial_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Policy used when neither the call nor the directory names one.
    pub default_policy: String,

    /// Ring points per unit of weight.
    pub ring_hash_virtual_nodes: usize,

    /// Maximum concurrent calls relayed to one backend.
    pub max_concurrent_calls: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            default_policy: crate::load_balancer::ROUND_ROBIN.to_string(),
            ring_hash_virtual_nodes: crate::load_balancer::ring_hash::DEFAULT_VIRTUAL_NODES,
            max_concurrent_calls: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    #[serde(flatten)]
    pub keys: MetadataKeys,

    /// Forward a single service to a fixed address instead of using discovery.
    pub upstream: Option<UpstreamConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub service: String,
    /// `host:port`.
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token). Empty disables auth.
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// One `[[service_configs]]` directive.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfigEntry {
    pub name: String,
    pub key: String,
    pub value: String,
}
