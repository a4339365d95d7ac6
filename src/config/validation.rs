//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (grace > 0, thresholds > 0)
//! - Check static instances against directory rules
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::RelayConfig;
use crate::discovery::{validate_entry, ServiceEntry};
use crate::load_balancer::{RING_HASH, ROUND_ROBIN, SPECIFY, WEIGHTED_ROUND_ROBIN};

const KNOWN_POLICIES: [&str; 4] = [ROUND_ROBIN, WEIGHTED_ROUND_ROBIN, RING_HASH, SPECIFY];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("listener.bind_address", "must not be empty"));
    }
    if config.admin.enabled && config.admin.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("admin.bind_address", "must not be empty"));
    }
    if config.observability.metrics_enabled && config.observability.metrics_address.trim().is_empty() {
        errors.push(ValidationError::new("observability.metrics_address", "must not be empty"));
    }

    if config.resolver.scheme.trim().is_empty() {
        errors.push(ValidationError::new("resolver.scheme", "must not be empty"));
    }
    if config.resolver.empty_grace_secs == 0 {
        errors.push(ValidationError::new("resolver.empty_grace_secs", "must be greater than 0"));
    }
    if config.resolver.dial_timeout_secs == 0 {
        errors.push(ValidationError::new("resolver.dial_timeout_secs", "must be greater than 0"));
    }

    if !KNOWN_POLICIES.contains(&config.balancer.default_policy.as_str()) {
        errors.push(ValidationError::new(
            "balancer.default_policy",
            format!("unknown policy {:?}", config.balancer.default_policy),
        ));
    }
    if config.balancer.ring_hash_virtual_nodes == 0 {
        errors.push(ValidationError::new("balancer.ring_hash_virtual_nodes", "must be greater than 0"));
    }
    if config.balancer.max_concurrent_calls == 0 {
        errors.push(ValidationError::new("balancer.max_concurrent_calls", "must be greater than 0"));
    }

    if config.health.unhealthy_threshold == 0 || config.health.healthy_threshold == 0 {
        errors.push(ValidationError::new("health", "thresholds must be greater than 0"));
    }

    for key in config.routing.keys.all() {
        if key.trim().is_empty() || key.parse::<axum::http::HeaderName>().is_err() {
            errors.push(ValidationError::new("routing", format!("invalid metadata key {key:?}")));
        }
    }
    if let Some(upstream) = &config.routing.upstream {
        if upstream.service.is_empty() || upstream.address.is_empty() {
            errors.push(ValidationError::new("routing.upstream", "service and address are required"));
        }
    }

    check_entries("services", &config.services, &mut errors);
    check_entries("local_services", &config.local_services, &mut errors);
    for (i, directive) in config.service_configs.iter().enumerate() {
        if directive.name.is_empty() || directive.key.is_empty() {
            errors.push(ValidationError::new(
                format!("service_configs[{i}]"),
                "name and key are required",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_entries(section: &str, entries: &[ServiceEntry], errors: &mut Vec<ValidationError>) {
    for (i, entry) in entries.iter().enumerate() {
        let field = format!("{section}[{i}]");
        if let Err(e) = validate_entry(entry) {
            errors.push(ValidationError::new(&field, e.to_string()));
        }
        if entry.endpoints.is_empty() {
            errors.push(ValidationError::new(&field, "at least one endpoint is required"));
        }
    }
}
