//! Call metadata keys consumed by routing.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Metadata keys the router reads from inbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataKeys {
    /// Explicit target service name.
    pub app_name_key: String,
    /// Instance id; pins the call with the specify policy.
    pub app_id_key: String,
    /// Balancing policy name.
    pub balancer_key: String,
    /// `attr=value` pin for the specify policy.
    pub specify_policy_key: String,
    /// Per-call ring-hash key.
    pub ring_hash_key: String,
    /// Backend attribute matched against the app id.
    pub app_id_attribute: String,
}

impl Default for MetadataKeys {
    fn default() -> Self {
        Self {
            app_name_key: "sgr-app-name".to_string(),
            app_id_key: "sgr-app-id".to_string(),
            balancer_key: "sgr-balancer".to_string(),
            specify_policy_key: "specify-policy".to_string(),
            ring_hash_key: "ringhash-key".to_string(),
            app_id_attribute: "app-id".to_string(),
        }
    }
}

impl MetadataKeys {
    pub fn all(&self) -> [&str; 5] {
        [
            &self.app_name_key,
            &self.app_id_key,
            &self.balancer_key,
            &self.specify_policy_key,
            &self.ring_hash_key,
        ]
    }
}

/// First non-empty value of `key`, matched case-insensitively.
pub fn first_value<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    let value = if key.bytes().any(|b| b.is_ascii_uppercase()) {
        headers.get(key.to_ascii_lowercase().as_str())
    } else {
        headers.get(key)
    }?;
    value.to_str().ok().map(str::trim).filter(|v| !v.is_empty())
}
