//! Scheduling directives attached to a service snapshot.

use crate::discovery::{ConfigItem, GRAY_RELEASE_CONFIG, LOAD_BALANCING_CONFIG};
use crate::resolver::gray_release::GrayRelease;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Policy name to advertise, empty when the service does not name one.
    pub load_balancing: String,
    pub gray_release: GrayRelease,
}

impl ServiceConfig {
    /// Later directives override earlier ones; unknown keys are ignored.
    pub fn parse(items: &[ConfigItem]) -> Self {
        let mut config = ServiceConfig::default();
        for item in items {
            match item.key.as_str() {
                LOAD_BALANCING_CONFIG => config.load_balancing = item.value.trim().to_string(),
                GRAY_RELEASE_CONFIG => config.gray_release = GrayRelease::parse(item.value.trim()),
                other => tracing::trace!(key = %other, "Ignoring unknown service config directive"),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        let config = ServiceConfig::parse(&[
            ConfigItem::new("LoadBalancingConfig", "ring_hash"),
            ConfigItem::new("GrayReleaseConfig", "latest_version"),
            ConfigItem::new("Unrelated", "x"),
        ]);
        assert_eq!(config.load_balancing, "ring_hash");
        assert_eq!(config.gray_release, GrayRelease::LatestVersion);
    }

    #[test]
    fn test_last_directive_wins() {
        let config = ServiceConfig::parse(&[
            ConfigItem::new("LoadBalancingConfig", "ring_hash"),
            ConfigItem::new("LoadBalancingConfig", "specify"),
        ]);
        assert_eq!(config.load_balancing, "specify");
    }

    #[test]
    fn test_empty() {
        assert_eq!(ServiceConfig::parse(&[]), ServiceConfig::default());
    }
}
