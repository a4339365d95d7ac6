//! Policy name → picker builder.

use std::collections::HashMap;
use std::sync::Arc;

use crate::load_balancer::ring_hash::RingHashBuilder;
use crate::load_balancer::round_robin::RoundRobinBuilder;
use crate::load_balancer::specify::SpecifyBuilder;
use crate::load_balancer::weighted_round_robin::WeightedRoundRobinBuilder;
use crate::load_balancer::PickerBuilder;

/// Explicit registry of balancing policies, populated at construction time.
#[derive(Clone, Default)]
pub struct BalancerRegistry {
    builders: HashMap<String, Arc<dyn PickerBuilder>>,
}

impl BalancerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in policies.
    pub fn with_defaults(ring_hash_virtual_nodes: usize) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RoundRobinBuilder));
        registry.register(Arc::new(WeightedRoundRobinBuilder));
        registry.register(Arc::new(RingHashBuilder::new(ring_hash_virtual_nodes)));
        registry.register(Arc::new(SpecifyBuilder));
        registry
    }

    /// Add or replace the builder for its own name.
    pub fn register(&mut self, builder: Arc<dyn PickerBuilder>) {
        self.builders.insert(builder.name().to_string(), builder);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PickerBuilder>> {
        self.builders.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for BalancerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancerRegistry")
            .field("policies", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = BalancerRegistry::with_defaults(10);
        assert_eq!(
            registry.names(),
            vec!["ring_hash", "round_robin", "specify", "weighted_round_robin"]
        );
        assert!(registry.get("p2c").is_none());
    }
}
