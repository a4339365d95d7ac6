//! Weighted random selection.
//!
//! Each ready backend is chosen with probability proportional to its `weight`
//! attribute. Zero-weight backends are only used when nothing else is ready.

use std::sync::Arc;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::{
    ready_indices, PickError, PickInfo, Picker, PickerBuilder, WEIGHTED_ROUND_ROBIN,
};

#[derive(Debug, Default)]
pub struct WeightedRoundRobinBuilder;

impl PickerBuilder for WeightedRoundRobinBuilder {
    fn name(&self) -> &str {
        WEIGHTED_ROUND_ROBIN
    }

    fn build(&self, backends: Vec<Arc<Backend>>) -> Arc<dyn Picker> {
        Arc::new(WeightedRoundRobin { backends })
    }
}

#[derive(Debug)]
pub struct WeightedRoundRobin {
    backends: Vec<Arc<Backend>>,
}

impl WeightedRoundRobin {
    fn choose(&self, ready: &[usize], roll: u64) -> Option<usize> {
        let mut remaining = roll;
        for &i in ready {
            let w = u64::from(self.backends[i].weight);
            if remaining < w {
                return Some(i);
            }
            remaining -= w;
        }
        None
    }
}

impl Picker for WeightedRoundRobin {
    fn pick(&self, _info: &PickInfo<'_>) -> Result<Arc<Backend>, PickError> {
        let ready = ready_indices(&self.backends);
        let total: u64 = ready.iter().map(|&i| u64::from(self.backends[i].weight)).sum();

        let index = if total == 0 {
            ready.get(fastrand::usize(..ready.len().max(1))).copied()
        } else {
            self.choose(&ready, fastrand::u64(..total))
        };

        index
            .and_then(|i| self.backends.get(i))
            .cloned()
            .ok_or_else(|| PickError::NoAddresses {
                service: String::new(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Address;

    fn weighted(specs: &[(&str, &str)]) -> WeightedRoundRobin {
        let backends = specs
            .iter()
            .map(|(addr, w)| {
                Arc::new(Backend::new(Address::new(*addr).with_attribute("weight", *w), 100))
            })
            .collect();
        WeightedRoundRobin { backends }
    }

    #[test]
    fn test_choose_respects_weight_bands() {
        let lb = weighted(&[("a:1", "1"), ("b:1", "3")]);
        let ready = vec![0, 1];
        assert_eq!(lb.choose(&ready, 0), Some(0));
        assert_eq!(lb.choose(&ready, 1), Some(1));
        assert_eq!(lb.choose(&ready, 3), Some(1));
        assert_eq!(lb.choose(&ready, 4), None);
    }

    #[test]
    fn test_distribution_follows_weights() {
        let lb = weighted(&[("a:1", "1"), ("b:1", "9")]);
        let info = PickInfo::default();
        let heavy = (0..2000)
            .filter(|_| lb.pick(&info).unwrap().addr() == "b:1")
            .count();
        assert!(heavy > 1500, "heavy backend picked {heavy} times");
    }

    #[test]
    fn test_zero_weight_only_when_alone() {
        let lb = weighted(&[("a:1", "0"), ("b:1", "2")]);
        let info = PickInfo::default();
        for _ in 0..100 {
            assert_eq!(lb.pick(&info).unwrap().addr(), "b:1");
        }

        let lb = weighted(&[("a:1", "0")]);
        assert_eq!(lb.pick(&info).unwrap().addr(), "a:1");
    }
}
