//! Consistent-hash ring.
//!
//! # Responsibilities
//! - Place `virtual_nodes × weight` points per backend on a 64-bit ring,
//!   scaled down proportionally when the total would exceed `MAX_RING_POINTS`
//! - Map a per-call key to the first point at or after its hash
//! - Skip unhealthy owners by walking clockwise
//!
//! xxh64 with seed 0 is used for both points and keys, so every process
//! builds the same ring for the same address set.

use std::sync::Arc;

use xxhash_rust::xxh64::xxh64;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::{PickError, PickInfo, Picker, PickerBuilder, RING_HASH};

pub const DEFAULT_VIRTUAL_NODES: usize = 100;

/// Upper bound on points in one ring.
pub const MAX_RING_POINTS: usize = 100_000;

/// Hash of a ring-hash key. Missing keys hash the empty string.
pub fn hash_key(key: Option<&str>) -> u64 {
    xxh64(key.unwrap_or_default().as_bytes(), 0)
}

#[derive(Debug)]
pub struct RingHashBuilder {
    virtual_nodes: usize,
}

impl RingHashBuilder {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
        }
    }
}

impl Default for RingHashBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl PickerBuilder for RingHashBuilder {
    fn name(&self) -> &str {
        RING_HASH
    }

    fn build(&self, backends: Vec<Arc<Backend>>) -> Arc<dyn Picker> {
        Arc::new(RingHash::new(backends, self.virtual_nodes))
    }
}

#[derive(Debug)]
pub struct RingHash {
    backends: Vec<Arc<Backend>>,
    /// (point hash, backend index), sorted by hash.
    ring: Vec<(u64, usize)>,
}

impl RingHash {
    pub fn new(backends: Vec<Arc<Backend>>, virtual_nodes: usize) -> Self {
        let wanted: Vec<usize> = backends
            .iter()
            .map(|b| virtual_nodes.saturating_mul(b.weight.max(1) as usize))
            .collect();
        let total = wanted.iter().fold(0usize, |acc, &n| acc.saturating_add(n));
        let scale = if total > MAX_RING_POINTS {
            MAX_RING_POINTS as f64 / total as f64
        } else {
            1.0
        };

        let mut ring = Vec::with_capacity(total.min(MAX_RING_POINTS));
        for (index, backend) in backends.iter().enumerate() {
            let points = ((wanted[index] as f64 * scale) as usize).max(1);
            for i in 0..points {
                let point = format!("{}_{}", backend.addr(), i);
                ring.push((xxh64(point.as_bytes(), 0), index));
            }
        }
        ring.sort_unstable();

        tracing::debug!(
            backends = backends.len(),
            points = ring.len(),
            "Ring hash rebuilt"
        );
        Self { backends, ring }
    }

    fn owner(&self, hash: u64) -> Option<&Arc<Backend>> {
        if self.ring.is_empty() {
            return None;
        }
        let start = self.ring.partition_point(|&(point, _)| point < hash);

        for step in 0..self.ring.len() {
            let (_, index) = self.ring[(start + step) % self.ring.len()];
            let backend = &self.backends[index];
            if backend.is_healthy() {
                return Some(backend);
            }
        }
        // nothing healthy
        let (_, index) = self.ring[start % self.ring.len()];
        self.backends.get(index)
    }
}

impl Picker for RingHash {
    fn pick(&self, info: &PickInfo<'_>) -> Result<Arc<Backend>, PickError> {
        self.owner(hash_key(info.hash_key))
            .cloned()
            .ok_or_else(|| PickError::NoAddresses {
                service: String::new(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::backends;

    fn ring(addrs: &[&str]) -> RingHash {
        RingHash::new(backends(addrs), DEFAULT_VIRTUAL_NODES)
    }

    fn pick(ring: &RingHash, key: &str) -> String {
        let info = PickInfo {
            hash_key: Some(key),
            ..Default::default()
        };
        ring.pick(&info).unwrap().addr().to_string()
    }

    #[test]
    fn test_same_key_same_backend() {
        let r = ring(&["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);
        for key in ["user=1", "user=2", "order=77"] {
            let first = pick(&r, key);
            for _ in 0..20 {
                assert_eq!(pick(&r, key), first);
            }
        }
    }

    #[test]
    fn test_rebuilt_ring_is_identical() {
        let addrs = ["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"];
        let a = ring(&addrs);
        let b = ring(&addrs);
        for i in 0..200 {
            let key = format!("k{i}");
            assert_eq!(pick(&a, &key), pick(&b, &key));
        }
    }

    #[test]
    fn test_missing_key_is_stable() {
        let r = ring(&["a:1", "b:1", "c:1"]);
        let info = PickInfo::default();
        let first = r.pick(&info).unwrap().addr().to_string();
        assert_eq!(first, pick(&r, ""));
        assert_eq!(r.pick(&info).unwrap().addr(), first);
    }

    #[test]
    fn test_removal_only_moves_removed_keys() {
        let before = ring(&["a:1", "b:1", "c:1", "d:1", "e:1"]);
        let after = ring(&["a:1", "b:1", "c:1", "d:1"]);
        for i in 0..1000 {
            let key = format!("key-{i}");
            let old = pick(&before, &key);
            if old != "e:1" {
                assert_eq!(pick(&after, &key), old, "key {key} moved");
            }
        }
    }

    #[test]
    fn test_replacement_remaps_bounded_fraction() {
        let before = ring(&["a:1", "b:1", "c:1", "d:1", "e:1"]);
        let after = ring(&["a:1", "b:1", "c:1", "d:1", "f:1"]);
        let moved = (0..1000)
            .map(|i| format!("key-{i}"))
            .filter(|key| pick(&before, key) != pick(&after, key))
            .count();
        assert!(moved < 500, "{moved} of 1000 keys remapped");
    }

    #[test]
    fn test_skips_unhealthy_owner() {
        let r = ring(&["a:1", "b:1", "c:1"]);
        let owner = pick(&r, "sticky");
        let index = r.backends.iter().position(|b| b.addr() == owner).unwrap();
        r.backends[index].mark_failure(1);

        let next = pick(&r, "sticky");
        assert_ne!(next, owner);
        assert_eq!(pick(&r, "sticky"), next);
    }

    #[test]
    fn test_heavy_weights_stay_within_ring_bound() {
        use crate::resolver::Address;

        let mut heavy: Vec<Arc<Backend>> = (0..3)
            .map(|i| {
                let address = Address::new(format!("10.0.1.{i}:80")).with_attribute("weight", "4000000000");
                Arc::new(Backend::new(address, 10))
            })
            .collect();
        heavy.push(Arc::new(Backend::new(Address::new("10.0.2.1:80"), 10)));

        let r = RingHash::new(heavy, DEFAULT_VIRTUAL_NODES);
        assert!(r.ring.len() <= MAX_RING_POINTS, "{} points", r.ring.len());
        // the light backend keeps at least one point
        assert!(r.ring.iter().any(|&(_, index)| index == 3));
    }
}
