//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::{PickError, PickInfo, Picker, PickerBuilder, ROUND_ROBIN};

#[derive(Debug, Default)]
pub struct RoundRobinBuilder;

impl PickerBuilder for RoundRobinBuilder {
    fn name(&self) -> &str {
        ROUND_ROBIN
    }

    fn build(&self, backends: Vec<Arc<Backend>>) -> Arc<dyn Picker> {
        // random start so fresh pickers do not all hit the first backend
        let start = fastrand::usize(..backends.len().max(1));
        Arc::new(RoundRobin {
            backends,
            counter: AtomicUsize::new(start),
        })
    }
}

/// Rotates through the snapshot, skipping unhealthy backends.
#[derive(Debug)]
pub struct RoundRobin {
    backends: Vec<Arc<Backend>>,
    counter: AtomicUsize,
}

impl Picker for RoundRobin {
    fn pick(&self, _info: &PickInfo<'_>) -> Result<Arc<Backend>, PickError> {
        let len = self.backends.len();
        let start = self.counter.fetch_add(1, Ordering::Relaxed);

        for i in 0..len {
            let backend = &self.backends[(start + i) % len];
            if backend.is_healthy() {
                return Ok(Arc::clone(backend));
            }
        }
        // nothing healthy: keep rotating over everything
        self.backends
            .get(start % len.max(1))
            .cloned()
            .ok_or_else(|| PickError::NoAddresses {
                service: String::new(),
            })
    }
}
