//! Backend handle.
//!
//! # Responsibilities
//! - Represent one resolved address and its picker-visible attributes
//! - Track in-flight calls and enforce the per-backend call limit
//! - Track passive health (Healthy/Unhealthy) from call outcomes

use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::observability::metrics;
use crate::resolver::Address;

/// Attribute carrying the weighted round-robin weight.
pub const WEIGHT_ATTRIBUTE: &str = "weight";

/// Largest accepted weight; bigger values are clamped.
pub const MAX_WEIGHT: u32 = 1000;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single backend instance.
#[derive(Debug)]
pub struct Backend {
    /// Resolved address and attributes.
    pub address: Address,
    /// Weight for weighted round-robin, from the `weight` attribute (default 1).
    pub weight: u32,
    /// Maximum concurrent calls allowed.
    pub max_concurrent_calls: usize,
    /// Number of calls currently relayed through this backend.
    pub active_calls: AtomicUsize,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    pub state: AtomicU8,
    pub consecutive_failures: AtomicUsize,
    pub consecutive_successes: AtomicUsize,
}

impl Backend {
    pub fn new(address: Address, max_concurrent_calls: usize) -> Self {
        let weight = address
            .attribute(WEIGHT_ATTRIBUTE)
            .and_then(|w| w.trim().parse::<u32>().ok())
            .unwrap_or(1);
        if weight > MAX_WEIGHT {
            tracing::warn!(addr = %address.addr, weight, max = MAX_WEIGHT, "Backend weight clamped");
        }
        let weight = weight.min(MAX_WEIGHT);
        Self {
            address,
            weight,
            max_concurrent_calls,
            active_calls: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    /// `host:port` to dial.
    pub fn addr(&self) -> &str {
        &self.address.addr
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.address.attribute(key)
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::Relaxed)
    }

    fn dec_calls(&self) {
        self.active_calls.fetch_sub(1, Ordering::Relaxed);
    }

    /// Reserve a call slot, or None when the backend is at its limit.
    pub fn try_create_guard(self: &Arc<Self>) -> Option<BackendCallGuard> {
        let mut prev = self.active_calls.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_concurrent_calls {
                return None;
            }
            match self.active_calls.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(BackendCallGuard {
            backend: Arc::clone(self),
        })
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy or Unknown.
    pub fn is_healthy(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Report a successful call. Returns true on a transition to Healthy.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.health() == HealthState::Healthy {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            self.state.store(HealthState::Healthy as u8, Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Report a failed dial. Returns true on a transition to Unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if self.health() == HealthState::Unhealthy {
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state.store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Feed a call outcome into passive health, logging transitions.
    pub fn report(&self, ok: bool, healthy_threshold: usize, unhealthy_threshold: usize) {
        let changed = if ok {
            self.mark_success(healthy_threshold)
        } else {
            self.mark_failure(unhealthy_threshold)
        };
        if changed {
            let healthy = self.is_healthy();
            if healthy {
                tracing::info!(addr = %self.addr(), "Backend marked healthy");
            } else {
                tracing::warn!(addr = %self.addr(), "Backend marked unhealthy");
            }
            metrics::record_backend_health(self.addr(), healthy);
        }
    }
}

/// Holds one call slot on a backend; released on drop.
#[derive(Debug)]
pub struct BackendCallGuard {
    pub backend: Arc<Backend>,
}

impl Deref for BackendCallGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendCallGuard {
    fn drop(&mut self) {
        self.backend.dec_calls();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(max: usize) -> Arc<Backend> {
        Arc::new(Backend::new(Address::new("127.0.0.1:9000"), max))
    }

    #[test]
    fn test_guard_limits_and_releases() {
        let b = backend(2);
        let g1 = b.try_create_guard().unwrap();
        let _g2 = b.try_create_guard().unwrap();
        assert!(b.try_create_guard().is_none());
        assert_eq!(b.active_calls(), 2);

        drop(g1);
        assert_eq!(b.active_calls(), 1);
        assert!(b.try_create_guard().is_some());
    }

    #[test]
    fn test_health_transitions() {
        let b = backend(10);
        assert!(b.is_healthy());

        assert!(!b.mark_failure(2));
        assert!(b.mark_failure(2));
        assert!(!b.is_healthy());

        assert!(!b.mark_success(2));
        assert!(b.mark_success(2));
        assert_eq!(b.health(), HealthState::Healthy);
    }

    #[test]
    fn test_weight_attribute() {
        let b = Backend::new(Address::new("h:1").with_attribute("weight", "5"), 1);
        assert_eq!(b.weight, 5);
        let b = Backend::new(Address::new("h:1").with_attribute("weight", "x"), 1);
        assert_eq!(b.weight, 1);
    }

    #[test]
    fn test_huge_weight_is_clamped() {
        let b = Backend::new(Address::new("h:1").with_attribute("weight", "4000000000"), 1);
        assert_eq!(b.weight, MAX_WEIGHT);
    }
}
