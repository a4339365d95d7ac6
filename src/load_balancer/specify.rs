//! Pin a call to the backend whose attributes match `attr=value`.
//!
//! There is no fallback: a missing, malformed or unmatched policy fails the
//! pick. Health is ignored, the caller asked for this exact instance.

use std::sync::Arc;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::{PickError, PickInfo, Picker, PickerBuilder, SPECIFY};

#[derive(Debug, Default)]
pub struct SpecifyBuilder;

impl PickerBuilder for SpecifyBuilder {
    fn name(&self) -> &str {
        SPECIFY
    }

    fn build(&self, backends: Vec<Arc<Backend>>) -> Arc<dyn Picker> {
        Arc::new(Specify { backends })
    }
}

/// Split `attr=value` on the first `=`. Both halves must be non-empty.
pub fn parse_policy(policy: &str) -> Result<(&str, &str), PickError> {
    match policy.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok((key.trim(), value.trim()))
        }
        _ => Err(PickError::MalformedPolicy(policy.to_string())),
    }
}

#[derive(Debug)]
pub struct Specify {
    backends: Vec<Arc<Backend>>,
}

impl Picker for Specify {
    fn pick(&self, info: &PickInfo<'_>) -> Result<Arc<Backend>, PickError> {
        let policy = info.specify_policy.ok_or(PickError::MissingPolicy)?;
        let (key, value) = parse_policy(policy)?;

        self.backends
            .iter()
            .find(|b| b.attribute(key) == Some(value))
            .cloned()
            .ok_or_else(|| PickError::NoMatch(policy.to_string()))
    }
}
