//! Pure routing function: inbound call → (service name, balancer hint).

use std::fmt;

use axum::http::HeaderMap;

use crate::routing::metadata::{first_value, MetadataKeys};

const APP_ID_PREFIX: &str = "AppID.";

/// Balancing hint derived from call metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancerHint {
    /// Use the pool's default policy.
    None,
    /// Pin to the instance with this app id (`AppID.<id>`).
    AppId(String),
    /// Named policy.
    Named(String),
}

impl BalancerHint {
    /// Interpret a balancer name. `AppID.<id>` pins, anything else names a policy.
    pub fn parse(hint: &str) -> Self {
        let hint = hint.trim();
        if hint.is_empty() {
            return BalancerHint::None;
        }
        match hint.strip_prefix(APP_ID_PREFIX) {
            Some(id) if !id.is_empty() => BalancerHint::AppId(id.to_string()),
            _ => BalancerHint::Named(hint.to_string()),
        }
    }
}

impl fmt::Display for BalancerHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalancerHint::None => Ok(()),
            BalancerHint::AppId(id) => write!(f, "{APP_ID_PREFIX}{id}"),
            BalancerHint::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub service: String,
    pub hint: BalancerHint,
}

/// Decide where a call goes.
///
/// The service name comes from the app-name metadata when present, otherwise
/// from the method's package. An app id beats an explicit balancer name.
///
/// Metadata values are taken as sent apart from surrounding whitespace, which
/// is trimmed; a blank value counts as absent.
///
/// # Panics
///
/// When `full_method` has no `/`. Method names come from the transport, so a
/// missing separator is a caller bug.
pub fn route(headers: &HeaderMap, full_method: &str, keys: &MetadataKeys) -> RouteTarget {
    let service = match first_value(headers, &keys.app_name_key) {
        Some(name) => name.to_string(),
        None => service_from_method(full_method),
    };

    let hint = if let Some(id) = first_value(headers, &keys.app_id_key) {
        BalancerHint::AppId(id.to_string())
    } else if let Some(name) = first_value(headers, &keys.balancer_key) {
        BalancerHint::parse(name)
    } else {
        BalancerHint::None
    };

    RouteTarget { service, hint }
}

/// Package of `/pkg.Service/Method`, i.e. `pkg`. A service segment without a
/// `.` is used whole.
///
/// # Panics
///
/// When `full_method` has no `/` after the leading one.
pub fn service_from_method(full_method: &str) -> String {
    let trimmed = full_method.strip_prefix('/').unwrap_or(full_method);
    let Some((service, _method)) = trimmed.rsplit_once('/') else {
        panic!("malformed method name {full_method:?}: expected /service/method");
    };
    match service.rsplit_once('.') {
        Some((package, _)) => package.to_string(),
        None => service.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, v.parse().unwrap());
        }
        h
    }

    #[test]
    fn test_service_from_package() {
        let t = route(&HeaderMap::new(), "/mtx.sample.v1.Greeter/SayHello", &MetadataKeys::default());
        assert_eq!(t.service, "mtx.sample.v1");
        assert_eq!(t.hint, BalancerHint::None);
    }

    #[test]
    fn test_service_without_package() {
        assert_eq!(service_from_method("/Greeter/SayHello"), "Greeter");
        assert_eq!(service_from_method("pkg.Greeter/SayHello"), "pkg");
    }

    #[test]
    fn test_app_name_wins() {
        let h = headers(&[("sgr-app-name", "billing")]);
        let t = route(&h, "/mtx.sample.v1.Greeter/SayHello", &MetadataKeys::default());
        assert_eq!(t.service, "billing");
    }

    #[test]
    fn test_app_name_is_trimmed_and_blank_ignored() {
        let keys = MetadataKeys::default();
        let t = route(&headers(&[("sgr-app-name", "  orders ")]), "/mtx.sample.v1.Greeter/SayHello", &keys);
        assert_eq!(t.service, "orders");

        let t = route(&headers(&[("sgr-app-name", "   ")]), "/mtx.sample.v1.Greeter/SayHello", &keys);
        assert_eq!(t.service, "mtx.sample.v1");
    }

    #[test]
    fn test_app_id_beats_balancer() {
        let h = headers(&[("sgr-app-id", "42"), ("sgr-balancer", "ring_hash")]);
        let t = route(&h, "/a.B/C", &MetadataKeys::default());
        assert_eq!(t.hint, BalancerHint::AppId("42".into()));
        assert_eq!(t.hint.to_string(), "AppID.42");
    }

    #[test]
    fn test_balancer_name_hint() {
        let h = headers(&[("sgr-balancer", "ring_hash")]);
        let t = route(&h, "/a.B/C", &MetadataKeys::default());
        assert_eq!(t.hint, BalancerHint::Named("ring_hash".into()));

        let h = headers(&[("sgr-balancer", "AppID.7")]);
        let t = route(&h, "/a.B/C", &MetadataKeys::default());
        assert_eq!(t.hint, BalancerHint::AppId("7".into()));
    }

    #[test]
    #[should_panic(expected = "malformed method name")]
    fn test_malformed_method_panics() {
        route(&HeaderMap::new(), "no-separator", &MetadataKeys::default());
    }
}
