//! Request handling and transformation.
//!
//! # Responsibilities
//! - Validate the gRPC `:path` shape
//! - Parse the `grpc-timeout` deadline
//! - Build the outbound request (strip hop-by-hop headers, keep request id)
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing (tower-http layer)
//! - Metadata is forwarded verbatim, including `grpc-timeout` and `te`
//! - The body is never buffered; the caller hands in a streaming body

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING, UPGRADE};
use axum::http::{request, HeaderMap, Request, Uri, Version};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

const HOP_BY_HOP: [&str; 3] = ["keep-alive", "proxy-connection", "proxy-authorization"];

/// True for `/service/method` with both segments non-empty.
pub fn is_grpc_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    match rest.split_once('/') {
        Some((service, method)) => {
            !service.is_empty() && !method.is_empty() && !method.contains('/')
        }
        None => false,
    }
}

/// Parse a `grpc-timeout` value: at most 8 digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Deadline carried by the inbound call, if any.
pub fn grpc_timeout(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(GRPC_TIMEOUT)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_grpc_timeout)
}

/// Request id set by the request-id layer, or a fresh one.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == HOST
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || HOP_BY_HOP.contains(&name.as_str())
}

/// Copy end-to-end headers from `from` into `to`.
pub fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Same method and path on `addr`, inbound metadata attached, over HTTP/2.
pub fn outbound_request(
    parts: &request::Parts,
    addr: &str,
    request_id: &str,
    body: Body,
) -> Result<Request<Body>, axum::http::Error> {
    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("http://{addr}{path}").parse()?;

    let mut request = Request::builder()
        .method(parts.method.clone())
        .uri(uri)
        .version(Version::HTTP_2)
        .body(body)?;

    let headers = request.headers_mut();
    copy_headers(&parts.headers, headers);
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grpc_path_shape() {
        assert!(is_grpc_path("/mtx.sample.v1.Greeter/SayHello"));
        assert!(!is_grpc_path("/"));
        assert!(!is_grpc_path("/only-service"));
        assert!(!is_grpc_path("/svc/"));
        assert!(!is_grpc_path("//method"));
        assert!(!is_grpc_path("/a/b/c"));
        assert!(!is_grpc_path("svc/method"));
    }

    #[test]
    fn test_parse_grpc_timeout_units() {
        assert_eq!(parse_grpc_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_grpc_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("10u"), Some(Duration::from_micros(10)));
        assert_eq!(parse_grpc_timeout("99n"), Some(Duration::from_nanos(99)));
    }

    #[test]
    fn test_parse_grpc_timeout_rejects_garbage() {
        assert_eq!(parse_grpc_timeout(""), None);
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("10x"), None);
        assert_eq!(parse_grpc_timeout("-1S"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
    }

    #[test]
    fn test_outbound_request_strips_hop_by_hop() {
        let inbound = Request::builder()
            .method("POST")
            .uri("http://relay.local/pkg.Svc/Call")
            .header("host", "relay.local")
            .header("connection", "keep-alive")
            .header("content-type", "application/grpc")
            .header("te", "trailers")
            .header("sgr-app-id", "42")
            .body(())
            .unwrap();
        let (parts, ()) = inbound.into_parts();

        let out = outbound_request(&parts, "10.0.0.1:9000", "rid-1", Body::empty()).unwrap();
        assert_eq!(out.uri(), "http://10.0.0.1:9000/pkg.Svc/Call");
        assert_eq!(out.version(), Version::HTTP_2);
        assert!(out.headers().get("host").is_none());
        assert!(out.headers().get("connection").is_none());
        assert_eq!(out.headers()["te"], "trailers");
        assert_eq!(out.headers()["sgr-app-id"], "42");
        assert_eq!(out.headers()[X_REQUEST_ID], "rid-1");
    }
}
