//! RPC status responses.
//!
//! # Responsibilities
//! - Render a `tonic::Status` as a trailers-only response
//! - Render a `tonic::Status` as a trailers frame after relayed data
//! - Read the final code of a relayed call for metrics

use axum::body::Body;
use axum::http::{HeaderMap, Response};
use tonic::{Code, Status};

const GRPC_STATUS: &str = "grpc-status";

/// Trailers-only response: HTTP 200 with the status in the headers.
pub fn status_response(status: Status) -> Response<Body> {
    status.into_http()
}

/// Status as a trailers block.
pub fn status_trailers(status: &Status) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    if status.add_header(&mut trailers).is_err() {
        // message or details not encodable; keep the code
        let fallback = Status::new(status.code(), "");
        let _ = fallback.add_header(&mut trailers);
    }
    trailers
}

/// `grpc-status` of a headers or trailers block.
pub fn status_code(headers: &HeaderMap) -> Option<Code> {
    headers
        .get(GRPC_STATUS)
        .map(|v| Code::from_bytes(v.as_bytes()))
}

/// Metric label for a code.
pub fn code_label(code: Code) -> String {
    format!("{code:?}")
}
