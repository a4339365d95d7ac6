//! Fallback handler: relay any call with no local route.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::config::HealthConfig;
use crate::http::relay::{self, RelayCall, RELAY_BUFFER};
use crate::http::request::{grpc_timeout, is_grpc_path, is_hop_by_hop, outbound_request, request_id};
use crate::http::response::{code_label, status_code, status_response};
use crate::observability::metrics;
use crate::routing::director::service_from_method;
use crate::routing::StreamDirector;

pub type RelayClient = Client<HttpConnector, Body>;

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    pub director: Arc<dyn StreamDirector>,
    pub client: RelayClient,
    pub health: HealthConfig,
}

impl ProxyState {
    fn report(&self, backend: &crate::load_balancer::backend::Backend, ok: bool) {
        backend.report(
            ok,
            self.health.healthy_threshold as usize,
            self.health.unhealthy_threshold as usize,
        );
    }
}

fn fail(service: &str, status: Status, start: Instant) -> Response<Body> {
    metrics::record_call(service, &code_label(status.code()), start);
    status_response(status)
}

/// Director → pick → outbound call → two relay loops.
pub async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.uri.path().to_string();
    let request_id = request_id(&parts.headers);

    if !is_grpc_path(&method) {
        tracing::debug!(request_id = %request_id, path = %method, "Not a gRPC method path");
        return fail("unknown", Status::unimplemented(format!("unknown method {method}")), start);
    }

    tracing::debug!(request_id = %request_id, method = %method, "Relaying call");

    let outbound = match state.director.connect(&parts.headers, &method).await {
        Ok(outbound) => outbound,
        Err(status) => {
            tracing::warn!(request_id = %request_id, method = %method, error = %status.message(), code = ?status.code(), "No backend for call");
            return fail(&service_from_method(&method), status, start);
        }
    };

    let timeout = grpc_timeout(&parts.headers);
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    let cancel = CancellationToken::new();
    // cancels the call if the client goes away before response headers
    let guard = cancel.clone().drop_guard();

    let (up_tx, up_rx) = mpsc::channel(RELAY_BUFFER);
    let addr = outbound.backend.addr().to_string();
    let request = match outbound_request(&parts, &addr, &request_id, relay::channel_body(up_rx)) {
        Ok(request) => request,
        Err(e) => {
            return fail(&outbound.service, Status::internal(format!("building outbound call: {e}")), start);
        }
    };
    let inbound = relay::spawn_inbound(body, up_tx, cancel.clone());

    let response = tokio::select! {
        response = state.client.request(request) => response,
        _ = relay::deadline_sleep(deadline) => {
            let status = Status::deadline_exceeded(format!("no response from {addr} within {timeout:?}"));
            return fail(&outbound.service, status, start);
        }
    };

    let response = match response {
        Ok(response) => response,
        Err(e) if e.is_connect() => {
            tracing::warn!(request_id = %request_id, addr = %addr, error = %e, "Backend unreachable");
            state.report(&outbound.backend, false);
            return fail(&outbound.service, Status::unavailable(format!("backend {addr} unreachable: {e}")), start);
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, addr = %addr, error = %e, "Outbound call failed");
            return fail(&outbound.service, Status::internal(format!("outbound call to {addr} failed: {e}")), start);
        }
    };
    state.report(&outbound.backend, true);

    let (mut head, backend_body) = response.into_parts();
    let hop_by_hop: Vec<_> = head.headers.keys().filter(|k| is_hop_by_hop(k)).cloned().collect();
    for name in hop_by_hop {
        head.headers.remove(name);
    }

    let (down_tx, down_rx) = mpsc::channel(RELAY_BUFFER);
    let call = RelayCall {
        service: outbound.service,
        method,
        request_id,
        backend: outbound.backend,
        start,
        timeout,
        deadline,
        status_in_headers: status_code(&head.headers).is_some(),
    };
    tokio::spawn(relay::relay_outbound(call, backend_body, down_tx, guard.disarm(), inbound));

    Response::from_parts(head, relay::channel_body(down_rx))
}
