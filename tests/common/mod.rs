//! Shared utilities for integration tests: an h2c echo backend, an h2c client
//! and a relay running on an ephemeral port.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use grpc_relay::config::RelayConfig;
use grpc_relay::discovery::{MemoryDiscovery, Service, ServiceEntry};
use grpc_relay::load_balancer::BackendManager;
use grpc_relay::RelayServer;

pub type FrameSender = mpsc::Sender<Result<Frame<Bytes>, Infallible>>;

/// How a backend saw a request stream end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Client half-closed.
    Clean,
    /// Stream reset or connection dropped.
    Reset,
}

/// A running echo backend.
pub struct EchoBackend {
    pub addr: SocketAddr,
    pub name: &'static str,
    ends: mpsc::UnboundedReceiver<StreamEnd>,
}

impl EchoBackend {
    /// Wait for the next request stream to finish.
    pub async fn next_end(&mut self) -> Option<StreamEnd> {
        tokio::time::timeout(Duration::from_secs(5), self.ends.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn entry(&self, id: &str, service: &str) -> ServiceEntry {
        ServiceEntry {
            id: id.to_string(),
            name: service.to_string(),
            version: "1.0.0".to_string(),
            endpoints: vec![format!("grpc://{}", self.addr)],
            metadata: [("app-id".to_string(), id.to_string())].into_iter().collect(),
            ..Default::default()
        }
    }
}

/// Start an h2c backend that echoes every data frame back, then ends the
/// call with `grpc-status: 0` and an `x-trailer` trailer.
///
/// Response headers carry `x-backend: <name>` and `x-echo` copied from the
/// request.
pub async fn start_echo_backend(name: &'static str) -> EchoBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (end_tx, ends) = mpsc::unbounded_channel();

    let app = Router::new().fallback(move |request: Request<Body>| {
        let end_tx = end_tx.clone();
        async move { echo(name, request, end_tx) }
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    EchoBackend { addr, name, ends }
}

fn echo(
    name: &'static str,
    request: Request<Body>,
    end_tx: mpsc::UnboundedSender<StreamEnd>,
) -> Response<Body> {
    let (parts, mut body) = request.into_parts();
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(16);

    tokio::spawn(async move {
        let end = loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        if tx.send(Ok(Frame::data(data))).await.is_err() {
                            break StreamEnd::Reset;
                        }
                    }
                }
                Some(Err(_)) => break StreamEnd::Reset,
                None => break StreamEnd::Clean,
            }
        };
        if end == StreamEnd::Clean {
            let mut trailers = HeaderMap::new();
            trailers.insert("grpc-status", HeaderValue::from_static("0"));
            trailers.insert("x-trailer", HeaderValue::from_static("done"));
            let _ = tx.send(Ok(Frame::trailers(trailers))).await;
        }
        let _ = end_tx.send(end);
    });

    let mut response = Response::new(Body::new(StreamBody::new(ReceiverStream::new(rx))));
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("application/grpc"));
    headers.insert("x-backend", HeaderValue::from_static(name));
    if let Some(echo) = parts.headers.get("x-echo") {
        headers.insert("x-echo", echo.clone());
    }
    response
}

/// A relay serving on an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub discovery: Arc<MemoryDiscovery>,
    pub manager: Option<Arc<BackendManager>>,
}

impl TestRelay {
    pub fn publish(&self, service: &str, entries: Vec<ServiceEntry>) {
        self.discovery.publish(
            service,
            Service {
                entries,
                configs: Vec::new(),
            },
        );
    }

    pub fn active_calls(&self) -> usize {
        self.manager
            .as_ref()
            .map(|m| {
                m.snapshot()
                    .iter()
                    .flat_map(|p| p.backends.iter())
                    .map(|b| b.active_calls)
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Test configuration: fast dial timeout, no metrics exporter.
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.resolver.dial_timeout_secs = 1;
    config.observability.metrics_enabled = false;
    config
}

pub async fn start_relay(config: RelayConfig) -> TestRelay {
    let discovery = Arc::new(MemoryDiscovery::new());
    let server = RelayServer::new(config, discovery.clone());
    let manager = server.backend_manager_handle();
    let app = server.router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestRelay {
        addr,
        discovery,
        manager,
    }
}

pub type H2Client = Client<HttpConnector, Body>;

pub fn h2_client() -> H2Client {
    Client::builder(TokioExecutor::new())
        .http2_only(true)
        .build(HttpConnector::new())
}

/// Length-prefixed gRPC message.
pub fn grpc_frame(payload: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(payload.len() + 5);
    buf.push(0);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Bytes::from(buf)
}

/// A streaming request body and the sender that feeds it.
pub fn streaming_body() -> (FrameSender, Body) {
    let (tx, rx) = mpsc::channel(16);
    (tx, Body::new(StreamBody::new(ReceiverStream::new(rx))))
}

/// Request builder preset for a gRPC call to `method` through `relay`.
pub fn grpc_request(relay: SocketAddr, method: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri(format!("http://{relay}{method}"))
        .header("content-type", "application/grpc")
        .header("te", "trailers")
}

/// `grpc-status` of a block, as an integer.
pub fn grpc_status(headers: &HeaderMap) -> Option<i32> {
    headers
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
