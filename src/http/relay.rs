//! Frame relay between the inbound call and the outbound call.
//!
//! # Responsibilities
//! - inbound → outbound: forward raw frames, half-close on end-of-stream
//! - outbound → inbound: forward raw frames and trailers
//! - Enforce the call deadline and stop both directions together
//!
//! # Design Decisions
//! - Frames are opaque; payloads are never decoded
//! - One `CancellationToken` per call links both directions
//! - The outbound task supervises: it always joins the inbound task
//! - A status is written as trailers only if the backend did not send one

use std::future::Future;
use std::time::{Duration, Instant};

use axum::body::Body;
use bytes::Bytes;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

use crate::http::response::{code_label, status_code, status_trailers};
use crate::load_balancer::backend::BackendCallGuard;
use crate::observability::metrics;

/// Frames buffered per direction.
pub const RELAY_BUFFER: usize = 16;

pub type RelayFrame = Result<Frame<Bytes>, RelayError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("inbound stream failed: {0}")]
    Inbound(String),
    #[error("outbound stream failed: {0}")]
    Outbound(String),
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("call cancelled")]
    Cancelled,
}

impl RelayError {
    pub fn to_status(&self) -> Status {
        match self {
            RelayError::Inbound(_) | RelayError::Outbound(_) => Status::internal(self.to_string()),
            RelayError::DeadlineExceeded(_) => Status::deadline_exceeded(self.to_string()),
            RelayError::Cancelled => Status::cancelled(self.to_string()),
        }
    }
}

/// Streaming body fed by a relay loop.
pub fn channel_body(rx: mpsc::Receiver<RelayFrame>) -> Body {
    Body::new(StreamBody::new(ReceiverStream::new(rx)))
}

/// Resolves at `deadline`, never when there is none.
pub fn deadline_sleep(deadline: Option<tokio::time::Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

/// Send one frame unless the call is cancelled first. False when the frame
/// was not delivered.
async fn forward(tx: &mpsc::Sender<RelayFrame>, frame: Frame<Bytes>, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(Ok(frame)) => sent.is_ok(),
    }
}

/// inbound → outbound.
///
/// A clean inbound end or a closed outbound side both count as success. An
/// inbound transport error is pushed into the outbound body so the backend
/// stream is reset, and the whole call is cancelled.
pub fn spawn_inbound(
    mut body: Body,
    tx: mpsc::Sender<RelayFrame>,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), RelayError>> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = tx.try_send(Err(RelayError::Cancelled));
                    return Ok(());
                }
                _ = tx.closed() => return Ok(()),
                frame = body.frame() => match frame {
                    None => return Ok(()),
                    Some(Ok(frame)) => {
                        if !forward(&tx, frame, &cancel).await {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => {
                        let err = RelayError::Inbound(e.to_string());
                        let _ = tx.try_send(Err(err.clone()));
                        cancel.cancel();
                        return Err(err);
                    }
                },
            }
        }
    })
}

/// One relayed call, handed to the outbound loop once response headers are in.
#[derive(Debug)]
pub struct RelayCall {
    pub service: String,
    pub method: String,
    pub request_id: String,
    /// Held until the call ends so the backend's call count stays accurate.
    pub backend: BackendCallGuard,
    pub start: Instant,
    pub timeout: Option<Duration>,
    pub deadline: Option<tokio::time::Instant>,
    /// The backend answered trailers-only.
    pub status_in_headers: bool,
}

enum End {
    Complete,
    Failed(RelayError),
    ClientGone,
}

/// outbound → inbound, then join the inbound task.
///
/// Returns the final code delivered to the caller.
pub async fn relay_outbound<B>(
    call: RelayCall,
    mut body: B,
    tx: mpsc::Sender<RelayFrame>,
    cancel: CancellationToken,
    inbound: JoinHandle<Result<(), RelayError>>,
) -> Code
where
    B: http_body::Body<Data = Bytes> + Unpin + Send + 'static,
    B::Error: std::fmt::Display,
{
    let mut status_sent = call.status_in_headers;
    let mut code = None;
    let sleep = deadline_sleep(call.deadline);
    tokio::pin!(sleep);

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break End::Failed(RelayError::Cancelled),
            _ = &mut sleep => {
                break End::Failed(RelayError::DeadlineExceeded(call.timeout.unwrap_or_default()));
            }
            _ = tx.closed() => break End::ClientGone,
            frame = body.frame() => match frame {
                None => break End::Complete,
                Some(Ok(frame)) => {
                    if let Some(trailers) = frame.trailers_ref() {
                        code = status_code(trailers);
                        status_sent = true;
                    }
                    if !forward(&tx, frame, &cancel).await {
                        if cancel.is_cancelled() {
                            break End::Failed(RelayError::Cancelled);
                        }
                        break End::ClientGone;
                    }
                }
                Some(Err(e)) => break End::Failed(RelayError::Outbound(e.to_string())),
            },
        }
    };

    // release the outbound call before waiting on the inbound side
    drop(body);
    cancel.cancel();
    let inbound_result = match inbound.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(
                request_id = %call.request_id,
                service = %call.service,
                method = %call.method,
                error = %e,
                "Inbound relay task failed"
            );
            Ok(())
        }
    };

    let failure = match end {
        End::Complete if status_sent => None,
        End::Complete => Some(RelayError::Outbound(
            "backend closed the stream without a status".to_string(),
        )),
        // an inbound failure is what cancelled the call
        End::Failed(RelayError::Cancelled) => Some(inbound_result.err().unwrap_or(RelayError::Cancelled)),
        End::Failed(err) => Some(err),
        End::ClientGone => {
            code = Some(Code::Cancelled);
            None
        }
    };

    if let Some(err) = failure {
        tracing::warn!(
            request_id = %call.request_id,
            service = %call.service,
            method = %call.method,
            addr = %call.backend.addr(),
            error = %err,
            "Relay failed"
        );
        let status = err.to_status();
        if code.is_none() {
            code = Some(status.code());
        }
        if !status_sent {
            let _ = tx.send(Ok(Frame::trailers(status_trailers(&status)))).await;
        }
    }

    let code = code.unwrap_or(Code::Ok);
    tracing::debug!(
        request_id = %call.request_id,
        service = %call.service,
        method = %call.method,
        addr = %call.backend.addr(),
        code = ?code,
        elapsed_ms = call.start.elapsed().as_millis() as u64,
        "Relay finished"
    );
    metrics::record_call(&call.service, &code_label(code), call.start);
    code
}
