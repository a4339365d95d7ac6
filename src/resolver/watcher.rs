//! Resolver state machine: `Uninitialized → Watching → Closed`.
//!
//! # Responsibilities
//! - Consume the directory watch stream in one background task
//! - Translate each snapshot into a `ResolverState` and push it
//! - Debounce empty snapshots with a grace timer
//! - Stop on cancellation or on the first unexpected watch error

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::discovery::{Discovery, Service, ServiceEntry, WatchStream};
use crate::observability::metrics;
use crate::resolver::{
    Address, BuildOptions, ClientConn, ResolverError, ResolverState, ServiceConfig, Target,
};

/// Lifecycle phase of a resolver.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPhase {
    Uninitialized = 0,
    Watching = 1,
    Closed = 2,
}

impl From<u8> for ResolverPhase {
    fn from(val: u8) -> Self {
        match val {
            1 => ResolverPhase::Watching,
            2 => ResolverPhase::Closed,
            _ => ResolverPhase::Uninitialized,
        }
    }
}

/// A running resolver. Dropping it closes it.
#[derive(Debug)]
pub struct Resolver {
    target: Target,
    phase: Arc<AtomicU8>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Resolver {
    /// Bypass mode: seed state from a static entry set, no watch.
    pub(crate) fn local(
        target: Target,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
        entries: Vec<ServiceEntry>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut session = Session::new(target.clone(), conn, opts, cancel.clone());
        session.entries = entries;
        session.push();
        tracing::info!(service = %target.service_name, "Resolver seeded from local table");

        Self {
            target,
            phase: Arc::new(AtomicU8::new(ResolverPhase::Watching as u8)),
            cancel,
            task: None,
        }
    }

    /// Watch mode: block on the first snapshot, then hand the stream to a task.
    pub(crate) async fn watch(
        target: Target,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
        discovery: Arc<dyn Discovery>,
        empty_grace: Duration,
    ) -> Result<Self, ResolverError> {
        let phase = Arc::new(AtomicU8::new(ResolverPhase::Uninitialized as u8));
        let cancel = CancellationToken::new();

        let mut stream = discovery
            .watch(&target.service_name, cancel.clone())
            .await?;
        let first = match stream.next().await {
            Some(Ok(service)) => service,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ResolverError::StreamEnded(target.service_name.clone())),
        };

        let mut session = Session::new(target.clone(), conn, opts, cancel.clone());
        session.replace(first);
        session.push();

        phase.store(ResolverPhase::Watching as u8, Ordering::Release);
        tracing::info!(
            service = %target.service_name,
            schema = %target.endpoint_schema,
            "Resolver initialized"
        );

        let task = tokio::spawn(run_watch(
            session,
            stream,
            cancel.clone(),
            empty_grace,
            Arc::clone(&phase),
        ));

        Ok(Self {
            target,
            phase,
            cancel,
            task: Some(task),
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn phase(&self) -> ResolverPhase {
        ResolverPhase::from(self.phase.load(Ordering::Acquire))
    }

    /// Stop watching. No state is pushed afterwards. Idempotent.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(service = %self.target.service_name, "Closing resolver");
        }
        self.cancel.cancel();
        self.phase.store(ResolverPhase::Closed as u8, Ordering::Release);
    }

    /// Wait for the watch task to finish. Returns immediately in bypass mode.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the watch task.
struct Session {
    target: Target,
    conn: Arc<dyn ClientConn>,
    opts: BuildOptions,
    cancel: CancellationToken,
    entries: Vec<ServiceEntry>,
    config: ServiceConfig,
}

impl Session {
    fn new(
        target: Target,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            conn,
            opts,
            cancel,
            entries: Vec::new(),
            config: ServiceConfig::default(),
        }
    }

    fn replace(&mut self, service: Service) {
        self.entries = service.entries;
        self.config = ServiceConfig::parse(&service.configs);
    }

    fn state(&self) -> ResolverState {
        let entries = self.config.gray_release.apply(self.entries.clone());
        let mut addresses = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(addr) = select_endpoint(&entry.endpoints, &self.target.endpoint_schema) else {
                tracing::warn!(
                    service = %entry.name,
                    id = %entry.id,
                    endpoints = ?entry.endpoints,
                    schema = %self.target.endpoint_schema,
                    "No usable endpoint, instance skipped"
                );
                continue;
            };
            let mut attributes = std::collections::BTreeMap::new();
            attributes.insert("id".to_string(), entry.id);
            attributes.insert("name".to_string(), entry.name);
            attributes.extend(entry.metadata);
            addresses.push(Address {
                addr,
                server_name: self.target.service_name.clone(),
                attributes,
            });
        }

        let load_balancing_policy = if self.opts.disable_service_config
            || self.config.load_balancing.is_empty()
        {
            None
        } else {
            Some(self.config.load_balancing.clone())
        };

        ResolverState {
            addresses,
            load_balancing_policy,
        }
    }

    fn push(&self) {
        self.push_state(self.state());
    }

    fn push_state(&self, state: ResolverState) {
        if self.cancel.is_cancelled() {
            return;
        }
        let count = state.addresses.len();
        tracing::info!(
            service = %self.target.service_name,
            addresses = count,
            policy = ?state.load_balancing_policy,
            "Pushing resolver state"
        );
        metrics::record_resolver_update(&self.target.service_name, count);

        if let Err(e) = self.conn.update_state(state) {
            if count != 0 {
                tracing::error!(service = %self.target.service_name, error = %e, "Connection rejected resolver state");
            }
        }
    }
}

/// First endpoint carrying `schema`, with the prefix stripped. A lone endpoint
/// of any scheme is used as-is.
pub(crate) fn select_endpoint(endpoints: &[String], schema: &str) -> Option<String> {
    if let Some(found) = endpoints.iter().find_map(|e| e.strip_prefix(schema)) {
        return Some(found.to_string()).filter(|s| !s.is_empty());
    }
    match endpoints {
        [only] => {
            let bare = only.split_once("://").map_or(only.as_str(), |(_, rest)| rest);
            Some(bare.to_string()).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

async fn run_watch(
    mut session: Session,
    mut stream: WatchStream,
    cancel: CancellationToken,
    empty_grace: Duration,
    phase: Arc<AtomicU8>,
) {
    let service = session.target.service_name.clone();
    let grace = time::sleep(empty_grace);
    tokio::pin!(grace);
    let mut grace_armed = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::info!(service = %service, "Resolver watch cancelled");
                break;
            }
            next = stream.next() => match next {
                None => {
                    tracing::info!(service = %service, "Discovery watch stream closed");
                    break;
                }
                Some(Err(e)) if e.is_cancellation() => {
                    tracing::info!(service = %service, reason = %e, "Discovery watch ended");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        service = %service,
                        error = %e,
                        "Discovery watch failed, resolver stopped until re-dialed"
                    );
                    break;
                }
                Some(Ok(snapshot)) => {
                    tracing::debug!(service = %service, entries = snapshot.entries.len(), "Resolver received snapshot");
                    session.replace(snapshot);
                    // instances without a usable endpoint count as empty too
                    let state = session.state();
                    if state.addresses.is_empty() {
                        // the first empty snapshot arms the timer; later ones do not extend it
                        if !grace_armed {
                            grace.as_mut().reset(Instant::now() + empty_grace);
                            grace_armed = true;
                        }
                    } else {
                        grace_armed = false;
                        session.push_state(state);
                    }
                }
            },
            () = &mut grace, if grace_armed => {
                grace_armed = false;
                let state = session.state();
                if state.addresses.is_empty() {
                    tracing::warn!(service = %service, instances = session.entries.len(), "Service still without addresses after grace period");
                    session.push_state(state);
                }
            }
        }
    }

    phase.store(ResolverPhase::Closed as u8, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_matching_scheme() {
        let endpoints = eps(&["http://10.0.0.1:80", "grpc://10.0.0.1:9000"]);
        assert_eq!(select_endpoint(&endpoints, "grpc://").as_deref(), Some("10.0.0.1:9000"));
        assert_eq!(select_endpoint(&endpoints, "http://").as_deref(), Some("10.0.0.1:80"));
    }

    #[test]
    fn test_select_first_match_wins() {
        let endpoints = eps(&["grpc://a:1", "grpc://b:2"]);
        assert_eq!(select_endpoint(&endpoints, "grpc://").as_deref(), Some("a:1"));
    }

    #[test]
    fn test_single_endpoint_used_unconditionally() {
        assert_eq!(select_endpoint(&eps(&["tcp://h:1"]), "grpc://").as_deref(), Some("h:1"));
        assert_eq!(select_endpoint(&eps(&["h:1"]), "grpc://").as_deref(), Some("h:1"));
    }

    #[test]
    fn test_no_match_among_many() {
        assert_eq!(select_endpoint(&eps(&["tcp://h:1", "ws://h:2"]), "grpc://"), None);
        assert_eq!(select_endpoint(&[], "grpc://"), None);
    }
}
