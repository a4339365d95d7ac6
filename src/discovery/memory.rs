//! In-process service directory.
//!
//! Each service name owns a `tokio::sync::watch` channel holding its full
//! snapshot. Writers replace the snapshot; watchers see the latest one.
//! A channel that was only ever watched is dropped with its last watcher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::discovery::{
    validate_entry, ConfigItem, Discovery, DiscoveryError, Service, ServiceEntry, WatchStream,
};

/// Directory kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDiscovery {
    services: Arc<DashMap<String, watch::Sender<Service>>>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> watch::Sender<Service> {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(Service::default()).0)
            .clone()
    }

    /// Replace the whole snapshot of `name`.
    pub fn publish(&self, name: &str, service: Service) {
        tracing::debug!(service = %name, entries = service.entries.len(), "Publishing snapshot");
        self.channel(name).send_replace(service);
    }

    /// Remove one instance. Returns false when it was not registered.
    pub fn deregister(&self, name: &str, id: &str) -> bool {
        let Some(tx) = self.services.get(name).map(|s| s.value().clone()) else {
            return false;
        };
        tx.send_if_modified(|service| {
            let before = service.entries.len();
            service.entries.retain(|e| e.id != id);
            service.entries.len() != before
        })
    }

    /// Replace the scheduling directives of `name`.
    pub fn set_configs(&self, name: &str, configs: Vec<ConfigItem>) {
        self.channel(name).send_modify(|service| service.configs = configs);
    }

    /// Replace every known service with `services`. Names missing from the
    /// new table are published as empty.
    pub fn replace_all(&self, mut services: HashMap<String, Service>) {
        let known: Vec<String> = self.services.iter().map(|s| s.key().clone()).collect();
        for name in known {
            let next = services.remove(&name).unwrap_or_default();
            self.publish(&name, next);
        }
        for (name, service) in services {
            self.publish(&name, service);
        }
    }

    /// Names with a snapshot channel.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.key().clone()).collect()
    }
}

#[async_trait]
impl Discovery for MemoryDiscovery {
    async fn register(&self, mut entry: ServiceEntry) -> Result<(), DiscoveryError> {
        validate_entry(&entry)?;
        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().to_string();
        }
        tracing::info!(service = %entry.name, id = %entry.id, "Registering instance");
        self.channel(&entry.name).send_modify(|service| {
            match service.entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => service.entries.push(entry),
            }
        });
        Ok(())
    }

    async fn lookup(&self, name: &str, id: &str) -> Result<ServiceEntry, DiscoveryError> {
        self.services
            .get(name)
            .and_then(|tx| tx.value().borrow().entries.iter().find(|e| e.id == id).cloned())
            .ok_or_else(|| DiscoveryError::InstanceNotFound {
                name: name.to_string(),
                id: id.to_string(),
            })
    }

    async fn browse(&self, name: &str) -> Result<Service, DiscoveryError> {
        self.services
            .get(name)
            .map(|tx| tx.value().borrow().clone())
            .ok_or_else(|| DiscoveryError::NotFound {
                name: name.to_string(),
            })
    }

    async fn watch(
        &self,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<WatchStream, DiscoveryError> {
        // subscribe under the entry lock so a concurrent release cannot orphan us
        let rx = self
            .services
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(Service::default()).0)
            .subscribe();
        let state = WatchState {
            rx,
            cancel,
            phase: WatchPhase::Initial,
            _release: Release {
                services: Arc::clone(&self.services),
                name: name.to_string(),
            },
        };
        Ok(Box::pin(futures_util::stream::unfold(state, next_snapshot)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchPhase {
    Initial,
    Changes,
    Done,
}

struct WatchState {
    rx: watch::Receiver<Service>,
    cancel: CancellationToken,
    phase: WatchPhase,
    // declared after `rx` so the receiver is gone when it runs
    _release: Release,
}

/// Removes a channel nobody watches and nothing was published to.
struct Release {
    services: Arc<DashMap<String, watch::Sender<Service>>>,
    name: String,
}

impl Drop for Release {
    fn drop(&mut self) {
        let removed = self.services.remove_if(&self.name, |_, tx| {
            tx.receiver_count() == 0 && *tx.borrow() == Service::default()
        });
        if removed.is_some() {
            tracing::trace!(service = %self.name, "Released unused snapshot channel");
        }
    }
}

async fn next_snapshot(
    mut st: WatchState,
) -> Option<(Result<Service, DiscoveryError>, WatchState)> {
    loop {
        match st.phase {
            WatchPhase::Done => return None,
            WatchPhase::Initial => {
                st.phase = WatchPhase::Changes;
                let snapshot = st.rx.borrow_and_update().clone();
                if !snapshot.entries.is_empty() {
                    return Some((Ok(snapshot), st));
                }
            }
            WatchPhase::Changes => {
                tokio::select! {
                    _ = st.cancel.cancelled() => {
                        st.phase = WatchPhase::Done;
                        return Some((Err(DiscoveryError::Cancelled), st));
                    }
                    changed = st.rx.changed() => {
                        if changed.is_err() {
                            // directory dropped
                            return None;
                        }
                        let snapshot = st.rx.borrow_and_update().clone();
                        return Some((Ok(snapshot), st));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn entry(id: &str, name: &str) -> ServiceEntry {
        ServiceEntry {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".into(),
            endpoints: vec![format!("grpc://127.0.0.1:{}", 9000 + id.len())],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_lookup_browse() {
        let d = MemoryDiscovery::new();
        d.register(entry("a", "svc")).await.unwrap();
        d.register(entry("b", "svc")).await.unwrap();

        let found = d.lookup("svc", "b").await.unwrap();
        assert_eq!(found.id, "b");
        assert!(d.lookup("svc", "c").await.is_err());

        let service = d.browse("svc").await.unwrap();
        assert_eq!(service.entries.len(), 2);
        assert!(matches!(
            d.browse("other").await,
            Err(DiscoveryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_same_id_replaces() {
        let d = MemoryDiscovery::new();
        d.register(entry("a", "svc")).await.unwrap();
        let mut updated = entry("a", "svc");
        updated.version = "2.0.0".into();
        d.register(updated).await.unwrap();

        let service = d.browse("svc").await.unwrap();
        assert_eq!(service.entries.len(), 1);
        assert_eq!(service.entries[0].version, "2.0.0");
    }

    #[tokio::test]
    async fn test_register_assigns_missing_id() {
        let d = MemoryDiscovery::new();
        d.register(entry("", "svc")).await.unwrap();
        let service = d.browse("svc").await.unwrap();
        assert!(!service.entries[0].id.is_empty());
    }

    #[tokio::test]
    async fn test_watch_emits_full_snapshots() {
        let d = MemoryDiscovery::new();
        d.register(entry("a", "svc")).await.unwrap();

        let cancel = CancellationToken::new();
        let mut stream = d.watch("svc", cancel.clone()).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.entries.len(), 1);

        d.register(entry("b", "svc")).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.entries.len(), 2, "each emission is the full set");

        assert!(d.deregister("svc", "a"));
        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third.entries.len(), 1);
        assert_eq!(third.entries[0].id, "b");
    }

    #[tokio::test]
    async fn test_watch_waits_when_empty() {
        let d = MemoryDiscovery::new();
        let mut stream = d.watch("svc", CancellationToken::new()).await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err(), "no snapshot before instances exist");

        d.register(entry("a", "svc")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_ends_on_cancel() {
        let d = MemoryDiscovery::new();
        d.register(entry("a", "svc")).await.unwrap();
        let cancel = CancellationToken::new();
        let mut stream = d.watch("svc", cancel.clone()).await.unwrap();
        let _ = stream.next().await;

        cancel.cancel();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_cancellation());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_replace_all_empties_removed_services() {
        let d = MemoryDiscovery::new();
        d.register(entry("a", "svc")).await.unwrap();
        d.register(entry("b", "other")).await.unwrap();

        let mut next = HashMap::new();
        next.insert(
            "other".to_string(),
            Service {
                entries: vec![entry("c", "other")],
                configs: vec![],
            },
        );
        d.replace_all(next);

        assert!(d.browse("svc").await.unwrap().entries.is_empty());
        assert_eq!(d.browse("other").await.unwrap().entries[0].id, "c");
    }

    #[tokio::test]
    async fn test_unpublished_names_are_released_with_their_watchers() {
        let d = MemoryDiscovery::new();
        for i in 0..1000 {
            let stream = d.watch(&format!("bogus-{i}"), CancellationToken::new()).await.unwrap();
            drop(stream);
        }
        assert!(d.service_names().is_empty());

        // published names survive their watchers
        d.register(entry("a", "svc")).await.unwrap();
        let stream = d.watch("svc", CancellationToken::new()).await.unwrap();
        drop(stream);
        assert_eq!(d.service_names(), vec!["svc".to_string()]);
    }

    #[tokio::test]
    async fn test_watched_name_kept_while_another_watcher_remains() {
        let d = MemoryDiscovery::new();
        let first = d.watch("svc", CancellationToken::new()).await.unwrap();
        let mut second = d.watch("svc", CancellationToken::new()).await.unwrap();
        drop(first);
        assert_eq!(d.service_names(), vec!["svc".to_string()]);

        d.register(entry("a", "svc")).await.unwrap();
        let snapshot = second.next().await.unwrap().unwrap();
        assert_eq!(snapshot.entries.len(), 1);
    }
}
