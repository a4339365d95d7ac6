//! Config file watcher.
//!
//! Only the service tables (`services`, `service_configs`) are applied at
//! runtime. Changes to any other section are reported and need a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::RelayConfig;

/// What a reloaded file changes relative to the running configuration.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadDiff {
    pub services_changed: bool,
    /// Sections that changed but only take effect on restart.
    pub restart_required: Vec<&'static str>,
}

fn section<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Compare two configurations section by section.
pub fn diff(current: &RelayConfig, next: &RelayConfig) -> ReloadDiff {
    let services_changed = section(&current.services) != section(&next.services)
        || section(&current.service_configs) != section(&next.service_configs);

    let restart_required = [
        ("listener", section(&current.listener) != section(&next.listener)),
        ("resolver", section(&current.resolver) != section(&next.resolver)),
        ("balancer", section(&current.balancer) != section(&next.balancer)),
        ("routing", section(&current.routing) != section(&next.routing)),
        ("health", section(&current.health) != section(&next.health)),
        ("observability", section(&current.observability) != section(&next.observability)),
        ("admin", section(&current.admin) != section(&next.admin)),
        ("local_services", section(&current.local_services) != section(&next.local_services)),
    ]
    .into_iter()
    .filter_map(|(name, changed)| changed.then_some(name))
    .collect();

    ReloadDiff {
        services_changed,
        restart_required,
    }
}

pub struct ConfigWatcher {
    path: PathBuf,
    current: RelayConfig,
    update_tx: mpsc::UnboundedSender<RelayConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration the relay started with. The receiver
    /// gets every validated reload that changes the service tables.
    pub fn new(path: &Path, current: RelayConfig) -> (Self, mpsc::UnboundedReceiver<RelayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            current,
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. The returned handle must be kept alive.
    ///
    /// The parent directory is watched so that editors replacing the file
    /// (write to temp, rename) are still seen.
    pub fn run(self) -> notify::Result<RecommendedWatcher> {
        let Self {
            path,
            mut current,
            update_tx,
        } = self;
        let file_name = path.file_name().map(|n| n.to_os_string());
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let watched = path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !ours || !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }

                let next = match load_config(&watched) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::error!(path = ?watched, error = %e, "Config reload rejected, keeping current services");
                        return;
                    }
                };
                let changes = diff(&current, &next);
                if !changes.restart_required.is_empty() {
                    tracing::warn!(
                        sections = ?changes.restart_required,
                        "Config sections changed that only apply after a restart"
                    );
                }
                if changes.services_changed {
                    tracing::info!(path = ?watched, services = next.services.len(), "Service tables changed, republishing");
                    if update_tx.send(next.clone()).is_err() {
                        return;
                    }
                }
                current = next;
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Watching config file");
        Ok(watcher)
    }
}
