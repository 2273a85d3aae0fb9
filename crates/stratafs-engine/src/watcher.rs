//! Filesystem sync watcher for locally backed domains.
//!
//! Watches a domain's physical tree and reconciles the node store with
//! what is actually on disk: externally created files gain nodes,
//! changed files get fresh sizes, deleted files lose their nodes. Events
//! flow through a bounded queue into one consumer thread per watcher;
//! a full queue drops events rather than blocking the notify callback.
//!
//! Reconciliation re-stats the real path per event instead of trusting
//! the event kind, so stale or coalesced notifications cannot corrupt
//! metadata. A failure on one event is logged and skipped; the watcher
//! never dies from a single bad path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use tracing::{debug, info, warn};

use stratafs_meta::{
    Domain, FsConfig, FsError, FsResult, Node, NodeState, NodeStore, Timestamp,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Counters exposed by a running watcher.
#[derive(Debug, Clone, Default)]
pub struct WatcherStats {
    /// Events reconciled against the store.
    pub handled: u64,
    /// Events discarded because the queue was full.
    pub dropped: u64,
    /// Events skipped by the path allow-list.
    pub filtered: u64,
}

struct Counters {
    handled: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
}

/// A per-domain filesystem watcher reconciling external changes into the
/// node store.
pub struct SyncWatcher {
    domain: Domain,
    shutdown: Arc<AtomicBool>,
    consumer: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    // Held so the OS watch stays registered for the watcher's lifetime.
    _watcher: RecommendedWatcher,
}

impl SyncWatcher {
    /// Starts watching `watch_root` for the domain.
    ///
    /// `config.watcher_filters` is a regex allow-list over logical paths;
    /// empty means every path is reconciled. The event queue is bounded
    /// by `config.watcher_queue_depth`.
    pub fn spawn(
        store: Arc<NodeStore>,
        domain: Domain,
        watch_root: PathBuf,
        config: &FsConfig,
    ) -> FsResult<Self> {
        let filters = compile_filters(&config.watcher_filters)?;
        let watch_root = watch_root
            .canonicalize()
            .map_err(|e| FsError::backend(&domain, "/", e))?;

        let (tx, rx) = mpsc::sync_channel::<PathBuf>(config.watcher_queue_depth);
        let counters = Arc::new(Counters {
            handled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
        });

        let cb_domain = domain.clone();
        let cb_counters = Arc::clone(&counters);
        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    for path in event.paths {
                        match tx.try_send(path) {
                            Ok(()) => {}
                            Err(TrySendError::Full(path)) => {
                                cb_counters.dropped.fetch_add(1, Ordering::Relaxed);
                                warn!(
                                    "watcher queue full for {}; dropped event on {}",
                                    cb_domain,
                                    path.display()
                                );
                            }
                            Err(TrySendError::Disconnected(_)) => {}
                        }
                    }
                }
                Err(e) => warn!("watch error on {}: {}", cb_domain, e),
            },
        )
        .map_err(|e| FsError::backend(&domain, "/", e))?;
        watcher
            .watch(&watch_root, RecursiveMode::Recursive)
            .map_err(|e| FsError::backend(&domain, "/", e))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let consumer = {
            let shutdown = Arc::clone(&shutdown);
            let counters = Arc::clone(&counters);
            let domain = domain.clone();
            let root = watch_root.clone();
            std::thread::spawn(move || {
                consume(store, domain, root, filters, rx, shutdown, counters)
            })
        };

        info!("sync watcher started on {} ({})", domain, watch_root.display());
        Ok(Self {
            domain,
            shutdown,
            consumer: Some(consumer),
            counters,
            _watcher: watcher,
        })
    }

    /// Snapshot of event counters.
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            handled: self.counters.handled.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
        }
    }

    /// Stops the watcher and joins the consumer thread.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.consumer.take() {
            let _ = handle.join();
            debug!("sync watcher stopped on {}", self.domain);
        }
    }
}

impl Drop for SyncWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn compile_filters(patterns: &[String]) -> FsResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| FsError::Serialization {
                reason: format!("bad watcher filter {:?}: {}", p, e),
            })
        })
        .collect()
}

fn consume(
    store: Arc<NodeStore>,
    domain: Domain,
    root: PathBuf,
    filters: Vec<Regex>,
    rx: mpsc::Receiver<PathBuf>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let fs_path = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(path) => path,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let logical = match logical_path(&root, &fs_path) {
            Some(p) => p,
            None => continue,
        };
        if !filters.is_empty() && !filters.iter().any(|f| f.is_match(&logical)) {
            counters.filtered.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match reconcile(&store, &domain, &logical, &fs_path) {
            Ok(()) => {
                counters.handled.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(
                    "reconcile failed for {}:{}: {}; event skipped",
                    domain, logical, e
                );
            }
        }
    }
}

/// Maps a physical event path to a domain-logical path, or None for the
/// root itself and for paths outside the watched tree.
fn logical_path(root: &Path, fs_path: &Path) -> Option<String> {
    let rel = fs_path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    let mut logical = String::new();
    for component in rel.components() {
        logical.push('/');
        logical.push_str(component.as_os_str().to_str()?);
    }
    Some(logical)
}

/// Brings the store entry for one logical path in line with the actual
/// filesystem state.
fn reconcile(store: &NodeStore, domain: &Domain, logical: &str, fs_path: &Path) -> FsResult<()> {
    match std::fs::metadata(fs_path) {
        Ok(meta) if meta.is_dir() => {
            if !store.contains(domain, logical) {
                store.insert(Node::new_directory(domain.clone(), logical)?)?;
                debug!("reconciled new directory {}:{}", domain, logical);
            }
            Ok(())
        }
        Ok(meta) => {
            let len = meta.len();
            if store.contains(domain, logical) {
                store.update(domain, logical, |node| {
                    let attrs = node.file_attrs_mut()?;
                    if attrs.data_size != len {
                        attrs.data_size = len;
                        attrs.synced_size = len;
                        attrs.update_timestamp = Some(Timestamp::now());
                        debug!("reconciled size of {}:{} to {}", node.domain, node.path, len);
                    }
                    Ok(())
                })
            } else {
                let mut node = Node::new_file(domain.clone(), logical)?;
                {
                    let attrs = node.file_attrs_mut()?;
                    // Content observed on disk is by definition in sync.
                    attrs.state = NodeState::Synced;
                    attrs.data_size = len;
                    attrs.synced_size = len;
                    attrs.sync_timestamp = Some(Timestamp::now());
                }
                store.insert(node)?;
                debug!("reconciled new file {}:{} ({} bytes)", domain, logical, len);
                Ok(())
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if store.contains(domain, logical) {
                for node in store.subtree(domain, logical) {
                    store.remove(domain, &node.path)?;
                }
                debug!("reconciled removal of {}:{}", domain, logical);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_path_mapping() {
        let root = Path::new("/data/archive");
        assert_eq!(
            logical_path(root, Path::new("/data/archive/a/b.csv")),
            Some("/a/b.csv".to_string())
        );
        assert_eq!(logical_path(root, Path::new("/data/archive")), None);
        assert_eq!(logical_path(root, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn filters_reject_bad_regex() {
        assert!(compile_filters(&["[".to_string()]).is_err());
        assert_eq!(compile_filters(&[r"\.csv$".to_string()]).unwrap().len(), 1);
    }
}
