//! Remote object-store adapter.
//!
//! The staging file is a true temp copy; upload and download move bytes
//! between it and an object store reached through the [`ObjectStore`]
//! capability. Objects are keyed by node uuid, so renames are
//! metadata-only. Compression is applied by the session before upload
//! and reversed after download.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use stratafs_meta::{BackendKind, FsResult, Node};

use crate::adapter::{backend_err, BackendAdapter, FileWriteChannel, ReadChannel, WriteChannel};
use crate::compression::CompressionAlgorithm;
use crate::descriptor::PathDescriptor;
use crate::staging::StagingArea;

/// Capability interface for object-store transfer (S3, Azure Blob, SFTP
/// host, ...). Implementations are cheap to share behind an `Arc`.
pub trait ObjectStore: Send + Sync {
    /// Stores an object under the key, replacing any previous content.
    fn put(&self, key: &str, data: Vec<u8>) -> std::io::Result<()>;
    /// Fetches an object, or `None` if the key is absent.
    fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>>;
    /// Removes an object; absent keys are not an error.
    fn delete(&self, key: &str) -> std::io::Result<()>;
    /// Whether an object exists under the key.
    fn exists(&self, key: &str) -> std::io::Result<bool>;
    /// Stored size of an object, or `None` if absent.
    fn stat(&self, key: &str) -> std::io::Result<Option<u64>>;
    /// All keys under a prefix.
    fn list(&self, prefix: &str) -> std::io::Result<Vec<String>>;
}

/// Operation counters for the in-memory object store.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStoreStats {
    /// Number of put operations.
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of delete operations.
    pub deletes: u64,
    /// Number of exists/stat checks.
    pub stat_checks: u64,
    /// Number of list operations.
    pub list_calls: u64,
    /// Total bytes currently stored.
    pub total_bytes_stored: u64,
}

/// In-memory object store used for tests and single-process deployments.
///
/// Supports injectable transfer latency and one-shot put/get failures so
/// timeout and error paths can be exercised deterministically.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    stats: Mutex<MemoryObjectStoreStats>,
    latency: Mutex<Option<Duration>>,
    fail_next: AtomicBool,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects a fixed delay into every subsequent transfer.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Makes the next put or get fail with a connection error.
    pub fn fail_next_operation(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Snapshot of operation counters.
    pub fn stats(&self) -> MemoryObjectStoreStats {
        self.stats.lock().clone()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    fn simulate(&self) -> std::io::Result<()> {
        if let Some(latency) = *self.latency.lock() {
            std::thread::sleep(latency);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected transfer failure",
            ));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, data: Vec<u8>) -> std::io::Result<()> {
        self.simulate()?;
        let bytes = data.len() as u64;
        let previous = self.objects.lock().insert(key.to_string(), data);
        let mut stats = self.stats.lock();
        stats.puts += 1;
        stats.total_bytes_stored = stats
            .total_bytes_stored
            .saturating_sub(previous.map(|p| p.len() as u64).unwrap_or(0))
            .saturating_add(bytes);
        debug!("object put: key={} bytes={}", key, bytes);
        Ok(())
    }

    fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        self.simulate()?;
        let result = self.objects.lock().get(key).cloned();
        self.stats.lock().gets += 1;
        debug!("object get: key={} hit={}", key, result.is_some());
        Ok(result)
    }

    fn delete(&self, key: &str) -> std::io::Result<()> {
        let removed = self.objects.lock().remove(key);
        let mut stats = self.stats.lock();
        stats.deletes += 1;
        stats.total_bytes_stored = stats
            .total_bytes_stored
            .saturating_sub(removed.map(|d| d.len() as u64).unwrap_or(0));
        Ok(())
    }

    fn exists(&self, key: &str) -> std::io::Result<bool> {
        self.stats.lock().stat_checks += 1;
        Ok(self.objects.lock().contains_key(key))
    }

    fn stat(&self, key: &str) -> std::io::Result<Option<u64>> {
        self.stats.lock().stat_checks += 1;
        Ok(self.objects.lock().get(key).map(|d| d.len() as u64))
    }

    fn list(&self, prefix: &str) -> std::io::Result<Vec<String>> {
        self.stats.lock().list_calls += 1;
        Ok(self
            .objects
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Adapter for domains backed by remote object storage.
pub struct RemoteAdapter {
    store: Arc<dyn ObjectStore>,
    staging: StagingArea,
    container: Option<String>,
    compression: CompressionAlgorithm,
}

impl RemoteAdapter {
    /// Creates an adapter transferring through `store`, staging under
    /// `staging_root`.
    pub fn new(store: Arc<dyn ObjectStore>, staging_root: &Path) -> FsResult<Self> {
        Ok(Self {
            store,
            staging: StagingArea::open(staging_root)?,
            container: None,
            compression: CompressionAlgorithm::zstd_default(),
        })
    }

    /// Qualifies object keys with a container/bucket name.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Overrides the compression algorithm used for compressed nodes.
    pub fn with_compression(mut self, algo: CompressionAlgorithm) -> Self {
        self.compression = algo;
        self
    }

    fn object_key(&self, desc: &PathDescriptor) -> String {
        let container = desc
            .container
            .as_deref()
            .or(self.container.as_deref());
        match container {
            Some(c) => format!("{}/{}/{}", c, desc.domain, desc.uuid),
            None => format!("{}/{}", desc.domain, desc.uuid),
        }
    }
}

impl BackendAdapter for RemoteAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn name(&self) -> &'static str {
        "remote"
    }

    fn exists(&self, desc: &PathDescriptor) -> FsResult<bool> {
        if desc.directory {
            // Object stores have no physical directories.
            return Ok(true);
        }
        self.store
            .exists(&self.object_key(desc))
            .map_err(|e| backend_err(desc, e))
    }

    fn size(&self, desc: &PathDescriptor) -> FsResult<u64> {
        let key = self.object_key(desc);
        match self.store.stat(&key).map_err(|e| backend_err(desc, e))? {
            Some(len) => Ok(len),
            None => Err(backend_err(
                desc,
                std::io::Error::new(std::io::ErrorKind::NotFound, "object absent"),
            )),
        }
    }

    fn staging_path(&self, desc: &PathDescriptor) -> PathBuf {
        self.staging.path_for(&desc.uuid)
    }

    fn open_writer(&self, path: &Path, append: bool) -> FsResult<Box<dyn WriteChannel>> {
        let chan = FileWriteChannel::open(path, append)?;
        Ok(Box::new(chan))
    }

    fn open_reader(&self, path: &Path) -> FsResult<Box<dyn ReadChannel>> {
        let file = std::fs::File::open(path)?;
        Ok(Box::new(file))
    }

    fn upload(&self, staging: &Path, node: &Node) -> FsResult<u64> {
        let desc = PathDescriptor::for_node(node);
        let data = std::fs::read(staging).map_err(|e| backend_err(&desc, e))?;
        let len = data.len() as u64;
        self.store
            .put(&self.object_key(&desc), data)
            .map_err(|e| backend_err(&desc, e))?;
        debug!(
            "uploaded {}:{} ({} bytes)",
            node.domain, node.path, len
        );
        Ok(len)
    }

    fn download(&self, node: &Node, dest: &Path, timeout: Duration) -> FsResult<u64> {
        let desc = PathDescriptor::for_node(node);
        let key = self.object_key(&desc);
        let store = Arc::clone(&self.store);

        // The transfer runs on a worker so the caller's wait is bounded;
        // a late result is dropped with the channel.
        let (tx, rx) = mpsc::channel();
        let worker_key = key.clone();
        std::thread::spawn(move || {
            let _ = tx.send(store.get(&worker_key));
        });

        let fetched = match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|e| backend_err(&desc, e))?,
            Err(_) => {
                warn!("download of {} timed out after {:?}", key, timeout);
                return Err(backend_err(
                    &desc,
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("download exceeded {:?}", timeout),
                    ),
                ));
            }
        };

        let data = fetched.ok_or_else(|| {
            backend_err(
                &desc,
                std::io::Error::new(std::io::ErrorKind::NotFound, "object absent"),
            )
        })?;
        std::fs::write(dest, &data).map_err(|e| backend_err(&desc, e))?;
        Ok(data.len() as u64)
    }

    fn delete(&self, desc: &PathDescriptor) -> FsResult<()> {
        if desc.directory {
            return Ok(());
        }
        self.store
            .delete(&self.object_key(desc))
            .map_err(|e| backend_err(desc, e))?;
        self.staging.remove(&desc.uuid)
    }

    fn rename(&self, _desc: &PathDescriptor, _to: &str) -> FsResult<()> {
        // Objects are keyed by uuid; a rename is metadata-only.
        Ok(())
    }

    fn copy(&self, src: &PathDescriptor, dst: &PathDescriptor) -> FsResult<()> {
        let data = self
            .store
            .get(&self.object_key(src))
            .map_err(|e| backend_err(src, e))?
            .ok_or_else(|| {
                backend_err(
                    src,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "object absent"),
                )
            })?;
        self.store
            .put(&self.object_key(dst), data)
            .map_err(|e| backend_err(dst, e))
    }

    fn mkdir(&self, _desc: &PathDescriptor) -> FsResult<()> {
        // No physical directories in an object store.
        Ok(())
    }

    fn supports_truncate(&self) -> bool {
        true
    }

    fn truncate(&self, desc: &PathDescriptor, len: u64) -> FsResult<()> {
        let path = self.staging_path(desc);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| backend_err(desc, e))?;
        file.set_len(len).map_err(|e| backend_err(desc, e))
    }

    fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }
}
