//! Common fixtures for engine integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use stratafs_backend::{
    BackendAdapter, LocalAdapter, MappedAdapter, MemoryObjectStore, ObjectStore, RemoteAdapter,
};
use stratafs_engine::StrataFs;
use stratafs_meta::{BackendKind, Domain, FsConfig};

/// A filesystem with one registered domain on a temp-dir backend.
pub struct Fixture {
    pub fs: StrataFs,
    pub domain: Domain,
    pub object_store: Option<Arc<MemoryObjectStore>>,
    // Keeps the backing directory alive for the fixture's lifetime.
    _dir: tempfile::TempDir,
}

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fast timeouts so failure-path tests finish quickly.
pub fn test_config(root: &std::path::Path, backend: BackendKind) -> FsConfig {
    FsConfig {
        backend,
        root: root.to_path_buf(),
        lock_timeout_ms: 200,
        download_timeout_ms: 2_000,
        ..FsConfig::default()
    }
}

pub fn local_fixture() -> Fixture {
    local_fixture_tuned(|_| {})
}

/// Local fixture with config adjustments (thresholds, filters).
pub fn local_fixture_tuned(tune: impl FnOnce(&mut FsConfig)) -> Fixture {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), BackendKind::Local);
    tune(&mut config);
    let fs = StrataFs::new(config);
    let domain = Domain::new("d");
    let adapter: Arc<dyn BackendAdapter> = Arc::new(LocalAdapter::new(dir.path()).unwrap());
    fs.register_domain(domain.clone(), adapter).unwrap();
    Fixture {
        fs,
        domain,
        object_store: None,
        _dir: dir,
    }
}

pub fn mapped_fixture() -> Fixture {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), BackendKind::Mapped);
    let fs = StrataFs::new(config);
    let domain = Domain::new("d");
    let adapter: Arc<dyn BackendAdapter> = Arc::new(MappedAdapter::new(dir.path()).unwrap());
    fs.register_domain(domain.clone(), adapter).unwrap();
    Fixture {
        fs,
        domain,
        object_store: None,
        _dir: dir,
    }
}

pub fn remote_fixture(compress_default: bool) -> Fixture {
    remote_fixture_tuned(|config| config.compress_default = compress_default)
}

/// Remote fixture with config adjustments.
pub fn remote_fixture_tuned(tune: impl FnOnce(&mut FsConfig)) -> Fixture {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), BackendKind::Remote);
    tune(&mut config);
    let fs = StrataFs::new(config);
    let domain = Domain::new("d");
    let object_store = Arc::new(MemoryObjectStore::new());
    let adapter: Arc<dyn BackendAdapter> = Arc::new(
        RemoteAdapter::new(
            Arc::clone(&object_store) as Arc<dyn ObjectStore>,
            &dir.path().join("staging"),
        )
        .unwrap(),
    );
    fs.register_domain(domain.clone(), adapter).unwrap();
    Fixture {
        fs,
        domain,
        object_store: Some(object_store),
        _dir: dir,
    }
}

/// Polls `check` until it returns true or the deadline passes.
pub fn wait_for(check: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    check()
}

/// Writes `content` to a fresh file node and closes the session.
pub fn put_file(fixture: &Fixture, path: &str, content: &[u8]) {
    fixture.fs.create(&fixture.domain, path).unwrap();
    let mut writer = fixture.fs.writer(&fixture.domain, path, false).unwrap();
    writer.write(content).unwrap();
    writer.close().unwrap();
}

/// Reads a file node's full content through a reader session.
pub fn get_file(fixture: &Fixture, path: &str) -> Vec<u8> {
    let mut reader = fixture.fs.reader(&fixture.domain, path).unwrap();
    reader.read_to_end().unwrap()
}
