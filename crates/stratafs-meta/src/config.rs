//! Filesystem configuration surface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::types::BackendKind;

/// Configuration for one filesystem instance.
///
/// Thresholds are expressed in milliseconds/bytes in the on-disk form;
/// accessors convert to `Duration` for callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Which backend technology newly registered domains use.
    #[serde(default)]
    pub backend: BackendKind,
    /// Root directory for local backends and the staging area.
    pub root: PathBuf,
    /// Writer sessions push to the backend when this much time has passed
    /// since the last remote push, at the next flush.
    #[serde(default = "default_flush_interval_ms")]
    pub writer_flush_interval_ms: u64,
    /// Writer sessions push to the backend when this many bytes have been
    /// written since the last remote push, at the next flush.
    #[serde(default = "default_flush_size")]
    pub writer_flush_size: u64,
    /// How long a reader waits for a remote download.
    #[serde(default = "default_download_timeout_ms")]
    pub download_timeout_ms: u64,
    /// How long lock acquisition blocks before failing.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Whether new file nodes are compressed on the backend by default.
    #[serde(default)]
    pub compress_default: bool,
    /// Zstd level used when compression applies.
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// Regex allow-list for the sync watcher; empty means all paths.
    #[serde(default)]
    pub watcher_filters: Vec<String>,
    /// Bound of each watched domain's event queue.
    #[serde(default = "default_watcher_queue_depth")]
    pub watcher_queue_depth: usize,
}

fn default_flush_interval_ms() -> u64 {
    30_000
}

fn default_flush_size() -> u64 {
    8 * 1024 * 1024
}

fn default_download_timeout_ms() -> u64 {
    60_000
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_compression_level() -> i32 {
    3
}

fn default_watcher_queue_depth() -> usize {
    1024
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            root: std::env::temp_dir().join("stratafs"),
            writer_flush_interval_ms: default_flush_interval_ms(),
            writer_flush_size: default_flush_size(),
            download_timeout_ms: default_download_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            compress_default: false,
            compression_level: default_compression_level(),
            watcher_filters: Vec::new(),
            watcher_queue_depth: default_watcher_queue_depth(),
        }
    }
}

impl FsConfig {
    /// Loads configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> FsResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(raw: &str) -> FsResult<Self> {
        serde_json::from_str(raw).map_err(|e| FsError::Serialization {
            reason: format!("config parse failure: {}", e),
        })
    }

    /// Flush-interval threshold as a duration.
    pub fn writer_flush_interval(&self) -> Duration {
        Duration::from_millis(self.writer_flush_interval_ms)
    }

    /// Download timeout as a duration.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    /// Lock acquisition timeout as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = FsConfig::default();
        assert!(cfg.writer_flush_size > 0);
        assert!(cfg.writer_flush_interval() > Duration::ZERO);
        assert!(cfg.lock_timeout() > Duration::ZERO);
        assert_eq!(cfg.backend, BackendKind::Local);
        assert!(!cfg.compress_default);
    }

    #[test]
    fn test_parse_minimal_json() {
        let cfg = FsConfig::from_json(r#"{"root": "/var/lib/strata"}"#).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/var/lib/strata"));
        assert_eq!(cfg.writer_flush_size, default_flush_size());
    }

    #[test]
    fn test_parse_full_json() {
        let cfg = FsConfig::from_json(
            r#"{
                "backend": "remote",
                "root": "/srv/strata",
                "writer_flush_interval_ms": 5000,
                "writer_flush_size": 1048576,
                "download_timeout_ms": 2000,
                "lock_timeout_ms": 500,
                "compress_default": true,
                "compression_level": 9,
                "watcher_filters": ["\\.csv$"],
                "watcher_queue_depth": 64
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::Remote);
        assert_eq!(cfg.writer_flush_interval(), Duration::from_secs(5));
        assert_eq!(cfg.writer_flush_size, 1_048_576);
        assert_eq!(cfg.download_timeout(), Duration::from_secs(2));
        assert!(cfg.compress_default);
        assert_eq!(cfg.watcher_filters.len(), 1);
        assert_eq!(cfg.watcher_queue_depth, 64);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.json");
        std::fs::write(&path, r#"{"root": "/srv/strata", "lock_timeout_ms": 250}"#).unwrap();

        let cfg = FsConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/srv/strata"));
        assert_eq!(cfg.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_garbage_fails_typed() {
        assert!(matches!(
            FsConfig::from_json("not json"),
            Err(FsError::Serialization { .. })
        ));
    }
}
