//! Seekable reader session over committed content.
//!
//! Opening a reader materializes the node's synced content into the
//! local staging file (a download for remote backends, a no-op for local
//! ones) and then serves reads from it through the adapter's channel.
//! A read that ends before `data_size` bytes are reachable is a
//! consistency violation, never silently an EOF.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use stratafs_backend::{BackendAdapter, PathDescriptor, ReadChannel};
use stratafs_meta::{
    normalize_path, BackendKind, Domain, FsConfig, FsError, FsResult, NodeState, NodeStore,
};

/// A read-only session over one file node's committed content.
pub struct ReaderSession {
    channel: Box<dyn ReadChannel>,
    domain: Domain,
    path: String,
    position: u64,
    data_size: u64,
}

impl ReaderSession {
    /// Opens a reader on a synced file node, fetching remote content into
    /// staging first when it is not already present and current.
    pub fn open(
        store: Arc<NodeStore>,
        adapter: Arc<dyn BackendAdapter>,
        config: &FsConfig,
        domain: Domain,
        path: &str,
    ) -> FsResult<Self> {
        let path = normalize_path(path)?;
        let node = store
            .get(&domain, &path)
            .ok_or_else(|| FsError::NodeNotFound {
                domain: domain.clone(),
                path: path.clone(),
            })?;
        let attrs = node.file_attrs()?;
        if attrs.state != NodeState::Synced {
            return Err(FsError::consistency(format!(
                "node {}:{} is {} and cannot be read; only synced content is readable",
                domain, path, attrs.state
            )));
        }

        let desc = PathDescriptor::for_node(&node);
        let staging = adapter.staging_path(&desc);
        let data_size = attrs.data_size;

        let current = std::fs::metadata(&staging).map(|m| m.len()).ok() == Some(data_size);
        if !current {
            if adapter.kind() == BackendKind::Remote {
                materialize(&*adapter, &node, &staging, attrs.compressed, config)?;
            }
            let staged = std::fs::metadata(&staging).map(|m| m.len()).map_err(|e| {
                FsError::Backend {
                    domain: domain.clone(),
                    path: path.clone(),
                    source: e,
                }
            })?;
            if staged != data_size {
                return Err(FsError::consistency(format!(
                    "staging size {} disagrees with recorded data size {} for {}:{}",
                    staged, data_size, domain, path
                )));
            }
        }

        let channel = adapter.open_reader(&staging)?;
        debug!(
            "reader session opened on {}:{} ({} bytes)",
            domain, path, data_size
        );
        Ok(Self {
            channel,
            domain,
            path,
            position: 0,
            data_size,
        })
    }

    /// Reads into `buf` from the current position, returning the count.
    ///
    /// Returns zero only at the true end of content; running out of bytes
    /// before `data_size` is a consistency error.
    pub fn read(&mut self, buf: &mut [u8]) -> FsResult<u64> {
        if buf.is_empty() || self.position >= self.data_size {
            return Ok(0);
        }
        let n = self.channel.read(buf)?;
        if n == 0 {
            return Err(FsError::consistency(format!(
                "short read on {}:{}: {} of {} bytes reachable",
                self.domain, self.path, self.position, self.data_size
            )));
        }
        self.position += n as u64;
        Ok(n as u64)
    }

    /// Reads the entire remaining content.
    pub fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.available() as usize);
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n as usize]);
        }
        Ok(out)
    }

    /// Moves the read position to an absolute offset.
    pub fn seek(&mut self, offset: u64) -> FsResult<u64> {
        let pos = self.channel.seek(SeekFrom::Start(offset))?;
        self.position = pos;
        Ok(pos)
    }

    /// Advances the read position by `n` bytes without transferring them.
    pub fn skip(&mut self, n: u64) -> FsResult<u64> {
        self.seek(self.position + n)
    }

    /// Bytes between the current position and the end of content.
    pub fn available(&self) -> u64 {
        self.data_size.saturating_sub(self.position)
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total committed content size.
    pub fn len(&self) -> u64 {
        self.data_size
    }

    /// True for zero-length content.
    pub fn is_empty(&self) -> bool {
        self.data_size == 0
    }
}

impl std::io::Read for ReaderSession {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        ReaderSession::read(self, buf)
            .map(|n| n as usize)
            .map_err(std::io::Error::other)
    }
}

impl std::io::Seek for ReaderSession {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new = self.channel.seek(pos)?;
        self.position = new;
        Ok(new)
    }
}

/// Fetches remote content into the staging file, decompressing when the
/// node is stored compressed. The final rename is atomic so a concurrent
/// open never sees a half-written staging file.
fn materialize(
    adapter: &dyn BackendAdapter,
    node: &stratafs_meta::Node,
    staging: &Path,
    compressed: bool,
    config: &FsConfig,
) -> FsResult<()> {
    if let Some(parent) = staging.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if compressed {
        let packed = staging.with_extension("fetch");
        adapter.download(node, &packed, config.download_timeout())?;
        let part = staging.with_extension("part");
        adapter.decompress(&packed, &part)?;
        std::fs::remove_file(&packed)?;
        std::fs::rename(&part, staging)?;
    } else {
        let part = staging.with_extension("part");
        adapter.download(node, &part, config.download_timeout())?;
        std::fs::rename(&part, staging)?;
    }
    Ok(())
}
