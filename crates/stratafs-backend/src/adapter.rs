//! The capability interface every storage backend implements.
//!
//! Writer/reader sessions are backend-agnostic and depend only on this
//! trait; the adapter variant is injected at open time. Adapters never
//! share mutable state with each other.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stratafs_meta::{BackendKind, FsError, FsResult, Node};

use crate::compression::{self, CompressionAlgorithm};
use crate::descriptor::PathDescriptor;

/// Append-only staging write channel.
///
/// The storage mechanism behind it is the adapter's choice: buffered
/// stream I/O for direct backends, a memory-mapped region with an
/// explicit write-offset cursor for the mapped variant.
pub trait WriteChannel: Send {
    /// Appends bytes at the current write position, returning the count
    /// written.
    fn append(&mut self, buf: &[u8]) -> FsResult<u64>;
    /// Makes all appended bytes visible to the filesystem, so a stat of
    /// the staging file reflects them.
    fn flush(&mut self) -> FsResult<()>;
}

/// Seekable staging read channel.
pub trait ReadChannel: std::io::Read + std::io::Seek + Send {}

impl<T: std::io::Read + std::io::Seek + Send> ReadChannel for T {}

/// Per-backend implementation of existence/size/open/upload/download.
pub trait BackendAdapter: Send + Sync {
    /// The backend technology variant.
    fn kind(&self) -> BackendKind;

    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Whether an object exists for the descriptor.
    fn exists(&self, desc: &PathDescriptor) -> FsResult<bool>;

    /// Stored size in bytes of the descriptor's object.
    fn size(&self, desc: &PathDescriptor) -> FsResult<u64>;

    /// The local staging path a session operates against for this
    /// descriptor. For local backends the staging file IS the final file.
    fn staging_path(&self, desc: &PathDescriptor) -> PathBuf;

    /// Opens a write channel on a local staging file. The session picks
    /// the location; the adapter picks the storage mechanism.
    /// `append=false` truncates any existing staged content.
    fn open_writer(&self, path: &Path, append: bool) -> FsResult<Box<dyn WriteChannel>>;

    /// Opens a read channel on a local staging file.
    fn open_reader(&self, path: &Path) -> FsResult<Box<dyn ReadChannel>>;

    /// Pushes the staged file to the backend, returning the stored size.
    /// A no-op (stat only) for backends whose staging file is final.
    fn upload(&self, staging: &Path, node: &Node) -> FsResult<u64>;

    /// Pulls the backend content into `dest` within `timeout`, returning
    /// the transferred size. A no-op (stat only) for local backends.
    fn download(&self, node: &Node, dest: &Path, timeout: Duration) -> FsResult<u64>;

    /// Removes the backend object (or directory) for the descriptor.
    fn delete(&self, desc: &PathDescriptor) -> FsResult<()>;

    /// Moves the backend object to a new logical path.
    fn rename(&self, desc: &PathDescriptor, to: &str) -> FsResult<()>;

    /// Copies the backend object to the destination descriptor.
    fn copy(&self, src: &PathDescriptor, dst: &PathDescriptor) -> FsResult<()>;

    /// Creates a directory for the descriptor where the backend has a
    /// physical notion of one.
    fn mkdir(&self, desc: &PathDescriptor) -> FsResult<()>;

    /// Whether in-place truncation of staged content is implemented.
    /// Adapters that return false fail `truncate` immediately with an
    /// unsupported-operation error; this is a documented per-adapter
    /// limitation, not a bug.
    fn supports_truncate(&self) -> bool;

    /// Truncates the staged content to `len` bytes.
    fn truncate(&self, desc: &PathDescriptor, len: u64) -> FsResult<()>;

    /// Compression applied to content stored on this backend.
    fn compression(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::zstd_default()
    }

    /// Compresses `src` into `dst` with this backend's algorithm.
    fn compress(&self, src: &Path, dst: &Path) -> FsResult<u64> {
        compression::compress_file(src, dst, self.compression())
    }

    /// Reverses this backend's compression from `src` into `dst`.
    fn decompress(&self, src: &Path, dst: &Path) -> FsResult<u64> {
        compression::decompress_file(src, dst, self.compression())
    }
}

/// Wraps an I/O failure with the descriptor's path context.
pub(crate) fn backend_err(desc: &PathDescriptor, source: std::io::Error) -> FsError {
    FsError::Backend {
        domain: desc.domain.clone(),
        path: desc.path.clone(),
        source,
    }
}

/// Maps a descriptor to its physical path under a local root:
/// `<root>/<domain>/<logical path>`.
pub(crate) fn physical_path(root: &Path, desc: &PathDescriptor) -> PathBuf {
    let mut path = root.join(desc.domain.as_str());
    for segment in desc.path.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// Buffered file-backed write channel used by the direct and remote
/// adapters.
pub struct FileWriteChannel {
    writer: BufWriter<File>,
}

impl FileWriteChannel {
    /// Opens (creating if needed) the file at `path` for appending, or
    /// truncates it first when `append` is false.
    pub fn open(path: &Path, append: bool) -> std::io::Result<Self> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true);
        if append {
            opts.append(true);
        } else {
            opts.truncate(true);
        }
        Ok(Self {
            writer: BufWriter::new(opts.open(path)?),
        })
    }
}

impl WriteChannel for FileWriteChannel {
    fn append(&mut self, buf: &[u8]) -> FsResult<u64> {
        self.writer.write_all(buf)?;
        Ok(buf.len() as u64)
    }

    fn flush(&mut self) -> FsResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
