//! Memory-mapped local adapter.
//!
//! Staging uses a mapped byte region with explicit read/write cursors
//! instead of stream I/O, trading stream-API simplicity for zero-copy
//! throughput. In-place truncation is intentionally unsupported: the
//! write region grows in mapped chunks and shrinking a live mapping is
//! not safe on every platform. This is a documented limitation of the
//! variant, not a bug.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use memmap2::{Mmap, MmapMut};
use tracing::debug;

use stratafs_meta::{BackendKind, FsError, FsResult, Node};

use crate::adapter::{backend_err, physical_path, BackendAdapter, ReadChannel, WriteChannel};
use crate::descriptor::PathDescriptor;

/// How much mapped capacity is added at a time when the region grows.
pub const GROWTH_CHUNK: u64 = 64 * 1024;

/// Append-only write region over a memory-mapped file.
///
/// The file is padded to mapped-chunk capacity while the map is live;
/// `flush` unmaps and trims the file to the logical write offset so a
/// stat of the staging file is exact.
pub struct MappedWriteRegion {
    file: File,
    mmap: Option<MmapMut>,
    write_offset: u64,
    capacity: u64,
}

impl MappedWriteRegion {
    /// Opens a write region on `path`, appending after existing content
    /// or truncating first.
    pub fn open(path: &Path, append: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let write_offset = if append {
            len
        } else {
            file.set_len(0)?;
            0
        };
        Ok(Self {
            file,
            mmap: None,
            write_offset,
            capacity: if append { len } else { 0 },
        })
    }

    /// Current logical end of data (the write cursor).
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    fn ensure_capacity(&mut self, needed: u64) -> std::io::Result<()> {
        if needed <= self.capacity && self.mmap.is_some() {
            return Ok(());
        }
        if needed > self.capacity {
            // Unmap before resizing the underlying file.
            self.mmap = None;
            let new_cap = needed.div_ceil(GROWTH_CHUNK) * GROWTH_CHUNK;
            self.file.set_len(new_cap)?;
            self.capacity = new_cap;
        }
        if self.mmap.is_none() && self.capacity > 0 {
            self.mmap = Some(unsafe { MmapMut::map_mut(&self.file)? });
        }
        Ok(())
    }
}

impl WriteChannel for MappedWriteRegion {
    fn append(&mut self, buf: &[u8]) -> FsResult<u64> {
        if buf.is_empty() {
            return Ok(0);
        }
        let needed = self.write_offset + buf.len() as u64;
        self.ensure_capacity(needed)?;
        let mmap = self.mmap.as_mut().ok_or_else(|| {
            FsError::consistency("mapped write region lost its mapping".to_string())
        })?;
        let start = self.write_offset as usize;
        mmap[start..start + buf.len()].copy_from_slice(buf);
        self.write_offset = needed;
        Ok(buf.len() as u64)
    }

    fn flush(&mut self) -> FsResult<()> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush()?;
        }
        // Trim chunk padding so stat reports the logical length.
        self.file.set_len(self.write_offset)?;
        self.capacity = self.write_offset;
        Ok(())
    }
}

impl Drop for MappedWriteRegion {
    fn drop(&mut self) {
        if self.mmap.is_some() {
            let _ = WriteChannel::flush(self);
        }
    }
}

/// Read-only mapped region with an explicit read cursor.
pub struct MappedReadRegion {
    mmap: Option<Mmap>,
    read_offset: u64,
}

impl MappedReadRegion {
    /// Maps `path` read-only. Zero-length files are represented without a
    /// mapping (mapping an empty file is not portable).
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self {
            mmap,
            read_offset: 0,
        })
    }

    fn len(&self) -> u64 {
        self.mmap.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }
}

impl Read for MappedReadRegion {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = self.len();
        if self.read_offset >= len {
            return Ok(0);
        }
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(0);
        };
        let start = self.read_offset as usize;
        let n = buf.len().min((len - self.read_offset) as usize);
        buf[..n].copy_from_slice(&mmap[start..start + n]);
        self.read_offset += n as u64;
        Ok(n)
    }
}

impl Seek for MappedReadRegion {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let len = self.len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.read_offset as i64 + n,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of mapped region",
            ));
        }
        self.read_offset = target as u64;
        Ok(self.read_offset)
    }
}

/// Adapter for domains backed by memory-mapped local files.
///
/// Like the direct local variant, content is stored uncompressed: the
/// staging file is the final file.
pub struct MappedAdapter {
    root: PathBuf,
}

impl MappedAdapter {
    /// Creates an adapter rooted at `root`.
    pub fn new(root: &Path) -> FsResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn physical(&self, desc: &PathDescriptor) -> PathBuf {
        physical_path(&self.root, desc)
    }
}

impl BackendAdapter for MappedAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Mapped
    }

    fn name(&self) -> &'static str {
        "mapped"
    }

    fn exists(&self, desc: &PathDescriptor) -> FsResult<bool> {
        Ok(self.physical(desc).exists())
    }

    fn size(&self, desc: &PathDescriptor) -> FsResult<u64> {
        let meta = std::fs::metadata(self.physical(desc)).map_err(|e| backend_err(desc, e))?;
        Ok(meta.len())
    }

    fn staging_path(&self, desc: &PathDescriptor) -> PathBuf {
        self.physical(desc)
    }

    fn open_writer(&self, path: &Path, append: bool) -> FsResult<Box<dyn WriteChannel>> {
        let region = MappedWriteRegion::open(path, append)?;
        debug!(
            "mapped write region opened on {} at offset {}",
            path.display(),
            region.write_offset()
        );
        Ok(Box::new(region))
    }

    fn open_reader(&self, path: &Path) -> FsResult<Box<dyn ReadChannel>> {
        let region = MappedReadRegion::open(path)?;
        Ok(Box::new(region))
    }

    fn upload(&self, staging: &Path, _node: &Node) -> FsResult<u64> {
        Ok(std::fs::metadata(staging)?.len())
    }

    fn download(&self, _node: &Node, dest: &Path, _timeout: Duration) -> FsResult<u64> {
        Ok(std::fs::metadata(dest)?.len())
    }

    fn delete(&self, desc: &PathDescriptor) -> FsResult<()> {
        let path = self.physical(desc);
        let result = if desc.directory {
            std::fs::remove_dir(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend_err(desc, e)),
        }
    }

    fn rename(&self, desc: &PathDescriptor, to: &str) -> FsResult<()> {
        let from = self.physical(desc);
        let to_desc = PathDescriptor::from_parts(desc.domain.clone(), to, desc.uuid, desc.directory);
        let to_path = self.physical(&to_desc);
        if let Some(parent) = to_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| backend_err(desc, e))?;
        }
        std::fs::rename(&from, &to_path).map_err(|e| backend_err(desc, e))
    }

    fn copy(&self, src: &PathDescriptor, dst: &PathDescriptor) -> FsResult<()> {
        let to = self.physical(dst);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| backend_err(src, e))?;
        }
        std::fs::copy(self.physical(src), &to).map_err(|e| backend_err(src, e))?;
        Ok(())
    }

    fn mkdir(&self, desc: &PathDescriptor) -> FsResult<()> {
        std::fs::create_dir_all(self.physical(desc)).map_err(|e| backend_err(desc, e))
    }

    fn supports_truncate(&self) -> bool {
        false
    }

    fn truncate(&self, _desc: &PathDescriptor, _len: u64) -> FsResult<()> {
        Err(FsError::Unsupported {
            backend: "mapped",
            op: "truncate",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_meta::Domain;
    use uuid::Uuid;

    fn setup() -> (tempfile::TempDir, MappedAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = MappedAdapter::new(dir.path()).unwrap();
        (dir, adapter)
    }

    fn desc(path: &str) -> PathDescriptor {
        PathDescriptor::from_parts(Domain::new("d"), path, Uuid::new_v4(), false)
    }

    #[test]
    fn test_region_append_grows_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let mut region = MappedWriteRegion::open(&path, false).unwrap();
        let payload = vec![7u8; (GROWTH_CHUNK + 100) as usize];
        region.append(&payload).unwrap();
        assert_eq!(region.write_offset(), payload.len() as u64);
        WriteChannel::flush(&mut region).unwrap();
        drop(region);

        // Chunk padding trimmed on flush
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            payload.len() as u64
        );
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[test]
    fn test_region_append_mode_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        std::fs::write(&path, b"abc").unwrap();

        let mut region = MappedWriteRegion::open(&path, true).unwrap();
        assert_eq!(region.write_offset(), 3);
        region.append(b"def").unwrap();
        WriteChannel::flush(&mut region).unwrap();
        drop(region);

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_read_region_cursor_and_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut region = MappedReadRegion::open(&path).unwrap();
        let mut buf = [0u8; 4];
        region.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"0123");

        region.seek(SeekFrom::End(-2)).unwrap();
        let mut tail = Vec::new();
        region.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"89");

        region.seek(SeekFrom::Start(0)).unwrap();
        let mut all = Vec::new();
        region.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"0123456789");
    }

    #[test]
    fn test_read_region_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let mut region = MappedReadRegion::open(&path).unwrap();
        let mut buf = Vec::new();
        region.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_adapter_roundtrip_via_channels() {
        let (_dir, adapter) = setup();
        let d = desc("/m.bin");
        adapter
            .mkdir(&PathDescriptor::from_parts(
                Domain::new("d"),
                "/",
                Uuid::new_v4(),
                true,
            ))
            .unwrap();

        let staging = adapter.staging_path(&d);
        let mut w = adapter.open_writer(&staging, false).unwrap();
        w.append(b"mapped bytes").unwrap();
        w.flush().unwrap();
        drop(w);

        assert_eq!(adapter.size(&d).unwrap(), 12);

        let mut r = adapter.open_reader(&staging).unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"mapped bytes");
    }

    #[test]
    fn test_truncate_unsupported() {
        let (_dir, adapter) = setup();
        assert!(!adapter.supports_truncate());
        match adapter.truncate(&desc("/x"), 0) {
            Err(FsError::Unsupported { backend, op }) => {
                assert_eq!(backend, "mapped");
                assert_eq!(op, "truncate");
            }
            other => panic!("expected Unsupported, got {:?}", other),
        }
    }
}
