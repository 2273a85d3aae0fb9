//! Direct local-filesystem adapter.
//!
//! The staging file IS the final file: upload and download are stat-only
//! no-ops, and truncation is a native file operation.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use stratafs_meta::{BackendKind, FsResult, Node};

use crate::adapter::{
    backend_err, physical_path, BackendAdapter, FileWriteChannel, ReadChannel, WriteChannel,
};
use crate::descriptor::PathDescriptor;

/// Adapter for domains backed by a plain local directory tree.
///
/// Content is stored uncompressed regardless of the node's compressed
/// flag: the staging file is the final file, so there is no separate
/// stored representation to compress.
pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    /// Creates an adapter rooted at `root`; domain trees live beneath it.
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

impl BackendAdapter for LocalAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn name(&self) -> &'static str {
        "local"
    }

    fn exists(&self, desc: &PathDescriptor) -> FsResult<bool> {
        Ok(self.physical(desc).exists())
    }

    fn size(&self, desc: &PathDescriptor) -> FsResult<u64> {
        let path = self.physical(desc);
        let meta = std::fs::metadata(&path).map_err(|e| backend_err(desc, e))?;
        Ok(meta.len())
    }

    fn staging_path(&self, desc: &PathDescriptor) -> PathBuf {
        self.physical(desc)
    }

    fn open_writer(&self, path: &Path, append: bool) -> FsResult<Box<dyn WriteChannel>> {
        let chan = FileWriteChannel::open(path, append)?;
        Ok(Box::new(chan))
    }

    fn open_reader(&self, path: &Path) -> FsResult<Box<dyn ReadChannel>> {
        let file = File::open(path)?;
        Ok(Box::new(file))
    }

    fn upload(&self, staging: &Path, _node: &Node) -> FsResult<u64> {
        // Staging file is the final file; acknowledge with its size.
        Ok(std::fs::metadata(staging)?.len())
    }

    fn download(&self, node: &Node, dest: &Path, _timeout: Duration) -> FsResult<u64> {
        debug_assert_eq!(dest, self.staging_path(&PathDescriptor::for_node(node)));
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
            Ok(()) => {
                debug!("deleted {}", path.display());
                Ok(())
            }
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
        let from = self.physical(src);
        let to = self.physical(dst);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| backend_err(src, e))?;
        }
        std::fs::copy(&from, &to).map_err(|e| backend_err(src, e))?;
        Ok(())
    }

    fn mkdir(&self, desc: &PathDescriptor) -> FsResult<()> {
        std::fs::create_dir_all(self.physical(desc)).map_err(|e| backend_err(desc, e))
    }

    fn supports_truncate(&self) -> bool {
        true
    }

    fn truncate(&self, desc: &PathDescriptor, len: u64) -> FsResult<()> {
        let path = self.physical(desc);
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| backend_err(desc, e))?;
        file.set_len(len).map_err(|e| backend_err(desc, e))
    }
}
