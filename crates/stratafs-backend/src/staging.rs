//! Process-local staging area for writer/reader sessions.
//!
//! Staging files are named by node uuid, so concurrent sessions on
//! different paths never contend here. The area is process-local; it is
//! not shared across cluster members.

use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use stratafs_meta::FsResult;

/// Manages the local temp directory staged content lives in.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Opens (creating if needed) a staging area rooted at `root`.
    pub fn open(root: &Path) -> FsResult<Self> {
        std::fs::create_dir_all(root)?;
        debug!("staging area opened at {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// The staging file path for a node uuid.
    pub fn path_for(&self, uuid: &Uuid) -> PathBuf {
        self.root.join(format!("{}.stage", uuid))
    }

    /// A sibling scratch path for transient transforms (compression)
    /// of the node's staging file.
    pub fn scratch_for(&self, uuid: &Uuid) -> PathBuf {
        self.root.join(format!("{}.scratch", uuid))
    }

    /// Removes the staging (and scratch) files for a uuid, if present.
    pub fn remove(&self, uuid: &Uuid) -> FsResult<()> {
        for path in [self.path_for(uuid), self.scratch_for(uuid)] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed staging file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Removes every staged file in the area.
    pub fn clear(&self) -> FsResult<()> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Root directory of the area.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
