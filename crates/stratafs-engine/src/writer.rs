//! Append-only writer session with a commit protocol.
//!
//! A writer stages content locally and pushes it to the backend at commit
//! points. The cluster lock is held only around metadata transitions,
//! never for the duration of the write. `data_size` is always measured by
//! a stat of the plaintext staging file, never derived from byte
//! counters.
//!
//! Commit-time takeover detection: the node record carries the lock
//! holder and staging path recorded at open. A session whose identity no
//! longer matches the record has been superseded and must fail without
//! uploading anything.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use stratafs_backend::{BackendAdapter, PathDescriptor, WriteChannel};
use stratafs_meta::{
    normalize_path, BackendKind, Domain, FsConfig, FsError, FsResult, LockCoordinator, LockInfo,
    LockToken, NodeState, NodeStore, Timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed,
    Failed,
}

/// An exclusive append-only write session on one file node.
///
/// Dropping an open session abandons staged-but-uncommitted bytes; call
/// [`WriterSession::close`] to commit and release the node.
pub struct WriterSession {
    store: Arc<NodeStore>,
    locks: Arc<LockCoordinator>,
    adapter: Arc<dyn BackendAdapter>,
    domain: Domain,
    path: String,
    uuid: Uuid,
    holder: String,
    staging: PathBuf,
    channel: Option<Box<dyn WriteChannel>>,
    held_token: Option<LockToken>,
    state: SessionState,
    node_state: NodeState,
    compressed: bool,
    bytes_since_push: u64,
    last_push: Instant,
    flush_interval: Duration,
    flush_size: u64,
    lock_timeout: Duration,
    download_timeout: Duration,
    delete_staging_on_close: bool,
}

impl WriterSession {
    /// Opens a write session on an existing file node.
    ///
    /// `overwrite` discards staged content and starts from offset zero;
    /// otherwise writes append after the current content. Acquires the
    /// path lock for the metadata transition only, releasing it before
    /// returning.
    pub fn open(
        store: Arc<NodeStore>,
        locks: Arc<LockCoordinator>,
        adapter: Arc<dyn BackendAdapter>,
        config: &FsConfig,
        domain: Domain,
        path: &str,
        overwrite: bool,
    ) -> FsResult<Self> {
        let path = normalize_path(path)?;
        let node = store
            .get(&domain, &path)
            .ok_or_else(|| FsError::NodeNotFound {
                domain: domain.clone(),
                path: path.clone(),
            })?;
        let attrs = node.file_attrs()?.clone();

        let desc = PathDescriptor::for_node(&node);
        let staging = adapter.staging_path(&desc);
        if let Some(parent) = staging.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let holder = format!("writer-{}", Uuid::new_v4());
        let token = locks.acquire(&domain, &path, &holder, &staging, config.lock_timeout())?;
        let delete_staging_on_close = adapter.kind() == BackendKind::Remote;

        let mut session = Self {
            store,
            locks,
            adapter,
            domain,
            path,
            uuid: node.uuid,
            holder,
            staging,
            channel: None,
            held_token: None,
            state: SessionState::Open,
            node_state: attrs.state,
            compressed: attrs.compressed,
            bytes_since_push: 0,
            last_push: Instant::now(),
            flush_interval: config.writer_flush_interval(),
            flush_size: config.writer_flush_size,
            lock_timeout: config.lock_timeout(),
            download_timeout: config.download_timeout(),
            delete_staging_on_close,
        };

        let result = session.open_inner(&node.path, &attrs.state, overwrite);
        match result {
            Ok(()) => {
                session.locks.release(&token);
                Ok(session)
            }
            Err(e) => {
                session.locks.release(&token);
                Err(e)
            }
        }
    }

    fn open_inner(&mut self, path: &str, state: &NodeState, overwrite: bool) -> FsResult<()> {
        match state {
            NodeState::PendingSync => {
                return Err(FsError::consistency(format!(
                    "node {}:{} has an unacknowledged commit in flight",
                    self.domain, path
                )));
            }
            NodeState::Error => {
                return Err(FsError::consistency(format!(
                    "node {}:{} is in the error state",
                    self.domain, path
                )));
            }
            _ => {}
        }

        if !overwrite {
            self.materialize_staging()?;
        }

        let holder = self.holder.clone();
        let staging = self.staging.clone();
        self.store.update(&self.domain, &self.path, |node| {
            let attrs = node.file_attrs_mut()?;
            if attrs.state != NodeState::Updating {
                attrs.transition(NodeState::Updating)?;
            }
            attrs.lock = Some(LockInfo {
                holder,
                staging_path: staging,
                acquired_at: Timestamp::now(),
            });
            Ok(())
        })?;
        self.node_state = NodeState::Updating;

        let channel = self.adapter.open_writer(&self.staging, !overwrite)?;
        self.channel = Some(channel);
        debug!(
            "writer session opened on {}:{} (overwrite={})",
            self.domain, self.path, overwrite
        );
        Ok(())
    }

    /// Ensures the staging file holds the node's current content before an
    /// appending session continues from it.
    fn materialize_staging(&mut self) -> FsResult<()> {
        let node = self.current_node()?;
        let attrs = node.file_attrs()?;

        if self.adapter.kind() != BackendKind::Remote {
            // The staging file is the final file; nothing to fetch.
            return Ok(());
        }
        if attrs.state != NodeState::Synced {
            // Nothing committed yet; appends start from whatever is staged.
            return Ok(());
        }

        let staged_len = std::fs::metadata(&self.staging).map(|m| m.len()).ok();
        if staged_len == Some(attrs.data_size) {
            return Ok(());
        }

        if self.compressed {
            let packed = self.staging.with_extension("fetch");
            self.adapter.download(&node, &packed, self.download_timeout)?;
            let part = self.staging.with_extension("part");
            let plain = self.adapter.decompress(&packed, &part)?;
            std::fs::remove_file(&packed)?;
            std::fs::rename(&part, &self.staging)?;
            self.verify_plain_size(plain, attrs.data_size)?;
        } else {
            let part = self.staging.with_extension("part");
            let fetched = self.adapter.download(&node, &part, self.download_timeout)?;
            std::fs::rename(&part, &self.staging)?;
            self.verify_plain_size(fetched, attrs.data_size)?;
        }
        debug!(
            "staged content refreshed for {}:{} ({} bytes)",
            self.domain, self.path, attrs.data_size
        );
        Ok(())
    }

    fn verify_plain_size(&self, got: u64, want: u64) -> FsResult<()> {
        if got != want {
            return Err(FsError::consistency(format!(
                "staging size {} disagrees with recorded data size {} for {}:{}",
                got, want, self.domain, self.path
            )));
        }
        Ok(())
    }

    fn current_node(&self) -> FsResult<stratafs_meta::Node> {
        self.store
            .get(&self.domain, &self.path)
            .ok_or_else(|| FsError::NodeNotFound {
                domain: self.domain.clone(),
                path: self.path.clone(),
            })
    }

    fn ensure_open(&self) -> FsResult<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(FsError::consistency(format!(
                "writer session on {}:{} already closed",
                self.domain, self.path
            ))),
            SessionState::Failed => Err(FsError::consistency(format!(
                "writer session on {}:{} previously failed",
                self.domain, self.path
            ))),
        }
    }

    /// Appends bytes to the staged content, returning the count written.
    pub fn write(&mut self, buf: &[u8]) -> FsResult<u64> {
        self.ensure_open()?;
        if self.node_state == NodeState::Synced {
            // First write after a commit re-enters the updating state.
            self.store.update(&self.domain, &self.path, |node| {
                let attrs = node.file_attrs_mut()?;
                attrs.transition(NodeState::Updating)?;
                attrs.update_timestamp = Some(Timestamp::now());
                Ok(())
            })?;
            self.node_state = NodeState::Updating;
        }
        let channel = self.channel.as_mut().ok_or_else(|| {
            FsError::consistency("writer session has no open channel".to_string())
        })?;
        let n = channel.append(buf)?;
        self.bytes_since_push += n;
        Ok(n)
    }

    /// Flushes staged bytes to the staging file, committing to the backend
    /// when the since-last-push byte or time threshold has been crossed.
    pub fn flush(&mut self) -> FsResult<()> {
        self.ensure_open()?;
        if let Some(channel) = self.channel.as_mut() {
            channel.flush()?;
        }
        if self.bytes_since_push >= self.flush_size
            || self.last_push.elapsed() >= self.flush_interval
        {
            debug!(
                "flush threshold crossed on {}:{} ({} bytes since push)",
                self.domain, self.path, self.bytes_since_push
            );
            self.commit(false)?;
        }
        Ok(())
    }

    /// Commits staged content: flushes, measures the staging file, pushes
    /// it to the backend, and records the node as synced.
    ///
    /// `clear_lock=false` keeps the node locked for further writes in this
    /// session; `clear_lock=true` releases it.
    pub fn commit(&mut self, clear_lock: bool) -> FsResult<()> {
        self.ensure_open()?;
        match self.commit_inner(clear_lock) {
            Ok(()) => Ok(()),
            Err(e @ FsError::Lock { .. }) => {
                // The node belongs to someone else now; fail this session
                // without touching their record.
                self.state = SessionState::Failed;
                self.channel = None;
                Err(e)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn commit_inner(&mut self, clear_lock: bool) -> FsResult<()> {
        if let Some(channel) = self.channel.as_mut() {
            channel.flush()?;
        }

        let token = match self.held_token.take() {
            Some(token) => token,
            None => self.locks.acquire(
                &self.domain,
                &self.path,
                &self.holder,
                &self.staging,
                self.lock_timeout,
            )?,
        };

        // Takeover check: the node record must still name this session.
        let node = self.current_node()?;
        let recorded = node.file_attrs()?.lock.clone();
        let ours = recorded
            .as_ref()
            .map(|l| l.holder == self.holder && l.staging_path == self.staging)
            .unwrap_or(false);
        if !ours {
            self.locks.release(&token);
            let taken_by = recorded
                .map(|l| l.holder)
                .unwrap_or_else(|| "nobody".to_string());
            warn!(
                "commit rejected on {}:{}: lock now held by {}",
                self.domain, self.path, taken_by
            );
            return Err(FsError::lock(
                &self.domain,
                &self.path,
                format!("staging path taken over by {}", taken_by),
            ));
        }

        if self.node_state == NodeState::Synced && self.bytes_since_push == 0 {
            // Nothing staged since the last push; only the lock changes.
            if clear_lock {
                self.store.update(&self.domain, &self.path, |node| {
                    node.file_attrs_mut()?.lock = None;
                    Ok(())
                })?;
                self.locks.release(&token);
            } else {
                self.held_token = Some(token);
            }
            return Ok(());
        }

        // Authoritative size comes from a stat of the plaintext staging
        // file, not from write accounting.
        let data_size = std::fs::metadata(&self.staging)?.len();
        self.store.update(&self.domain, &self.path, |node| {
            let attrs = node.file_attrs_mut()?;
            attrs.transition(NodeState::PendingSync)?;
            attrs.data_size = data_size;
            attrs.update_timestamp = Some(Timestamp::now());
            Ok(())
        })?;
        self.node_state = NodeState::PendingSync;

        let node = self.current_node()?;
        let synced_size = if self.compressed && self.adapter.kind() == BackendKind::Remote {
            let packed = self.staging.with_extension("pack");
            self.adapter.compress(&self.staging, &packed)?;
            let pushed = self.adapter.upload(&packed, &node);
            let _ = std::fs::remove_file(&packed);
            pushed?
        } else {
            self.adapter.upload(&self.staging, &node)?
        };

        self.store.update(&self.domain, &self.path, |node| {
            let attrs = node.file_attrs_mut()?;
            attrs.transition(NodeState::Synced)?;
            attrs.synced_size = synced_size;
            attrs.sync_timestamp = Some(Timestamp::now());
            if clear_lock {
                attrs.lock = None;
            }
            Ok(())
        })?;
        self.node_state = NodeState::Synced;
        self.bytes_since_push = 0;
        self.last_push = Instant::now();

        if clear_lock {
            self.locks.release(&token);
        } else {
            self.held_token = Some(token);
        }
        info!(
            "committed {}:{} ({} bytes staged, {} bytes stored)",
            self.domain, self.path, data_size, synced_size
        );
        Ok(())
    }

    /// Truncates the staged content to `len` bytes. Fails with an
    /// unsupported-operation error on backends without native truncation.
    pub fn truncate(&mut self, len: u64) -> FsResult<()> {
        self.ensure_open()?;
        if let Some(channel) = self.channel.as_mut() {
            channel.flush()?;
        }
        let node = self.current_node()?;
        self.adapter.truncate(&PathDescriptor::for_node(&node), len)?;
        // Staged content diverged again; the next commit re-measures it.
        if self.node_state == NodeState::Synced {
            self.store.update(&self.domain, &self.path, |node| {
                let attrs = node.file_attrs_mut()?;
                attrs.transition(NodeState::Updating)?;
                attrs.update_timestamp = Some(Timestamp::now());
                Ok(())
            })?;
            self.node_state = NodeState::Updating;
        }
        Ok(())
    }

    /// Commits with lock release and ends the session. Idempotent.
    pub fn close(&mut self) -> FsResult<()> {
        if self.state != SessionState::Open {
            return Ok(());
        }
        self.commit(true)?;
        self.channel = None;
        if self.delete_staging_on_close {
            let _ = std::fs::remove_file(&self.staging);
        }
        self.state = SessionState::Closed;
        debug!("writer session closed on {}:{}", self.domain, self.path);
        Ok(())
    }

    /// Marks the session failed, records the node in the error state, and
    /// drops any held lock. Best-effort; never panics.
    fn fail(&mut self) {
        self.state = SessionState::Failed;
        self.channel = None;
        let result = self.store.update(&self.domain, &self.path, |node| {
            let attrs = node.file_attrs_mut()?;
            attrs.transition(NodeState::Error)?;
            attrs.lock = None;
            Ok(())
        });
        if let Err(e) = result {
            warn!(
                "could not record error state on {}:{}: {}",
                self.domain, self.path, e
            );
        }
        if let Some(token) = self.held_token.take() {
            self.locks.release(&token);
        }
    }

    /// Bytes appended since the last backend push.
    pub fn bytes_since_push(&self) -> u64 {
        self.bytes_since_push
    }

    /// The session's staging file.
    pub fn staging_path(&self) -> &std::path::Path {
        &self.staging
    }

    /// Identity of this session as recorded in lock bookkeeping.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// The node's uuid.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// True until close or failure.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }
}

impl Drop for WriterSession {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            warn!(
                "writer session on {}:{} dropped without close; staged bytes abandoned",
                self.domain, self.path
            );
            if let Some(token) = self.held_token.take() {
                self.locks.release(&token);
            }
            let holder = self.holder.clone();
            let _ = self.store.update(&self.domain, &self.path, |node| {
                let attrs = node.file_attrs_mut()?;
                // Only clear our own lock record; a takeover's is not ours.
                if attrs.lock.as_ref().map(|l| l.holder == holder) == Some(true) {
                    attrs.lock = None;
                }
                Ok(())
            });
        }
    }
}
