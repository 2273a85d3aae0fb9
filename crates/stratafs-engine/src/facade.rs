//! The single entry point callers use.
//!
//! `StrataFs` owns the node store, the lock coordinator, and one adapter
//! per registered domain, and hands out writer/reader sessions bound to
//! them. Structural operations (mkdir, delete, rename, copy) take the
//! path lock around their metadata span so they serialize with writer
//! commits on the same path.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use stratafs_backend::{BackendAdapter, PathDescriptor};
use stratafs_meta::{
    normalize_path, BackendKind, Domain, FsConfig, FsError, FsResult, LockCoordinator, Node,
    NodeStore,
};

use crate::reader::ReaderSession;
use crate::watcher::SyncWatcher;
use crate::writer::WriterSession;

/// A virtual filesystem over per-domain storage backends.
pub struct StrataFs {
    config: FsConfig,
    store: Arc<NodeStore>,
    locks: Arc<LockCoordinator>,
    adapters: DashMap<Domain, Arc<dyn BackendAdapter>>,
}

impl StrataFs {
    /// Creates an empty filesystem with no registered domains.
    pub fn new(config: FsConfig) -> Self {
        Self {
            config,
            store: Arc::new(NodeStore::new()),
            locks: Arc::new(LockCoordinator::new()),
            adapters: DashMap::new(),
        }
    }

    /// Binds a domain to a backend adapter and seeds its root directory
    /// node. Registering the same domain twice is an error.
    pub fn register_domain(
        &self,
        domain: Domain,
        adapter: Arc<dyn BackendAdapter>,
    ) -> FsResult<()> {
        if self.adapters.contains_key(&domain) {
            return Err(FsError::NodeExists {
                domain,
                path: "/".to_string(),
            });
        }
        self.store
            .insert(Node::new_directory(domain.clone(), "/")?)?;
        info!("domain {} registered on {} backend", domain, adapter.name());
        self.adapters.insert(domain, adapter);
        Ok(())
    }

    /// The adapter bound to a domain.
    pub fn adapter(&self, domain: &Domain) -> FsResult<Arc<dyn BackendAdapter>> {
        self.adapters
            .get(domain)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FsError::DomainNotRegistered {
                domain: domain.clone(),
            })
    }

    /// The shared node store.
    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// The shared lock coordinator.
    pub fn locks(&self) -> &Arc<LockCoordinator> {
        &self.locks
    }

    /// The active configuration.
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Looks up a node record.
    pub fn get_node(&self, domain: &Domain, path: &str) -> FsResult<Node> {
        let path = normalize_path(path)?;
        self.store
            .get(domain, &path)
            .ok_or_else(|| FsError::NodeNotFound {
                domain: domain.clone(),
                path,
            })
    }

    /// Whether a node exists at the path.
    pub fn exists(&self, domain: &Domain, path: &str) -> FsResult<bool> {
        let path = normalize_path(path)?;
        Ok(self.store.contains(domain, &path))
    }

    /// Direct children of a directory, sorted by path.
    pub fn list(&self, domain: &Domain, path: &str) -> FsResult<Vec<Node>> {
        let node = self.get_node(domain, path)?;
        if !node.is_directory() {
            return Err(FsError::consistency(format!(
                "list requested on file {}:{}",
                domain, node.path
            )));
        }
        let mut children = self.store.children(domain, &node.path);
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    /// Creates one directory. The parent must already exist.
    pub fn mkdir(&self, domain: &Domain, path: &str) -> FsResult<Node> {
        let adapter = self.adapter(domain)?;
        let path = normalize_path(path)?;
        let node = Node::new_directory(domain.clone(), &path)?;
        self.require_parent(domain, &node.path)?;

        let _guard = self.structural_lock(domain, &path)?;
        self.store.insert(node.clone())?;
        adapter.mkdir(&PathDescriptor::for_node(&node))?;
        debug!("mkdir {}:{}", domain, path);
        Ok(node)
    }

    /// Creates a directory and every missing ancestor.
    pub fn mkdirs(&self, domain: &Domain, path: &str) -> FsResult<Node> {
        let path = normalize_path(path)?;
        let mut ancestors = Vec::new();
        let mut current = path.as_str();
        while current != "/" {
            ancestors.push(current.to_string());
            current = parent_of(current);
        }
        for ancestor in ancestors.iter().rev() {
            if !self.store.contains(domain, ancestor) {
                self.mkdir(domain, ancestor)?;
            }
        }
        self.get_node(domain, &path)
    }

    /// Creates an empty file node in a directory. Compression defaults to
    /// the configured policy.
    pub fn create(&self, domain: &Domain, path: &str) -> FsResult<Node> {
        self.create_with_compression(domain, path, self.config.compress_default)
    }

    /// Creates an empty file node with an explicit compression choice.
    pub fn create_with_compression(
        &self,
        domain: &Domain,
        path: &str,
        compressed: bool,
    ) -> FsResult<Node> {
        self.adapter(domain)?;
        let path = normalize_path(path)?;
        let mut node = Node::new_file(domain.clone(), &path)?;
        node.file_attrs_mut()?.compressed = compressed;
        self.require_parent(domain, &node.path)?;

        let _guard = self.structural_lock(domain, &path)?;
        self.store.insert(node.clone())?;
        debug!("created {}:{} (compressed={})", domain, path, compressed);
        Ok(node)
    }

    /// Deletes a node. Directories require `recursive` unless empty; the
    /// subtree is removed bottom-up so no child ever outlives its parent's
    /// backing storage.
    pub fn delete(&self, domain: &Domain, path: &str, recursive: bool) -> FsResult<()> {
        let adapter = self.adapter(domain)?;
        let node = self.get_node(domain, path)?;
        if node.path == "/" {
            return Err(FsError::InvalidPath {
                path: node.path,
                reason: "the domain root cannot be deleted".to_string(),
            });
        }
        if node.is_directory() && !recursive && !self.store.children(domain, &node.path).is_empty()
        {
            return Err(FsError::DirectoryNotEmpty {
                domain: domain.clone(),
                path: node.path,
            });
        }

        let guard = self.structural_lock(domain, &node.path)?;
        for member in self.store.subtree(domain, &node.path) {
            adapter.delete(&PathDescriptor::for_node(&member))?;
            self.store.remove(domain, &member.path)?;
        }
        drop(guard);
        info!("deleted {}:{} (recursive={})", domain, node.path, recursive);
        Ok(())
    }

    /// Renames a node (and its subtree). Node uuids never change; on
    /// backends that key objects by uuid this is metadata-only.
    pub fn rename(&self, domain: &Domain, from: &str, to: &str) -> FsResult<Node> {
        let adapter = self.adapter(domain)?;
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        let node = self.get_node(domain, &from)?;
        if self.store.contains(domain, &to) {
            return Err(FsError::NodeExists {
                domain: domain.clone(),
                path: to,
            });
        }
        self.require_parent(domain, &to)?;

        let guard = self.structural_lock(domain, &from)?;
        adapter.rename(&PathDescriptor::for_node(&node), &to)?;

        // Shallow-first so parents are re-keyed before their children.
        let mut members = self.store.subtree(domain, &from);
        members.reverse();
        for member in members {
            let suffix = &member.path[from.len()..];
            let target = format!("{}{}", to, suffix);
            self.store.rename(domain, &member.path, &target)?;
        }
        drop(guard);
        debug!("renamed {}:{} -> {}", domain, from, to);
        self.get_node(domain, &to)
    }

    /// Copies a node (and its subtree) to a new path. Copies get fresh
    /// uuids; only synced file content is copied.
    pub fn copy(&self, domain: &Domain, from: &str, to: &str) -> FsResult<Node> {
        let adapter = self.adapter(domain)?;
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        self.get_node(domain, &from)?;
        if self.store.contains(domain, &to) {
            return Err(FsError::NodeExists {
                domain: domain.clone(),
                path: to,
            });
        }
        self.require_parent(domain, &to)?;

        let guard = self.structural_lock(domain, &to)?;
        let mut members = self.store.subtree(domain, &from);
        members.reverse();
        for member in members {
            let suffix = &member.path[from.len()..];
            let target = format!("{}{}", to, suffix);
            self.copy_single(&*adapter, &member, &target)?;
        }
        drop(guard);
        debug!("copied {}:{} -> {}", domain, from, to);
        self.get_node(domain, &to)
    }

    fn copy_single(
        &self,
        adapter: &dyn BackendAdapter,
        source: &Node,
        target: &str,
    ) -> FsResult<()> {
        let mut copy = source.clone();
        copy.uuid = Uuid::new_v4();
        copy.rename(target)?;
        if copy.is_directory() {
            adapter.mkdir(&PathDescriptor::for_node(&copy))?;
        } else {
            adapter.copy(
                &PathDescriptor::for_node(source),
                &PathDescriptor::for_node(&copy),
            )?;
        }
        self.store.insert(copy)?;
        Ok(())
    }

    /// Opens a writer session on an existing file node.
    pub fn writer(&self, domain: &Domain, path: &str, overwrite: bool) -> FsResult<WriterSession> {
        let adapter = self.adapter(domain)?;
        WriterSession::open(
            Arc::clone(&self.store),
            Arc::clone(&self.locks),
            adapter,
            &self.config,
            domain.clone(),
            path,
            overwrite,
        )
    }

    /// Opens a reader session on a synced file node.
    pub fn reader(&self, domain: &Domain, path: &str) -> FsResult<ReaderSession> {
        let adapter = self.adapter(domain)?;
        ReaderSession::open(
            Arc::clone(&self.store),
            adapter,
            &self.config,
            domain.clone(),
            path,
        )
    }

    /// Starts a sync watcher over a locally backed domain's physical tree.
    pub fn watch(&self, domain: &Domain) -> FsResult<SyncWatcher> {
        let adapter = self.adapter(domain)?;
        if adapter.kind() == BackendKind::Remote {
            return Err(FsError::Unsupported {
                backend: "remote",
                op: "watch",
            });
        }
        let watch_root = self.config.root.join(domain.as_str());
        std::fs::create_dir_all(&watch_root)?;
        SyncWatcher::spawn(
            Arc::clone(&self.store),
            domain.clone(),
            watch_root,
            &self.config,
        )
    }

    fn require_parent(&self, domain: &Domain, path: &str) -> FsResult<()> {
        if path == "/" {
            return Err(FsError::InvalidPath {
                path: path.to_string(),
                reason: "the domain root already exists".to_string(),
            });
        }
        let parent = parent_of(path);
        let parent_node = self
            .store
            .get(domain, parent)
            .ok_or_else(|| FsError::NodeNotFound {
                domain: domain.clone(),
                path: parent.to_string(),
            })?;
        if !parent_node.is_directory() {
            return Err(FsError::InvalidPath {
                path: path.to_string(),
                reason: format!("parent {} is a file", parent),
            });
        }
        Ok(())
    }

    /// Takes the path lock for a structural mutation's metadata span.
    fn structural_lock(&self, domain: &Domain, path: &str) -> FsResult<StructuralGuard<'_>> {
        let holder = format!("facade-{}", Uuid::new_v4());
        let token = self.locks.acquire(
            domain,
            path,
            &holder,
            Path::new(""),
            self.config.lock_timeout(),
        )?;
        Ok(StructuralGuard {
            locks: &self.locks,
            token,
        })
    }
}

struct StructuralGuard<'a> {
    locks: &'a LockCoordinator,
    token: stratafs_meta::LockToken,
}

impl Drop for StructuralGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.token);
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}
