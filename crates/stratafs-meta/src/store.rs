//! In-memory concurrent node metadata store.
//!
//! This is the process-local face of the external metadata store: nodes
//! are keyed by `(domain, path)` with a secondary uuid index so lookups
//! survive renames. Durable persistence goes through
//! `Node::to_config`/`from_config` at the integration seam.

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{FsError, FsResult};
use crate::node::Node;
use crate::types::Domain;

/// Composite key for path-based lookups.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey {
    /// Namespace of the node.
    pub domain: Domain,
    /// Absolute logical path.
    pub path: String,
}

impl NodeKey {
    /// Creates a key from a domain and path.
    pub fn new(domain: &Domain, path: &str) -> Self {
        Self {
            domain: domain.clone(),
            path: path.to_string(),
        }
    }
}

/// Concurrent map of nodes with a uuid index.
#[derive(Default)]
pub struct NodeStore {
    by_path: DashMap<NodeKey, Node>,
    by_uuid: DashMap<Uuid, NodeKey>,
}

impl NodeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new node. Fails if a node already exists at the path.
    pub fn insert(&self, node: Node) -> FsResult<()> {
        let key = NodeKey::new(&node.domain, &node.path);
        if self.by_path.contains_key(&key) {
            return Err(FsError::NodeExists {
                domain: node.domain.clone(),
                path: node.path.clone(),
            });
        }
        self.by_uuid.insert(node.uuid, key.clone());
        self.by_path.insert(key, node);
        Ok(())
    }

    /// Looks up a node by domain and path.
    pub fn get(&self, domain: &Domain, path: &str) -> Option<Node> {
        self.by_path
            .get(&NodeKey::new(domain, path))
            .map(|n| n.clone())
    }

    /// Looks up a node by uuid.
    pub fn get_by_uuid(&self, uuid: &Uuid) -> Option<Node> {
        let key = self.by_uuid.get(uuid)?.clone();
        self.by_path.get(&key).map(|n| n.clone())
    }

    /// Returns true if a node exists at the path.
    pub fn contains(&self, domain: &Domain, path: &str) -> bool {
        self.by_path.contains_key(&NodeKey::new(domain, path))
    }

    /// Mutates the node at the path under the store's lock and returns the
    /// closure's result. The closure must not change the node's path or
    /// uuid; renames go through [`NodeStore::rename`].
    pub fn update<T>(
        &self,
        domain: &Domain,
        path: &str,
        f: impl FnOnce(&mut Node) -> FsResult<T>,
    ) -> FsResult<T> {
        let key = NodeKey::new(domain, path);
        let mut entry = self.by_path.get_mut(&key).ok_or_else(|| FsError::NodeNotFound {
            domain: domain.clone(),
            path: path.to_string(),
        })?;
        f(entry.value_mut())
    }

    /// Removes the node at the path and returns it.
    ///
    /// If the uuid index points somewhere other than the removed entry the
    /// store is internally inconsistent; that is surfaced, never repaired.
    pub fn remove(&self, domain: &Domain, path: &str) -> FsResult<Node> {
        let key = NodeKey::new(domain, path);
        let (_, node) = self.by_path.remove(&key).ok_or_else(|| FsError::NodeNotFound {
            domain: domain.clone(),
            path: path.to_string(),
        })?;
        match self.by_uuid.remove(&node.uuid) {
            Some((_, indexed)) if indexed != key => Err(FsError::consistency(format!(
                "uuid {} indexed at {}:{} but removed from {}:{}",
                node.uuid, indexed.domain, indexed.path, domain, path
            ))),
            _ => Ok(node),
        }
    }

    /// Re-keys a node to a new path. The uuid never changes.
    pub fn rename(&self, domain: &Domain, from: &str, to: &str) -> FsResult<Node> {
        let to_key = NodeKey::new(domain, to);
        if self.by_path.contains_key(&to_key) {
            return Err(FsError::NodeExists {
                domain: domain.clone(),
                path: to.to_string(),
            });
        }
        let from_key = NodeKey::new(domain, from);
        let (_, mut node) = self
            .by_path
            .remove(&from_key)
            .ok_or_else(|| FsError::NodeNotFound {
                domain: domain.clone(),
                path: from.to_string(),
            })?;
        node.rename(to)?;
        self.by_uuid.insert(node.uuid, to_key.clone());
        self.by_path.insert(to_key, node.clone());
        Ok(node)
    }

    /// Returns direct children of a directory path, unordered.
    pub fn children(&self, domain: &Domain, parent: &str) -> Vec<Node> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{}/", parent)
        };
        self.by_path
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.domain == *domain
                    && key.path.starts_with(&prefix)
                    && !key.path[prefix.len()..].contains('/')
                    && !key.path[prefix.len()..].is_empty()
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Returns the path and every node beneath it, deepest first (ready
    /// for bottom-up deletion).
    pub fn subtree(&self, domain: &Domain, path: &str) -> Vec<Node> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let mut nodes: Vec<Node> = self
            .by_path
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.domain == *domain && (key.path == path || key.path.starts_with(&prefix))
            })
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(b.path.cmp(&a.path)));
        nodes
    }

    /// Number of nodes in the store.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Returns true if the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new("test")
    }

    fn store_with(paths: &[&str]) -> NodeStore {
        let store = NodeStore::new();
        for p in paths {
            let node = if p.ends_with('/') {
                Node::new_directory(domain(), p.trim_end_matches('/')).unwrap()
            } else {
                Node::new_file(domain(), p).unwrap()
            };
            store.insert(node).unwrap();
        }
        store
    }

    #[test]
    fn test_insert_and_get() {
        let store = store_with(&["/a.txt"]);
        let got = store.get(&domain(), "/a.txt").unwrap();
        assert_eq!(got.path, "/a.txt");
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = store_with(&["/a.txt"]);
        let dup = Node::new_file(domain(), "/a.txt").unwrap();
        assert!(matches!(
            store.insert(dup),
            Err(FsError::NodeExists { .. })
        ));
    }

    #[test]
    fn test_get_by_uuid_survives_rename() {
        let store = store_with(&["/before"]);
        let uuid = store.get(&domain(), "/before").unwrap().uuid;

        store.rename(&domain(), "/before", "/after").unwrap();

        let found = store.get_by_uuid(&uuid).unwrap();
        assert_eq!(found.path, "/after");
        assert_eq!(found.uuid, uuid);
        assert!(store.get(&domain(), "/before").is_none());
    }

    #[test]
    fn test_rename_to_occupied_path_rejected() {
        let store = store_with(&["/a", "/b"]);
        assert!(matches!(
            store.rename(&domain(), "/a", "/b"),
            Err(FsError::NodeExists { .. })
        ));
        // Original untouched on failure
        assert!(store.contains(&domain(), "/a"));
    }

    #[test]
    fn test_update_mutates_in_place() {
        let store = store_with(&["/f"]);
        store
            .update(&domain(), "/f", |n| {
                n.file_attrs_mut().map(|a| a.data_size = 99)
            })
            .unwrap();
        assert_eq!(
            store.get(&domain(), "/f").unwrap().file_attrs().unwrap().data_size,
            99
        );
    }

    #[test]
    fn test_update_missing_node() {
        let store = NodeStore::new();
        let res = store.update(&domain(), "/ghost", |_| Ok(()));
        assert!(matches!(res, Err(FsError::NodeNotFound { .. })));
    }

    #[test]
    fn test_remove() {
        let store = store_with(&["/gone"]);
        let removed = store.remove(&domain(), "/gone").unwrap();
        assert_eq!(removed.path, "/gone");
        assert!(store.is_empty());
        assert!(store.get_by_uuid(&removed.uuid).is_none());
    }

    #[test]
    fn test_children_direct_only() {
        let store = store_with(&["/dir/", "/dir/a", "/dir/b", "/dir/sub/", "/dir/sub/deep"]);
        let mut names: Vec<String> = store
            .children(&domain(), "/dir")
            .into_iter()
            .map(|n| n.path)
            .collect();
        names.sort();
        assert_eq!(names, vec!["/dir/a", "/dir/b", "/dir/sub"]);
    }

    #[test]
    fn test_subtree_deepest_first() {
        let store = store_with(&["/d/", "/d/x", "/d/sub/", "/d/sub/y"]);
        let subtree = store.subtree(&domain(), "/d");
        assert_eq!(subtree.len(), 4);
        // Root of the subtree comes last
        assert_eq!(subtree.last().unwrap().path, "/d");
        let y_pos = subtree.iter().position(|n| n.path == "/d/sub/y").unwrap();
        let sub_pos = subtree.iter().position(|n| n.path == "/d/sub").unwrap();
        assert!(y_pos < sub_pos);
    }

    #[test]
    fn test_domains_are_isolated() {
        let store = NodeStore::new();
        store
            .insert(Node::new_file(Domain::new("one"), "/same").unwrap())
            .unwrap();
        store
            .insert(Node::new_file(Domain::new("two"), "/same").unwrap())
            .unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(&Domain::new("one"), "/same").is_some());
        assert!(store.children(&Domain::new("one"), "/").len() == 1);
    }
}
