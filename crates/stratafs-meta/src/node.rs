//! Cluster-visible node records for files and directories.
//!
//! A node is identified by its uuid for its whole life; paths may be
//! renamed underneath it. File and directory payloads are a tagged union,
//! so directory nodes never carry meaningless size fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FsError, FsResult};
use crate::types::{Domain, LockInfo, NodeState, Timestamp};

/// File-only node attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileAttrs {
    /// Size of the content in bytes. Authoritative only once the node
    /// state is `Synced`; always measured from the local staging file at
    /// flush time, never estimated from byte counters.
    pub data_size: u64,
    /// Bytes acknowledged by the backend at the last commit.
    pub synced_size: u64,
    /// When the backend last acknowledged an upload.
    pub sync_timestamp: Option<Timestamp>,
    /// When the content was last modified locally.
    pub update_timestamp: Option<Timestamp>,
    /// Whether the stored content is compressed on the backend.
    pub compressed: bool,
    /// Lifecycle state.
    pub state: NodeState,
    /// Present only while write-locked.
    pub lock: Option<LockInfo>,
}

impl FileAttrs {
    /// Moves the attrs to a new lifecycle state, validating legality.
    pub fn transition(&mut self, to: NodeState) -> FsResult<()> {
        if !self.state.can_transition(to) {
            return Err(FsError::consistency(format!(
                "illegal node state transition {} -> {}",
                self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }
}

/// Kind-specific node payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A directory; carries no size or sync state.
    Directory,
    /// A file with its sync lifecycle attributes.
    File(FileAttrs),
}

/// The cluster-visible record of a file or directory.
///
/// Equality is defined by `uuid` alone: a renamed node is still the same
/// node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// Immutable identity, assigned at creation.
    pub uuid: Uuid,
    /// Namespace this node lives in.
    pub domain: Domain,
    /// Absolute, '/'-separated logical path within the domain.
    pub path: String,
    /// File or directory payload.
    pub kind: NodeKind,
    /// Backend-specific extra keys (e.g. container/bucket name) carried
    /// through the persistence map without interpretation.
    pub extras: BTreeMap<String, String>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for Node {}

/// Validates and normalizes an absolute logical path.
pub fn normalize_path(path: &str) -> FsResult<String> {
    if path.is_empty() {
        return Err(FsError::InvalidPath {
            path: path.to_string(),
            reason: "empty path".to_string(),
        });
    }
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath {
            path: path.to_string(),
            reason: "path must be absolute".to_string(),
        });
    }
    if path.contains("//") || path.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(FsError::InvalidPath {
            path: path.to_string(),
            reason: "path must not contain empty, '.' or '..' segments".to_string(),
        });
    }
    let normalized = if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    };
    Ok(normalized)
}

impl Node {
    /// Creates a new file node in state `New`.
    pub fn new_file(domain: Domain, path: &str) -> FsResult<Self> {
        Ok(Self {
            uuid: Uuid::new_v4(),
            domain,
            path: normalize_path(path)?,
            kind: NodeKind::File(FileAttrs::default()),
            extras: BTreeMap::new(),
        })
    }

    /// Creates a new directory node.
    pub fn new_directory(domain: Domain, path: &str) -> FsResult<Self> {
        Ok(Self {
            uuid: Uuid::new_v4(),
            domain,
            path: normalize_path(path)?,
            kind: NodeKind::Directory,
            extras: BTreeMap::new(),
        })
    }

    /// Returns true if this node is a directory.
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    /// Returns the file attributes, or a consistency error for directories.
    pub fn file_attrs(&self) -> FsResult<&FileAttrs> {
        match &self.kind {
            NodeKind::File(attrs) => Ok(attrs),
            NodeKind::Directory => Err(FsError::consistency(format!(
                "node {} is a directory, file attributes requested",
                self.path
            ))),
        }
    }

    /// Mutable access to the file attributes.
    pub fn file_attrs_mut(&mut self) -> FsResult<&mut FileAttrs> {
        match &mut self.kind {
            NodeKind::File(attrs) => Ok(attrs),
            NodeKind::Directory => Err(FsError::consistency(format!(
                "node {} is a directory, file attributes requested",
                self.path
            ))),
        }
    }

    /// Returns the final path segment.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Returns the parent path, or None for the root.
    pub fn parent_path(&self) -> Option<&str> {
        if self.path == "/" {
            return None;
        }
        match self.path.rfind('/') {
            Some(0) => Some("/"),
            Some(idx) => Some(&self.path[..idx]),
            None => None,
        }
    }

    /// Moves the node to a new absolute path. The uuid never changes.
    pub fn rename(&mut self, new_path: &str) -> FsResult<()> {
        self.path = normalize_path(new_path)?;
        Ok(())
    }

    /// Serializes the node to a flat string-keyed map, the persistence
    /// format of the external metadata store. Lock bookkeeping is
    /// transient and intentionally not included.
    pub fn to_config(&self) -> BTreeMap<String, String> {
        let mut map = self.extras.clone();
        map.insert(
            "type".to_string(),
            if self.is_directory() { "directory" } else { "file" }.to_string(),
        );
        map.insert("domain".to_string(), self.domain.as_str().to_string());
        map.insert("path".to_string(), self.path.clone());
        map.insert("uuid".to_string(), self.uuid.to_string());
        map.insert("isDirectory".to_string(), self.is_directory().to_string());
        if let NodeKind::File(attrs) = &self.kind {
            map.insert("dataSize".to_string(), attrs.data_size.to_string());
            map.insert("syncedSize".to_string(), attrs.synced_size.to_string());
            map.insert("compressed".to_string(), attrs.compressed.to_string());
            map.insert("state".to_string(), attrs.state.to_string());
            if let Some(ts) = attrs.sync_timestamp {
                map.insert("syncTimestamp".to_string(), ts.encode());
            }
            if let Some(ts) = attrs.update_timestamp {
                map.insert("updateTimestamp".to_string(), ts.encode());
            }
        }
        map
    }

    /// Reconstructs a node from its flat persistence map. Keys this model
    /// does not know are preserved in `extras` so round-trips are lossless
    /// for every backend variant.
    pub fn from_config(map: &BTreeMap<String, String>) -> FsResult<Self> {
        let get = |key: &str| -> FsResult<&String> {
            map.get(key).ok_or_else(|| FsError::Serialization {
                reason: format!("missing key {:?} in node config", key),
            })
        };
        let uuid = Uuid::parse_str(get("uuid")?).map_err(|e| FsError::Serialization {
            reason: format!("bad uuid: {}", e),
        })?;
        let domain = Domain::new(get("domain")?.clone());
        let path = get("path")?.clone();
        let is_directory = get("isDirectory")?.parse::<bool>().map_err(|e| {
            FsError::Serialization {
                reason: format!("bad isDirectory flag: {}", e),
            }
        })?;

        let parse_u64 = |key: &str| -> FsResult<u64> {
            match map.get(key) {
                Some(v) => v.parse().map_err(|e| FsError::Serialization {
                    reason: format!("bad {}: {}", key, e),
                }),
                None => Ok(0),
            }
        };

        let kind = if is_directory {
            NodeKind::Directory
        } else {
            let state = match map.get("state") {
                Some(v) => v.parse().map_err(|_| FsError::Serialization {
                    reason: format!("bad state: {:?}", v),
                })?,
                None => NodeState::New,
            };
            NodeKind::File(FileAttrs {
                data_size: parse_u64("dataSize")?,
                synced_size: parse_u64("syncedSize")?,
                sync_timestamp: map.get("syncTimestamp").and_then(|s| Timestamp::decode(s)),
                update_timestamp: map.get("updateTimestamp").and_then(|s| Timestamp::decode(s)),
                compressed: map
                    .get("compressed")
                    .map(|v| v == "true")
                    .unwrap_or(false),
                state,
                lock: None,
            })
        };

        const KNOWN: &[&str] = &[
            "type",
            "domain",
            "path",
            "uuid",
            "isDirectory",
            "dataSize",
            "syncedSize",
            "syncTimestamp",
            "updateTimestamp",
            "compressed",
            "state",
        ];
        let extras = map
            .iter()
            .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            uuid,
            domain,
            path,
            kind,
            extras,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> Node {
        Node::new_file(Domain::new("test"), path).unwrap()
    }

    #[test]
    fn test_new_file_starts_new() {
        let n = file("/a/b.txt");
        let attrs = n.file_attrs().unwrap();
        assert_eq!(attrs.state, NodeState::New);
        assert_eq!(attrs.data_size, 0);
        assert!(!attrs.compressed);
        assert!(attrs.lock.is_none());
    }

    #[test]
    fn test_equality_by_uuid_not_path() {
        let mut a = file("/a");
        let b = file("/a");
        assert_ne!(a, b);

        a.rename("/elsewhere").unwrap();
        let same = a.clone();
        assert_eq!(a, same);
    }

    #[test]
    fn test_rename_keeps_uuid() {
        let mut n = file("/old/name");
        let uuid = n.uuid;
        n.rename("/new/name").unwrap();
        assert_eq!(n.uuid, uuid);
        assert_eq!(n.path, "/new/name");
    }

    #[test]
    fn test_parent_and_file_name() {
        let n = file("/a/b/c.dat");
        assert_eq!(n.file_name(), "c.dat");
        assert_eq!(n.parent_path(), Some("/a/b"));

        let top = file("/top");
        assert_eq!(top.parent_path(), Some("/"));
    }

    #[test]
    fn test_normalize_rejects_relative_and_dotted() {
        assert!(normalize_path("relative/path").is_err());
        assert!(normalize_path("").is_err());
        assert!(normalize_path("/a/../b").is_err());
        assert!(normalize_path("/a//b").is_err());
        assert_eq!(normalize_path("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn test_directory_refuses_file_attrs() {
        let d = Node::new_directory(Domain::new("test"), "/dir").unwrap();
        assert!(d.is_directory());
        assert!(d.file_attrs().is_err());
    }

    #[test]
    fn test_config_roundtrip_file() {
        let mut n = file("/data/report.bin");
        {
            let attrs = n.file_attrs_mut().unwrap();
            attrs.data_size = 4096;
            attrs.synced_size = 4096;
            attrs.compressed = true;
            attrs.state = NodeState::Synced;
            attrs.sync_timestamp = Some(Timestamp {
                secs: 1700000000,
                nanos: 42,
            });
        }
        n.extras
            .insert("container".to_string(), "archive-bucket".to_string());

        let map = n.to_config();
        assert_eq!(map.get("type").unwrap(), "file");
        assert_eq!(map.get("isDirectory").unwrap(), "false");
        assert_eq!(map.get("container").unwrap(), "archive-bucket");

        let back = Node::from_config(&map).unwrap();
        assert_eq!(back.uuid, n.uuid);
        assert_eq!(back.domain, n.domain);
        assert_eq!(back.path, n.path);
        assert_eq!(back.is_directory(), n.is_directory());
        assert_eq!(back.extras, n.extras);
        let attrs = back.file_attrs().unwrap();
        assert_eq!(attrs.data_size, 4096);
        assert!(attrs.compressed);
        assert_eq!(attrs.state, NodeState::Synced);
        assert_eq!(
            attrs.sync_timestamp,
            Some(Timestamp {
                secs: 1700000000,
                nanos: 42
            })
        );
    }

    #[test]
    fn test_config_roundtrip_directory() {
        let d = Node::new_directory(Domain::new("test"), "/some/dir").unwrap();
        let map = d.to_config();
        assert_eq!(map.get("type").unwrap(), "directory");
        assert!(!map.contains_key("dataSize"));

        let back = Node::from_config(&map).unwrap();
        assert_eq!(back.uuid, d.uuid);
        assert!(back.is_directory());
    }

    #[test]
    fn test_from_config_missing_key_fails() {
        let mut map = file("/x").to_config();
        map.remove("uuid");
        assert!(matches!(
            Node::from_config(&map),
            Err(FsError::Serialization { .. })
        ));
    }

    #[test]
    fn test_lock_info_not_persisted() {
        let mut n = file("/locked");
        n.file_attrs_mut().unwrap().lock = Some(LockInfo {
            holder: "session-1".to_string(),
            staging_path: "/tmp/stage".into(),
            acquired_at: Timestamp::now(),
        });
        let back = Node::from_config(&n.to_config()).unwrap();
        assert!(back.file_attrs().unwrap().lock.is_none());
    }

    #[test]
    fn test_attrs_transition_enforced() {
        let mut n = file("/f");
        let attrs = n.file_attrs_mut().unwrap();
        attrs.transition(NodeState::Updating).unwrap();
        assert!(attrs.transition(NodeState::Synced).is_err());
        attrs.transition(NodeState::PendingSync).unwrap();
        attrs.transition(NodeState::Synced).unwrap();
        attrs.transition(NodeState::Error).unwrap();
        assert!(attrs.transition(NodeState::Updating).is_err());
    }
}
