//! Backend-resolved addressing for adapter operations.

use uuid::Uuid;

use stratafs_meta::{Domain, Node};

/// A resolved, backend-specific addressing triple plus cached metadata.
///
/// Descriptors are produced per operation from a [`Node`] or from raw
/// path segments and are never persisted. They are the only object
/// backend adapters operate on, which keeps cluster metadata decoupled
/// from backend addressing quirks such as container or bucket names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathDescriptor {
    /// Namespace the path belongs to.
    pub domain: Domain,
    /// Absolute logical path within the domain.
    pub path: String,
    /// Identity of the node being addressed.
    pub uuid: Uuid,
    /// True for directories.
    pub directory: bool,
    /// Cached content size; zero when unknown.
    pub data_size: u64,
    /// Container/bucket qualifier for object-store backends.
    pub container: Option<String>,
}

impl PathDescriptor {
    /// Resolves a descriptor from a node record.
    pub fn for_node(node: &Node) -> Self {
        let data_size = node.file_attrs().map(|a| a.data_size).unwrap_or(0);
        Self {
            domain: node.domain.clone(),
            path: node.path.clone(),
            uuid: node.uuid,
            directory: node.is_directory(),
            data_size,
            container: node.extras.get("container").cloned(),
        }
    }

    /// Builds a descriptor from raw parts, for operations that precede a
    /// node record (create, mkdir).
    pub fn from_parts(domain: Domain, path: &str, uuid: Uuid, directory: bool) -> Self {
        Self {
            domain,
            path: path.to_string(),
            uuid,
            directory,
            data_size: 0,
            container: None,
        }
    }

    /// Sets the container qualifier.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratafs_meta::NodeState;

    #[test]
    fn test_for_node_carries_size_and_kind() {
        let mut node = Node::new_file(Domain::new("d"), "/f.bin").unwrap();
        {
            let attrs = node.file_attrs_mut().unwrap();
            attrs.data_size = 123;
            attrs.state = NodeState::Synced;
        }
        node.extras
            .insert("container".to_string(), "bucket-a".to_string());

        let desc = PathDescriptor::for_node(&node);
        assert_eq!(desc.uuid, node.uuid);
        assert_eq!(desc.path, "/f.bin");
        assert!(!desc.directory);
        assert_eq!(desc.data_size, 123);
        assert_eq!(desc.container.as_deref(), Some("bucket-a"));
    }

    #[test]
    fn test_for_directory_node() {
        let node = Node::new_directory(Domain::new("d"), "/dir").unwrap();
        let desc = PathDescriptor::for_node(&node);
        assert!(desc.directory);
        assert_eq!(desc.data_size, 0);
    }

    #[test]
    fn test_from_parts() {
        let uuid = Uuid::new_v4();
        let desc = PathDescriptor::from_parts(Domain::new("d"), "/x", uuid, false)
            .with_container("c1");
        assert_eq!(desc.uuid, uuid);
        assert_eq!(desc.container.as_deref(), Some("c1"));
    }
}
