#![warn(missing_docs)]

//! StrataFS metadata subsystem: cluster node/path model, node store,
//! path-keyed lock coordination, configuration.
//!
//! This crate defines the backend-independent view of the filesystem:
//! nodes and their lifecycle states, the concurrent metadata store, and
//! the cluster-wide lock coordinator the write path serializes through.

pub mod config;
pub mod error;
pub mod locking;
pub mod node;
pub mod store;
pub mod types;

pub use config::FsConfig;
pub use error::{FsError, FsResult};
pub use locking::{LockCoordinator, LockToken};
pub use node::{normalize_path, FileAttrs, Node, NodeKind};
pub use store::{NodeKey, NodeStore};
pub use types::{BackendKind, Domain, LockInfo, NodeState, Timestamp};
