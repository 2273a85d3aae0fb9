//! Error taxonomy shared by every StrataFS crate.

use thiserror::Error;

use crate::types::Domain;

/// Result type alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Error variants surfaced by the public filesystem contract.
///
/// Backend adapters never swallow errors; sessions translate adapter
/// failures into this taxonomy but do not retry — retry policy belongs
/// to the caller.
#[derive(Debug, Error)]
pub enum FsError {
    /// Lock not acquired within the timeout, or lock ownership mismatch
    /// detected at commit time. Never silently retried.
    #[error("lock failure on {domain}:{path}: {reason}")]
    Lock {
        /// Domain of the contended path.
        domain: Domain,
        /// Logical path the lock was requested for.
        path: String,
        /// What went wrong (timeout, ownership mismatch).
        reason: String,
    },

    /// Adapter-level I/O failure (network, disk, permission), carrying the
    /// path context and the underlying cause.
    #[error("backend failure on {domain}:{path}: {source}")]
    Backend {
        /// Domain of the failed operation.
        domain: Domain,
        /// Logical path the operation targeted.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Local staging size/state disagrees with recorded node state.
    /// Always fatal to the current operation, never auto-corrected.
    #[error("consistency violation: {detail}")]
    Consistency {
        /// Description of the disagreement.
        detail: String,
    },

    /// Operation not implemented for the active backend. Documented per
    /// adapter and returned immediately without side effects.
    #[error("operation {op} not supported by {backend} backend")]
    Unsupported {
        /// Name of the backend that rejected the operation.
        backend: &'static str,
        /// The rejected operation.
        op: &'static str,
    },

    /// The requested node does not exist in the metadata store.
    #[error("node not found: {domain}:{path}")]
    NodeNotFound {
        /// Domain searched.
        domain: Domain,
        /// Logical path searched.
        path: String,
    },

    /// A node already exists at the target path.
    #[error("node already exists: {domain}:{path}")]
    NodeExists {
        /// Domain of the collision.
        domain: Domain,
        /// Logical path of the collision.
        path: String,
    },

    /// No backend adapter has been registered for the domain.
    #[error("domain not registered: {domain}")]
    DomainNotRegistered {
        /// The unknown domain.
        domain: Domain,
    },

    /// A directory delete was requested without `recursive` while children
    /// remain.
    #[error("directory not empty: {domain}:{path}")]
    DirectoryNotEmpty {
        /// Domain of the directory.
        domain: Domain,
        /// Logical path of the directory.
        path: String,
    },

    /// A logical path failed validation.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Wraps standard I/O errors with no richer context available.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence-map or config encode/decode failure.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },
}

impl FsError {
    /// Builds a `Backend` error from path context and any error cause.
    pub fn backend(
        domain: &Domain,
        path: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        FsError::Backend {
            domain: domain.clone(),
            path: path.to_string(),
            source: std::io::Error::other(source),
        }
    }

    /// Builds a `Lock` error for a timeout or takeover.
    pub fn lock(domain: &Domain, path: &str, reason: impl Into<String>) -> Self {
        FsError::Lock {
            domain: domain.clone(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Builds a `Consistency` error from a detail message.
    pub fn consistency(detail: impl Into<String>) -> Self {
        FsError::Consistency {
            detail: detail.into(),
        }
    }
}
