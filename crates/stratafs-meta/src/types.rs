use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A named logical namespace bound to exactly one backend configuration.
///
/// All paths are resolved relative to a domain; two domains never share
/// nodes, locks, or staging state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Domain(String);

impl Domain {
    /// Creates a new domain from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Domain(name.into())
    }

    /// Returns the domain name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Domain {
    fn from(name: &str) -> Self {
        Domain(name.to_string())
    }
}

/// The storage technology backing a domain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Direct local filesystem I/O; the staging file is the final file.
    #[default]
    Local,
    /// Local files accessed through memory-mapped regions with explicit cursors.
    Mapped,
    /// Remote object storage; staging files are true temp copies.
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Mapped => write!(f, "mapped"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

/// Represents a point in time with second and nanosecond precision.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current timestamp.
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }

    /// Encodes this timestamp as a `secs.nanos` string for the flat
    /// persistence map.
    pub fn encode(&self) -> String {
        format!("{}.{}", self.secs, self.nanos)
    }

    /// Decodes a timestamp from its `secs.nanos` string form.
    pub fn decode(s: &str) -> Option<Self> {
        let (secs, nanos) = s.split_once('.')?;
        Some(Self {
            secs: secs.parse().ok()?,
            nanos: nanos.parse().ok()?,
        })
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Lifecycle state of a file node.
///
/// `Error` is absorbing: once a node enters it, no further transition is
/// legal. `data_size` is authoritative only in `Synced`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeState {
    /// Freshly created, never written.
    #[default]
    New,
    /// A writer session holds the node; local staging copy may diverge
    /// from the backend.
    Updating,
    /// Local flush complete, awaiting remote acknowledgement.
    PendingSync,
    /// Backend confirmed the last commit; sizes are authoritative.
    Synced,
    /// A commit or reconciliation failed; absorbing.
    Error,
}

impl NodeState {
    /// Returns true if a transition from `self` to `to` is legal.
    ///
    /// Same-state transitions are always allowed (idempotent updates);
    /// `Error` is reachable from every state and absorbing.
    pub fn can_transition(self, to: NodeState) -> bool {
        if self == to {
            return true;
        }
        match (self, to) {
            (NodeState::Error, _) => false,
            (_, NodeState::Error) => true,
            (NodeState::New, NodeState::Updating) => true,
            (NodeState::Updating, NodeState::PendingSync) => true,
            (NodeState::PendingSync, NodeState::Synced) => true,
            (NodeState::Synced, NodeState::Updating) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::New => "new",
            NodeState::Updating => "updating",
            NodeState::PendingSync => "pending-sync",
            NodeState::Synced => "synced",
            NodeState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for NodeState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(NodeState::New),
            "updating" => Ok(NodeState::Updating),
            "pending-sync" => Ok(NodeState::PendingSync),
            "synced" => Ok(NodeState::Synced),
            "error" => Ok(NodeState::Error),
            _ => Err(()),
        }
    }
}

/// Lock bookkeeping recorded on a file node while it is write-locked.
///
/// The staging path lets a competing process detect a foreign lock: a
/// session committing against a node whose recorded staging path is not
/// its own must fail rather than overwrite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Identity of the session or process holding the lock.
    pub holder: String,
    /// Local staging file the holder writes against.
    pub staging_path: PathBuf,
    /// When the lock was taken.
    pub acquired_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_display() {
        let d = Domain::new("prod-archive");
        assert_eq!(d.to_string(), "prod-archive");
        assert_eq!(d.as_str(), "prod-archive");
    }

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp { secs: 1, nanos: 5 };
        let b = Timestamp { secs: 1, nanos: 9 };
        let c = Timestamp { secs: 2, nanos: 0 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_timestamp_encode_decode() {
        let t = Timestamp {
            secs: 1700000000,
            nanos: 123456789,
        };
        let s = t.encode();
        assert_eq!(Timestamp::decode(&s), Some(t));
        assert_eq!(Timestamp::decode("garbage"), None);
        assert_eq!(Timestamp::decode("1.x"), None);
    }

    #[test]
    fn test_state_machine_legal_path() {
        assert!(NodeState::New.can_transition(NodeState::Updating));
        assert!(NodeState::Updating.can_transition(NodeState::PendingSync));
        assert!(NodeState::PendingSync.can_transition(NodeState::Synced));
        assert!(NodeState::Synced.can_transition(NodeState::Updating));
    }

    #[test]
    fn test_state_machine_error_absorbing() {
        for s in [
            NodeState::New,
            NodeState::Updating,
            NodeState::PendingSync,
            NodeState::Synced,
        ] {
            assert!(s.can_transition(NodeState::Error));
        }
        assert!(!NodeState::Error.can_transition(NodeState::New));
        assert!(!NodeState::Error.can_transition(NodeState::Synced));
        assert!(NodeState::Error.can_transition(NodeState::Error));
    }

    #[test]
    fn test_state_machine_illegal_shortcuts() {
        assert!(!NodeState::New.can_transition(NodeState::Synced));
        assert!(!NodeState::New.can_transition(NodeState::PendingSync));
        assert!(!NodeState::PendingSync.can_transition(NodeState::Updating));
        assert!(!NodeState::Synced.can_transition(NodeState::New));
    }

    #[test]
    fn test_state_roundtrip_via_str() {
        for s in [
            NodeState::New,
            NodeState::Updating,
            NodeState::PendingSync,
            NodeState::Synced,
            NodeState::Error,
        ] {
            let parsed: NodeState = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Local.to_string(), "local");
        assert_eq!(BackendKind::Mapped.to_string(), "mapped");
        assert_eq!(BackendKind::Remote.to_string(), "remote");
    }

    proptest::proptest! {
        #[test]
        fn prop_timestamp_encoding_roundtrips(secs in 0u64..=u64::MAX / 2, nanos in 0u32..1_000_000_000) {
            let t = Timestamp { secs, nanos };
            proptest::prop_assert_eq!(Timestamp::decode(&t.encode()), Some(t));
        }
    }
}
