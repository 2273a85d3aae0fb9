//! Cluster-wide mutual exclusion keyed by logical path.
//!
//! One writer may mutate a given path at a time across the whole cluster.
//! Acquisition blocks up to a timeout; fairness is not required but
//! starvation is bounded by the timeout. The lock is re-entrant for the
//! same holder and is meant to be held for the minimum necessary span
//! (metadata transitions, not whole write durations).
//!
//! This coordinator is the in-process face of the external coordination
//! service; sessions depend only on this API so a sequential/ephemeral
//! lock primitive can replace it without touching the commit protocol.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::store::NodeKey;
use crate::types::{Domain, Timestamp};

/// Transient handle proving lock ownership for one path.
///
/// Carries the staging path so a competing process can detect and reject
/// a foreign lock at commit time. Tokens are never persisted or cloned.
#[derive(Debug)]
pub struct LockToken {
    /// Domain of the locked path.
    pub domain: Domain,
    /// The locked logical path.
    pub path: String,
    /// Identity of the lock holder.
    pub holder: String,
    /// Local staging file recorded with the lock.
    pub staging_path: PathBuf,
    token_id: u64,
}

impl LockToken {
    /// Internal identifier of this acquisition.
    pub fn token_id(&self) -> u64 {
        self.token_id
    }
}

struct Held {
    holder: String,
    staging_path: PathBuf,
    hold_count: u32,
    token_id: u64,
    acquired_at: Timestamp,
}

/// Path-keyed mutual exclusion with bounded blocking acquisition.
pub struct LockCoordinator {
    held: Mutex<HashMap<NodeKey, Held>>,
    released: Condvar,
    next_token: AtomicU64,
}

impl LockCoordinator {
    /// Creates a coordinator with no locks held.
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Acquires the lock for `(domain, path)`, blocking up to `timeout`.
    ///
    /// Re-entrant: a holder that already owns the path gets another token
    /// immediately and must release once per acquire.
    pub fn acquire(
        &self,
        domain: &Domain,
        path: &str,
        holder: &str,
        staging_path: &Path,
        timeout: Duration,
    ) -> FsResult<LockToken> {
        let key = NodeKey::new(domain, path);
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();

        loop {
            match held.get_mut(&key) {
                None => {
                    let token_id = self.next_token.fetch_add(1, Ordering::Relaxed);
                    held.insert(
                        key,
                        Held {
                            holder: holder.to_string(),
                            staging_path: staging_path.to_path_buf(),
                            hold_count: 1,
                            token_id,
                            acquired_at: Timestamp::now(),
                        },
                    );
                    debug!("lock acquired: {}:{} by {}", domain, path, holder);
                    return Ok(LockToken {
                        domain: domain.clone(),
                        path: path.to_string(),
                        holder: holder.to_string(),
                        staging_path: staging_path.to_path_buf(),
                        token_id,
                    });
                }
                Some(entry) if entry.holder == holder => {
                    entry.hold_count += 1;
                    let token_id = entry.token_id;
                    debug!(
                        "lock re-entered: {}:{} by {} (depth {})",
                        domain, path, holder, entry.hold_count
                    );
                    return Ok(LockToken {
                        domain: domain.clone(),
                        path: path.to_string(),
                        holder: holder.to_string(),
                        staging_path: staging_path.to_path_buf(),
                        token_id,
                    });
                }
                Some(_) => {
                    if self.released.wait_until(&mut held, deadline).timed_out() {
                        return Err(FsError::lock(
                            domain,
                            path,
                            format!("not acquired within {:?}", timeout),
                        ));
                    }
                }
            }
        }
    }

    /// Releases one hold of the token's lock. Releasing an already-released
    /// or foreign token is a no-op.
    pub fn release(&self, token: &LockToken) {
        let key = NodeKey::new(&token.domain, &token.path);
        let mut held = self.held.lock();
        let remove = match held.get_mut(&key) {
            Some(entry) if entry.token_id == token.token_id => {
                entry.hold_count -= 1;
                entry.hold_count == 0
            }
            _ => {
                debug!(
                    "release ignored for stale token on {}:{}",
                    token.domain, token.path
                );
                false
            }
        };
        if remove {
            held.remove(&key);
            drop(held);
            debug!("lock released: {}:{}", token.domain, token.path);
            self.released.notify_all();
        }
    }

    /// Returns the current holder and recorded staging path, if locked.
    pub fn holder_of(&self, domain: &Domain, path: &str) -> Option<(String, PathBuf)> {
        let held = self.held.lock();
        held.get(&NodeKey::new(domain, path))
            .map(|e| (e.holder.clone(), e.staging_path.clone()))
    }

    /// When the current hold was taken, if locked.
    pub fn held_since(&self, domain: &Domain, path: &str) -> Option<Timestamp> {
        let held = self.held.lock();
        held.get(&NodeKey::new(domain, path)).map(|e| e.acquired_at)
    }

    /// Number of distinct paths currently locked.
    pub fn active_locks(&self) -> usize {
        self.held.lock().len()
    }
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn domain() -> Domain {
        Domain::new("test")
    }

    fn acquire_fast(
        coord: &LockCoordinator,
        path: &str,
        holder: &str,
    ) -> FsResult<LockToken> {
        coord.acquire(
            &domain(),
            path,
            holder,
            Path::new("/tmp/stage"),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_acquire_and_release() {
        let coord = LockCoordinator::new();
        let token = acquire_fast(&coord, "/a", "s1").unwrap();
        assert_eq!(coord.active_locks(), 1);
        coord.release(&token);
        assert_eq!(coord.active_locks(), 0);
    }

    #[test]
    fn test_second_holder_times_out() {
        let coord = LockCoordinator::new();
        let _token = acquire_fast(&coord, "/a", "s1").unwrap();

        match acquire_fast(&coord, "/a", "s2") {
            Err(FsError::Lock { domain: d, path, .. }) => {
                assert_eq!(d, domain());
                assert_eq!(path, "/a");
            }
            other => panic!("expected Lock error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_reentrant_same_holder() {
        let coord = LockCoordinator::new();
        let t1 = acquire_fast(&coord, "/a", "s1").unwrap();
        let t2 = acquire_fast(&coord, "/a", "s1").unwrap();
        assert_eq!(coord.active_locks(), 1);

        coord.release(&t2);
        // Still held, one hold remains
        assert!(coord.holder_of(&domain(), "/a").is_some());
        coord.release(&t1);
        assert!(coord.holder_of(&domain(), "/a").is_none());
    }

    #[test]
    fn test_independent_paths_do_not_contend() {
        let coord = LockCoordinator::new();
        let _a = acquire_fast(&coord, "/a", "s1").unwrap();
        let _b = acquire_fast(&coord, "/b", "s2").unwrap();
        assert_eq!(coord.active_locks(), 2);
    }

    #[test]
    fn test_holder_of_reports_staging_path() {
        let coord = LockCoordinator::new();
        let _t = coord
            .acquire(
                &domain(),
                "/f",
                "writer-1",
                Path::new("/stage/abc.tmp"),
                Duration::from_millis(50),
            )
            .unwrap();
        let (holder, staging) = coord.holder_of(&domain(), "/f").unwrap();
        assert_eq!(holder, "writer-1");
        assert_eq!(staging, PathBuf::from("/stage/abc.tmp"));
    }

    #[test]
    fn test_release_is_idempotent() {
        let coord = LockCoordinator::new();
        let token = acquire_fast(&coord, "/a", "s1").unwrap();
        coord.release(&token);
        coord.release(&token);
        assert_eq!(coord.active_locks(), 0);
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let coord = Arc::new(LockCoordinator::new());
        let token = acquire_fast(&coord, "/a", "s1").unwrap();

        let waiter = {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || {
                coord.acquire(
                    &domain(),
                    "/a",
                    "s2",
                    Path::new("/tmp/stage2"),
                    Duration::from_secs(5),
                )
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        coord.release(&token);

        let second = waiter.join().unwrap().unwrap();
        assert_eq!(second.holder, "s2");
        let (holder, _) = coord.holder_of(&domain(), "/a").unwrap();
        assert_eq!(holder, "s2");
    }

    #[test]
    fn test_at_most_one_live_holder_per_path() {
        let coord = Arc::new(LockCoordinator::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let coord = Arc::clone(&coord);
            handles.push(std::thread::spawn(move || {
                let holder = format!("s{}", i);
                let token = coord
                    .acquire(
                        &domain(),
                        "/hot",
                        &holder,
                        Path::new("/tmp/stage"),
                        Duration::from_secs(5),
                    )
                    .unwrap();
                // While held, we must be the recorded holder
                let (h, _) = coord.holder_of(&domain(), "/hot").unwrap();
                assert_eq!(h, holder);
                coord.release(&token);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(coord.active_locks(), 0);
    }
}
