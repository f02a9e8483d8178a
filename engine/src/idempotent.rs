//! Idempotent and in-progress registries.
//!
//! The in-progress set guards a candidate from selection until its cycle
//! ends; the idempotent repository remembers files that were committed so
//! later polls skip them. Both are shared across threads and only expose
//! atomic check-and-insert operations.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::model::InProgressKey;

/// Registry of keys that were already processed.
pub trait IdempotentRepository: Send + Sync {
    /// Insert `key`; returns `false` if it was already present.
    fn add(&self, key: &str) -> bool;

    fn contains(&self, key: &str) -> bool;

    /// Remove `key`; returns `false` if it was absent.
    fn remove(&self, key: &str) -> bool;

    fn clear(&self);
}

/// Process-lifetime repository.
///
/// Unbounded by default: a key stays until it is removed explicitly. A
/// bounded repository evicts its oldest key once full, so an evicted file is
/// picked up again.
#[derive(Debug)]
pub struct MemoryIdempotentRepository {
    capacity: Option<usize>,
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl MemoryIdempotentRepository {
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            inner: Mutex::new(MemoryState::default()),
        }
    }

    /// Keep at most the `capacity` most recently added keys.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            inner: Mutex::new(MemoryState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.state().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryIdempotentRepository {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl IdempotentRepository for MemoryIdempotentRepository {
    fn add(&self, key: &str) -> bool {
        let mut state = self.state();
        if !state.keys.insert(key.to_string()) {
            return false;
        }
        let Some(capacity) = self.capacity else {
            return true;
        };
        state.order.push_back(key.to_string());
        while state.keys.len() > capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.keys.remove(&oldest);
        }
        true
    }

    fn contains(&self, key: &str) -> bool {
        self.state().keys.contains(key)
    }

    fn remove(&self, key: &str) -> bool {
        let mut state = self.state();
        if !state.keys.remove(key) {
            return false;
        }
        if self.capacity.is_some() {
            state.order.retain(|k| k != key);
        }
        true
    }

    fn clear(&self) {
        let mut state = self.state();
        state.keys.clear();
        state.order.clear();
    }
}

/// Per-endpoint view over the in-progress set and the idempotent repository.
#[derive(Clone)]
pub struct IdempotentTracker {
    in_progress: Arc<Mutex<HashSet<InProgressKey>>>,
    repository: Option<Arc<dyn IdempotentRepository>>,
}

impl std::fmt::Debug for IdempotentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentTracker")
            .field("in_progress", &self.in_progress_len())
            .field("idempotent", &self.repository.is_some())
            .finish()
    }
}

impl IdempotentTracker {
    /// `repository` is only consulted when the endpoint is idempotent.
    pub fn new(repository: Option<Arc<dyn IdempotentRepository>>) -> Self {
        Self {
            in_progress: Arc::new(Mutex::new(HashSet::new())),
            repository,
        }
    }

    fn in_progress(&self) -> MutexGuard<'_, HashSet<InProgressKey>> {
        self.in_progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically claim `key`. `None` means another cycle holds it; the
    /// returned claim releases the key when dropped.
    pub fn claim(&self, key: InProgressKey) -> Option<InProgressClaim> {
        self.try_begin(&key).then(|| InProgressClaim {
            tracker: self.clone(),
            key,
        })
    }

    /// Atomically claim `key`; `false` means another cycle holds it.
    pub fn try_begin(&self, key: &InProgressKey) -> bool {
        let claimed = self.in_progress().insert(key.clone());
        if !claimed {
            debug!(key = %key, "candidate already in progress");
        }
        claimed
    }

    /// Drop the claim on `key`. Returns `false` if it was not held.
    pub fn end(&self, key: &InProgressKey) -> bool {
        self.in_progress().remove(key)
    }

    pub fn is_in_progress(&self, key: &InProgressKey) -> bool {
        self.in_progress().contains(key)
    }

    pub fn in_progress_len(&self) -> usize {
        self.in_progress().len()
    }

    pub fn is_idempotent(&self) -> bool {
        self.repository.is_some()
    }

    /// True when the idempotent repository already holds `key`.
    pub fn is_done(&self, key: &str) -> bool {
        self.repository
            .as_ref()
            .is_some_and(|repository| repository.contains(key))
    }

    /// Record a successful commit.
    pub fn mark_done(&self, key: &str) {
        if let Some(repository) = &self.repository {
            repository.add(key);
        }
    }
}

/// An in-progress key held by one cycle.
///
/// Dropping the claim removes the key, including while a panic unwinds.
#[must_use = "dropping the claim releases the in-progress key"]
pub struct InProgressClaim {
    tracker: IdempotentTracker,
    key: InProgressKey,
}

impl InProgressClaim {
    pub fn key(&self) -> &InProgressKey {
        &self.key
    }
}

impl std::fmt::Debug for InProgressClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InProgressClaim").field(&self.key).finish()
    }
}

impl Drop for InProgressClaim {
    fn drop(&mut self) {
        self.tracker.end(&self.key);
    }
}
