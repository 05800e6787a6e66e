//! The body-state store: the only shared mutable resource between the
//! orchestrator and the API façade.
//!
//! Every mutation of an existing record goes through a per-body
//! compare-and-set on a monotonically increasing version, so concurrent
//! writers (command application vs. physics merge) serialize without locks
//! held across component boundaries. Readers always receive value-copied
//! snapshots; no caller ever holds a reference into the store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::body::{Aabb, BodyId, RigidBody};

/// One stored record: the body, its commit version and its last committed
/// world AABB.
#[derive(Debug, Clone)]
pub struct StoredBody {
    pub body: RigidBody,
    /// Strictly increases with every committed write; never wraps in a run.
    pub version: u64,
    /// World AABB at the committed pose, kept in sync by the store.
    pub aabb: Aabb,
}

/// A single conditional write.
#[derive(Debug, Clone)]
pub struct BodyWrite {
    pub id: BodyId,
    /// The version the writer based its update on; the write succeeds only if
    /// the stored version still matches.
    pub expected_version: u64,
    pub body: RigidBody,
}

/// Result of a [`BodyStore::commit_batch`] call.
#[derive(Debug, Default, Clone)]
pub struct CommitOutcome {
    pub committed: Vec<BodyId>,
    pub conflicted: Vec<BodyId>,
}

/// Change-feed event: a body was committed at a new version.
#[derive(Debug, Clone, Copy)]
pub struct StoreEvent {
    pub id: BodyId,
    pub version: u64,
}

/// Contract the orchestrator (and the façade) program against.
///
/// Implementations must hand out point-in-time snapshots (no per-field
/// tearing) and guarantee single-writer-wins under CAS. The store outlives
/// the orchestrator: a restarted tick loop calls [`get_all`] and resumes.
///
/// [`get_all`]: BodyStore::get_all
pub trait BodyStore: Send + Sync {
    /// Snapshot of the requested bodies; missing or tombstoned ids omitted.
    fn get(&self, ids: &[BodyId]) -> HashMap<BodyId, StoredBody>;

    /// Snapshot of every live body.
    fn get_all(&self) -> HashMap<BodyId, StoredBody>;

    /// Apply the writes whose expected version still matches. On success a
    /// record's version becomes `expected_version + 1`.
    fn commit_batch(&self, writes: Vec<BodyWrite>) -> CommitOutcome;

    /// Insert a new body and return its id. Unconditional.
    fn add(&self, body: RigidBody) -> BodyId;

    /// Tombstone the given bodies. They vanish from reads immediately and
    /// reject commits, but their ids stay reserved until the next [`sweep`]
    /// so in-flight worker replies can be recognized and dropped.
    ///
    /// [`sweep`]: BodyStore::sweep
    fn remove(&self, ids: &[BodyId]);

    /// Drop tombstones from the previous tick. The orchestrator calls this
    /// once per tick at world load.
    fn sweep(&self);

    /// Subscribe to the change feed of committed writes.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-process store: a map behind a read/write lock.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

struct Inner {
    bodies: HashMap<BodyId, StoredBody>,
    tombstones: HashSet<BodyId>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                bodies: HashMap::new(),
                tombstones: HashSet::new(),
            }),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Number of live bodies.
    pub fn len(&self) -> usize {
        self.inner.read().bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, id: BodyId, version: u64) {
        // Nobody listening is fine; the feed is informational.
        let _ = self.events.send(StoreEvent { id, version });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyStore for InMemoryStore {
    fn get(&self, ids: &[BodyId]) -> HashMap<BodyId, StoredBody> {
        let inner = self.inner.read();
        ids.iter()
            .filter_map(|id| inner.bodies.get(id).map(|b| (*id, b.clone())))
            .collect()
    }

    fn get_all(&self) -> HashMap<BodyId, StoredBody> {
        self.inner.read().bodies.clone()
    }

    fn commit_batch(&self, writes: Vec<BodyWrite>) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        let mut committed = Vec::new();
        {
            let mut inner = self.inner.write();
            for write in writes {
                if inner.tombstones.contains(&write.id) {
                    trace!(id = %write.id, "commit dropped: body tombstoned");
                    outcome.conflicted.push(write.id);
                    continue;
                }
                match inner.bodies.get_mut(&write.id) {
                    Some(stored) if stored.version == write.expected_version => {
                        let version = write.expected_version + 1;
                        let aabb = write.body.world_aabb();
                        *stored = StoredBody {
                            body: write.body,
                            version,
                            aabb,
                        };
                        committed.push((write.id, version));
                        outcome.committed.push(write.id);
                    }
                    Some(stored) => {
                        trace!(
                            id = %write.id,
                            stored = stored.version,
                            expected = write.expected_version,
                            "commit lost the version race"
                        );
                        outcome.conflicted.push(write.id);
                    }
                    None => {
                        outcome.conflicted.push(write.id);
                    }
                }
            }
        }
        // Publish outside the write lock.
        for (id, version) in committed {
            self.publish(id, version);
        }
        outcome
    }

    fn add(&self, body: RigidBody) -> BodyId {
        let id = BodyId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let aabb = body.world_aabb();
        let stored = StoredBody {
            body,
            version: 1,
            aabb,
        };
        self.inner.write().bodies.insert(id, stored);
        debug!(%id, "body added");
        self.publish(id, 1);
        id
    }

    fn remove(&self, ids: &[BodyId]) {
        let mut inner = self.inner.write();
        for id in ids {
            if inner.bodies.remove(id).is_some() {
                inner.tombstones.insert(*id);
                debug!(%id, "body tombstoned");
            }
        }
    }

    fn sweep(&self) {
        let mut inner = self.inner.write();
        if !inner.tombstones.is_empty() {
            trace!(count = inner.tombstones.len(), "tombstones swept");
            inner.tombstones.clear();
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
