//! Containers: a group of tasks sharing memory objects and locks.

use crate::error::{Error, Result};
use crate::ids::{ContainerId, ObjectId, TaskId};
use crate::lock::ObjectLock;
use crate::memory::{BackingStore, MemoryObject};
use std::collections::HashMap;
use std::sync::Arc;

/// A named group of tasks with its own object and lock namespaces.
///
/// Containers are owned by the [`Registry`](crate::registry::Registry) and
/// only mutated under its exclusion window.
pub struct Container {
    id: ContainerId,
    /// Members in join order, without duplicates.
    members: Vec<TaskId>,
    /// The member whose turn it is under `JoinPolicy::Parked`.
    active: Option<TaskId>,
    objects: HashMap<ObjectId, MemoryObject>,
    locks: HashMap<ObjectId, Arc<ObjectLock>>,
}

/// What a teardown released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    /// Memory objects whose backing was released.
    pub objects: usize,
    /// Locks that were retired.
    pub locks: usize,
}

impl Container {
    /// Create an empty container.
    pub fn new(id: ContainerId) -> Self {
        Self {
            id,
            members: Vec::new(),
            active: None,
            objects: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    /// The container's ID.
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Members in join order.
    pub fn members(&self) -> &[TaskId] {
        &self.members
    }

    /// Whether `task` is a member.
    pub fn contains(&self, task: TaskId) -> bool {
        self.members.contains(&task)
    }

    /// Whether the container has no members left.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The member holding the turn.
    pub fn active(&self) -> Option<TaskId> {
        self.active
    }

    /// Add `task` to the membership. Returns false if it was already a member.
    pub fn add_member(&mut self, task: TaskId) -> Result<bool> {
        if self.contains(task) {
            return Ok(false);
        }
        self.members
            .try_reserve(1)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;
        self.members.push(task);
        if self.active.is_none() {
            self.active = Some(task);
        }
        Ok(true)
    }

    /// Remove `task` from the membership.
    ///
    /// Locks held by the task are released, and if it held the turn, the
    /// turn passes to the member that joined after it.
    /// Returns false if `task` was not a member.
    pub fn remove_member(&mut self, task: TaskId) -> bool {
        let Some(index) = self.members.iter().position(|&t| t == task) else {
            return false;
        };
        self.members.remove(index);

        for lock in self.locks.values() {
            if lock.release_if_held_by(task) {
                tracing::debug!(
                    container = %self.id,
                    task = %task,
                    object = %lock.id(),
                    "released lock of departing task"
                );
            }
        }

        if self.active == Some(task) {
            self.active = if self.members.is_empty() {
                None
            } else {
                Some(self.members[index % self.members.len()])
            };
        }
        true
    }

    /// Look up an object.
    pub fn object(&self, oid: ObjectId) -> Option<&MemoryObject> {
        self.objects.get(&oid)
    }

    /// Look up an object for modification.
    pub fn object_mut(&mut self, oid: ObjectId) -> Option<&mut MemoryObject> {
        self.objects.get_mut(&oid)
    }

    /// Insert a new object. An existing object with the same ID is returned.
    pub fn insert_object(&mut self, object: MemoryObject) -> Result<Option<MemoryObject>> {
        self.objects
            .try_reserve(1)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;
        Ok(self.objects.insert(object.id(), object))
    }

    /// Remove an object from the container, handing it to the caller to release.
    pub fn remove_object(&mut self, oid: ObjectId) -> Option<MemoryObject> {
        self.objects.remove(&oid)
    }

    /// Get the lock for `oid`, creating it unlocked if it does not exist.
    ///
    /// Returns the lock and whether it was created by this call.
    pub fn lock_entry(&mut self, oid: ObjectId) -> Result<(Arc<ObjectLock>, bool)> {
        if let Some(lock) = self.locks.get(&oid) {
            return Ok((Arc::clone(lock), false));
        }
        self.locks
            .try_reserve(1)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;
        let lock = Arc::new(ObjectLock::new(oid));
        self.locks.insert(oid, Arc::clone(&lock));
        Ok((lock, true))
    }

    /// Look up an existing lock.
    pub fn lock(&self, oid: ObjectId) -> Option<Arc<ObjectLock>> {
        self.locks.get(&oid).cloned()
    }

    /// Object IDs, sorted.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Lock IDs, sorted.
    pub fn lock_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.locks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Release every object and retire every lock.
    ///
    /// Tasks blocked on a retired lock wake with `ContainerDestroyed`.
    pub fn teardown(mut self, store: &dyn BackingStore) -> TeardownReport {
        let mut report = TeardownReport::default();

        for (_, object) in self.objects.drain() {
            object.release(store);
            report.objects += 1;
        }
        for (_, lock) in self.locks.drain() {
            lock.retire();
            report.locks += 1;
        }
        self.members.clear();
        self.active = None;

        report
    }

    /// Point-in-time view of the container.
    pub fn snapshot(&self) -> ContainerSnapshot {
        let mut objects: Vec<_> = self
            .objects
            .values()
            .map(|o| (o.id(), o.size()))
            .collect();
        objects.sort_unstable();

        let mut locks: Vec<_> = self
            .locks
            .values()
            .map(|l| (l.id(), l.holder()))
            .collect();
        locks.sort_unstable();

        ContainerSnapshot {
            id: self.id,
            members: self.members.clone(),
            active: self.active,
            objects,
            locks,
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("members", &self.members)
            .field("objects", &self.objects.len())
            .field("locks", &self.locks.len())
            .finish()
    }
}

/// Point-in-time view of a container, for inspection and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// Container ID.
    pub id: ContainerId,
    /// Members in join order.
    pub members: Vec<TaskId>,
    /// Member holding the turn.
    pub active: Option<TaskId>,
    /// Objects and their sizes in bytes, sorted by ID.
    pub objects: Vec<(ObjectId, usize)>,
    /// Locks and their current holders, sorted by ID.
    pub locks: Vec<(ObjectId, Option<TaskId>)>,
}

impl std::fmt::Display for ContainerSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: members [", self.id)?;
        for (i, task) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", task.id())?;
        }
        write!(f, "], objects [")?;
        for (i, (oid, size)) in self.objects.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}B", oid.id(), size)?;
        }
        write!(f, "], locks [")?;
        for (i, (oid, holder)) in self.locks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match holder {
                Some(task) => write!(f, "{}@{}", oid.id(), task.id())?,
                None => write!(f, "{}", oid.id())?,
            }
        }
        write!(f, "]")
    }
}
