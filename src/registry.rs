//! The container registry.
//!
//! [`Registry`] owns every live container and is the only shared mutable
//! structure of the subsystem. One mutex guards all structural state
//! (containers, membership, object and lock tables). It is held for map
//! operations only, never while a caller waits on an object lock.
//!
//! # Example
//!
//! ```rust
//! use memory_container::ids::{ContainerId, ObjectId, TaskId};
//! use memory_container::registry::Registry;
//! use memory_container::config::RegistryConfig;
//!
//! let registry = Registry::new(RegistryConfig::default());
//! let (a, b) = (TaskId(1), TaskId(2));
//!
//! registry.join_or_create(ContainerId(7), a).unwrap();
//! registry.join_or_create(ContainerId(7), b).unwrap();
//!
//! let view_a = registry.map(a, ObjectId(3), 4096).unwrap();
//! let view_b = registry.map(b, ObjectId(3), 4096).unwrap();
//! assert_eq!(view_a.frame(), view_b.frame());
//!
//! registry.lock(a, ObjectId(3)).unwrap();
//! view_a.write_at(0, b"hello");
//! registry.unlock(a, ObjectId(3)).unwrap();
//!
//! let mut out = [0u8; 5];
//! view_b.read_at(0, &mut out);
//! assert_eq!(&out, b"hello");
//! ```

use crate::config::{JoinPolicy, RegistryConfig};
use crate::container::{Container, ContainerSnapshot};
use crate::error::{Error, Result};
use crate::ids::{ContainerId, ObjectId, TaskId};
use crate::memory::{BackingStore, FrameDescriptor, Mapping, MemoryObject, store_for};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Process-wide owner of all containers.
pub struct Registry {
    state: Mutex<RegistryState>,
    /// Signalled whenever membership or a container's turn changes.
    turn_changed: Condvar,
    store: Arc<dyn BackingStore>,
    config: RegistryConfig,
}

struct RegistryState {
    containers: HashMap<ContainerId, Container>,
    /// Task -> container index; a task is in at most one container.
    membership: HashMap<TaskId, ContainerId>,
}

/// Outcome of resolving a mapping request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Container the object lives in.
    pub container: ContainerId,
    /// Descriptor of the object's storage.
    pub frame: FrameDescriptor,
    /// Whether this request allocated the object.
    pub created: bool,
}

impl RegistryState {
    fn container_of(&self, task: TaskId) -> Result<ContainerId> {
        self.membership
            .get(&task)
            .copied()
            .ok_or(Error::NotInContainer)
    }

    fn container_mut(&mut self, task: TaskId) -> Result<&mut Container> {
        let cid = self.container_of(task)?;
        self.containers.get_mut(&cid).ok_or(Error::NotInContainer)
    }
}

impl Registry {
    /// Create a registry with the store selected by `config`.
    pub fn new(config: RegistryConfig) -> Self {
        let store = store_for(&config);
        Self::with_store(config, store)
    }

    /// Create a registry over a caller-provided backing store.
    pub fn with_store(config: RegistryConfig, store: Arc<dyn BackingStore>) -> Self {
        tracing::debug!(
            join_policy = ?config.join_policy,
            backing = ?store.kind(),
            "registry started"
        );
        Self {
            state: Mutex::new(RegistryState {
                containers: HashMap::new(),
                membership: HashMap::new(),
            }),
            turn_changed: Condvar::new(),
            store,
            config,
        }
    }

    /// The registry's configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The backing store objects are allocated from.
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap()
    }

    // =========================================================================
    // Container lifecycle
    // =========================================================================

    /// Add `task` to container `cid`, creating the container if needed.
    ///
    /// Joining the container the task is already in is a no-op. A task that
    /// belongs to a different container leaves it first, which may tear
    /// that container down.
    ///
    /// Under [`JoinPolicy::Parked`] this blocks until the task holds the
    /// container's turn.
    ///
    /// # Errors
    ///
    /// - [`Error::AllocationFailed`] if the registry cannot grow.
    /// - [`Error::NotInContainer`] if a parked task is removed before its turn.
    pub fn join_or_create(&self, cid: ContainerId, task: TaskId) -> Result<ContainerId> {
        let mut state = self.lock_state();

        match state.membership.get(&task).copied() {
            Some(current) if current == cid => return Ok(cid),
            Some(current) => {
                tracing::debug!(
                    task = %task,
                    from = %current,
                    to = %cid,
                    "moving task between containers"
                );
                self.remove_task(&mut state, task);
            }
            None => {}
        }

        state
            .membership
            .try_reserve(1)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;
        if !state.containers.contains_key(&cid) {
            state
                .containers
                .try_reserve(1)
                .map_err(|e| Error::AllocationFailed(e.to_string()))?;
            state.containers.insert(cid, Container::new(cid));
            tracing::debug!(container = %cid, "container created");
        }

        let joined = state
            .containers
            .get_mut(&cid)
            .ok_or(Error::NotInContainer)
            .and_then(|container| container.add_member(task));
        if let Err(e) = joined {
            // Drop a container created above for this join.
            if state.containers.get(&cid).is_some_and(Container::is_empty) {
                state.containers.remove(&cid);
            }
            return Err(e);
        }
        state.membership.insert(task, cid);
        tracing::debug!(container = %cid, task = %task, "task joined");

        if self.config.join_policy == JoinPolicy::Parked {
            self.wait_for_turn(state, cid, task)?;
        }
        Ok(cid)
    }

    fn wait_for_turn(
        &self,
        mut state: MutexGuard<'_, RegistryState>,
        cid: ContainerId,
        task: TaskId,
    ) -> Result<()> {
        loop {
            if state.membership.get(&task) != Some(&cid) {
                return Err(Error::NotInContainer);
            }
            let active = state.containers.get(&cid).and_then(Container::active);
            if active == Some(task) {
                return Ok(());
            }
            tracing::trace!(container = %cid, task = %task, "parked until turn");
            state = self.turn_changed.wait(state).unwrap();
        }
    }

    /// Remove `task` from its container.
    ///
    /// If the task was the last member, the container is torn down in the
    /// same exclusion window: every object is released and every lock is
    /// retired. Returns the container left, or `None` if the task was not a
    /// member of any container.
    pub fn leave(&self, task: TaskId) -> Option<ContainerId> {
        let mut state = self.lock_state();
        self.remove_task(&mut state, task)
    }

    fn remove_task(&self, state: &mut RegistryState, task: TaskId) -> Option<ContainerId> {
        let cid = state.membership.remove(&task)?;

        // The last member's locks are retired with the container rather
        // than handed to waiters.
        let emptied = match state.containers.get_mut(&cid) {
            Some(container) if container.members() == [task] => true,
            Some(container) => {
                container.remove_member(task);
                false
            }
            None => false,
        };
        tracing::debug!(container = %cid, task = %task, "task left");

        if emptied {
            if let Some(container) = state.containers.remove(&cid) {
                let report = container.teardown(&*self.store);
                tracing::debug!(
                    container = %cid,
                    objects = report.objects,
                    locks = report.locks,
                    "container destroyed"
                );
            }
        }

        self.turn_changed.notify_all();
        Some(cid)
    }

    /// The container `task` belongs to.
    pub fn find_by_task(&self, task: TaskId) -> Option<ContainerId> {
        self.lock_state().membership.get(&task).copied()
    }

    /// Members of `cid` in join order, or `None` if it does not exist.
    pub fn members(&self, cid: ContainerId) -> Option<Vec<TaskId>> {
        self.lock_state()
            .containers
            .get(&cid)
            .map(|c| c.members().to_vec())
    }

    /// The member of `cid` holding the turn.
    pub fn active_task(&self, cid: ContainerId) -> Option<TaskId> {
        self.lock_state().containers.get(&cid).and_then(Container::active)
    }

    /// Whether container `cid` is live.
    pub fn contains_container(&self, cid: ContainerId) -> bool {
        self.lock_state().containers.contains_key(&cid)
    }

    /// Number of live containers.
    pub fn container_count(&self) -> usize {
        self.lock_state().containers.len()
    }

    /// Object IDs registered in `cid`, sorted.
    pub fn object_ids(&self, cid: ContainerId) -> Option<Vec<ObjectId>> {
        self.lock_state().containers.get(&cid).map(Container::object_ids)
    }

    /// Lock IDs registered in `cid`, sorted.
    pub fn lock_ids(&self, cid: ContainerId) -> Option<Vec<ObjectId>> {
        self.lock_state().containers.get(&cid).map(Container::lock_ids)
    }

    /// Point-in-time view of every live container, sorted by ID.
    pub fn snapshot(&self) -> Vec<ContainerSnapshot> {
        let state = self.lock_state();
        let mut snapshot: Vec<_> = state.containers.values().map(Container::snapshot).collect();
        snapshot.sort_unstable_by_key(|c| c.id);
        snapshot
    }

    /// Tear down every container.
    ///
    /// Tasks blocked on object locks wake with `ContainerDestroyed`; parked
    /// joiners wake with `NotInContainer`.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        Self::teardown_all(&mut state, &*self.store);
        self.turn_changed.notify_all();
    }

    fn teardown_all(state: &mut RegistryState, store: &dyn BackingStore) {
        state.membership.clear();
        for (cid, container) in state.containers.drain() {
            let report = container.teardown(store);
            tracing::debug!(
                container = %cid,
                objects = report.objects,
                locks = report.locks,
                "container destroyed at shutdown"
            );
        }
    }

    // =========================================================================
    // Memory objects
    // =========================================================================

    /// Find or allocate object `oid` in `task`'s container.
    ///
    /// The lookup-or-insert runs inside the exclusion window, so concurrent
    /// first requests for the same object allocate it once and all receive
    /// the same descriptor. A new object is `len` bytes (page-rounded if
    /// configured); an existing object is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInContainer`] if `task` has no container.
    /// - [`Error::AllocationFailed`] if `len` is zero or allocation fails;
    ///   nothing is registered.
    pub fn resolve_mapping(&self, task: TaskId, oid: ObjectId, len: usize) -> Result<Resolution> {
        let mut state = self.lock_state();
        self.resolve_locked(&mut state, task, oid, len)
    }

    fn resolve_locked(
        &self,
        state: &mut RegistryState,
        task: TaskId,
        oid: ObjectId,
        len: usize,
    ) -> Result<Resolution> {
        if len == 0 {
            return Err(Error::AllocationFailed(
                "mapping length must be greater than 0".into(),
            ));
        }

        let container = state.container_mut(task)?;
        let cid = container.id();

        if let Some(object) = container.object_mut(oid) {
            return Ok(Resolution {
                container: cid,
                frame: object.hand_out().clone(),
                created: false,
            });
        }

        let mut object = MemoryObject::allocate(&*self.store, oid, self.config.object_len(len))?;
        let frame = object.hand_out().clone();
        container.insert_object(object)?;
        tracing::debug!(container = %cid, object = %oid, size = frame.len(), "object allocated");

        Ok(Resolution {
            container: cid,
            frame,
            created: true,
        })
    }

    /// Undo the insertion made by a [`resolve_mapping`](Self::resolve_mapping)
    /// whose installation failed.
    ///
    /// Only an object this resolution created, that is still registered with
    /// the same frame, and that no other request has been handed, is
    /// removed. Returns whether anything was removed.
    pub fn rollback_mapping(&self, resolution: &Resolution) -> bool {
        let mut state = self.lock_state();
        self.rollback_locked(&mut state, resolution)
    }

    fn rollback_locked(&self, state: &mut RegistryState, resolution: &Resolution) -> bool {
        if !resolution.created {
            return false;
        }

        let Some(container) = state.containers.get_mut(&resolution.container) else {
            return false;
        };
        let oid = resolution.frame.object();
        let sole_holder = container.object(oid).is_some_and(|object| {
            object.frame() == &resolution.frame && object.handed_out() == 1
        });
        if !sole_holder {
            return false;
        }

        if let Some(object) = container.remove_object(oid) {
            object.release(&*self.store);
            tracing::debug!(
                container = %resolution.container,
                object = %oid,
                "object rolled back"
            );
        }
        true
    }

    /// Resolve object `oid` for `task` and install it into the caller's
    /// address space.
    ///
    /// A newly allocated object is installed before the exclusion window
    /// closes, so no other member can be handed it until it is committed.
    /// If that installation fails the object is removed again and the
    /// registry is left as it was.
    ///
    /// # Errors
    ///
    /// [`Error::NotInContainer`], [`Error::AllocationFailed`] or
    /// [`Error::RemapFailed`].
    pub fn map(&self, task: TaskId, oid: ObjectId, len: usize) -> Result<Mapping> {
        let mut state = self.lock_state();
        let resolution = self.resolve_locked(&mut state, task, oid, len)?;

        if resolution.created {
            let installed = self.store.install(&resolution.frame, len);
            if installed.is_err() {
                self.rollback_locked(&mut state, &resolution);
            }
            drop(state);
            return installed.map_err(|e| Self::install_failed(task, oid, e));
        }

        drop(state);
        self.store
            .install(&resolution.frame, len)
            .map_err(|e| Self::install_failed(task, oid, e))
    }

    fn install_failed(task: TaskId, oid: ObjectId, error: Error) -> Error {
        tracing::warn!(
            task = %task,
            object = %oid,
            error = %error,
            "mapping installation failed"
        );
        match error {
            Error::RemapFailed(msg) => Error::RemapFailed(msg),
            other => Error::RemapFailed(other.to_string()),
        }
    }

    /// Release object `oid` in `task`'s container.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInContainer`] if `task` has no container.
    /// - [`Error::ObjectNotFound`] if the object does not exist, including
    ///   when it was already freed.
    pub fn free(&self, task: TaskId, oid: ObjectId) -> Result<()> {
        let mut state = self.lock_state();
        let container = state.container_mut(task)?;
        let cid = container.id();
        let object = container.remove_object(oid).ok_or(Error::ObjectNotFound)?;
        object.release(&*self.store);
        tracing::debug!(container = %cid, object = %oid, "object freed");
        Ok(())
    }

    // =========================================================================
    // Object locks
    // =========================================================================

    /// Acquire lock `oid` in `task`'s container, creating it on first use.
    ///
    /// Blocks without a timeout while another task holds the lock. The
    /// registry mutex is released before blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInContainer`] if `task` has no container, including
    ///   when it leaves while waiting.
    /// - [`Error::ContainerDestroyed`] if the container is torn down while
    ///   waiting.
    pub fn lock(&self, task: TaskId, oid: ObjectId) -> Result<()> {
        let (cid, lock) = {
            let mut state = self.lock_state();
            let container = state.container_mut(task)?;
            let cid = container.id();
            let (lock, created) = container.lock_entry(oid)?;
            if created {
                tracing::debug!(container = %cid, object = %oid, "lock created");
            }
            (cid, lock)
        };

        lock.acquire(task)?;

        // A waiter that left its container must not keep the lock.
        let state = self.lock_state();
        if state.membership.get(&task) != Some(&cid) {
            lock.release_if_held_by(task);
            drop(state);
            tracing::debug!(
                task = %task,
                container = %cid,
                object = %oid,
                "lock handed to departed task, released"
            );
            return Err(Error::NotInContainer);
        }
        drop(state);

        tracing::trace!(task = %task, object = %oid, "lock acquired");
        Ok(())
    }

    /// Release lock `oid` in `task`'s container.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInContainer`] if `task` has no container.
    /// - [`Error::LockNotFound`] if the lock was never requested in this
    ///   container or is not currently held. Nothing changes.
    pub fn unlock(&self, task: TaskId, oid: ObjectId) -> Result<()> {
        let lock = {
            let state = self.lock_state();
            let cid = state.container_of(task)?;
            state
                .containers
                .get(&cid)
                .ok_or(Error::NotInContainer)?
                .lock(oid)
                .ok_or(Error::LockNotFound)?
        };

        let holder = lock.release()?;
        tracing::trace!(task = %task, holder = %holder, object = %oid, "lock released");
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            Self::teardown_all(state, &*self.store);
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("containers", &self.container_count())
            .finish()
    }
}
