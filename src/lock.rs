//! Per-object exclusive locks.
//!
//! An [`ObjectLock`] is a binary, non-reentrant lock that lives in a
//! container's lock table. Acquisition blocks without a timeout; the only
//! ways out are a release by a container member or retirement of the lock
//! when its container is torn down.

use crate::error::{Error, Result};
use crate::ids::{ObjectId, TaskId};
use std::sync::{Condvar, Mutex};

/// A binary lock guarding one shared object of a container.
///
/// Any member of the container may release a held lock. Re-acquiring a
/// lock the caller already holds blocks until someone else releases it.
pub struct ObjectLock {
    id: ObjectId,
    state: Mutex<LockState>,
    released: Condvar,
}

struct LockState {
    holder: Option<TaskId>,
    waiters: usize,
    retired: bool,
}

impl ObjectLock {
    /// Create an unlocked lock for object `id`.
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            state: Mutex::new(LockState {
                holder: None,
                waiters: 0,
                retired: false,
            }),
            released: Condvar::new(),
        }
    }

    /// The object this lock guards.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Acquire the lock for `task`, blocking until it is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContainerDestroyed`] if the lock is retired before or
    /// while waiting.
    pub fn acquire(&self, task: TaskId) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        state.waiters += 1;
        while state.holder.is_some() && !state.retired {
            state = self.released.wait(state).unwrap();
        }
        state.waiters -= 1;

        if state.retired {
            return Err(Error::ContainerDestroyed);
        }

        state.holder = Some(task);
        Ok(())
    }

    /// Release the lock, waking one waiter.
    ///
    /// Returns the task that held it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockNotFound`] if the lock is not held. Nothing changes
    /// in that case.
    pub fn release(&self) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        let holder = state.holder.take().ok_or(Error::LockNotFound)?;
        self.released.notify_one();
        Ok(holder)
    }

    /// Release the lock if `task` holds it.
    pub fn release_if_held_by(&self, task: TaskId) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.holder != Some(task) {
            return false;
        }
        state.holder = None;
        self.released.notify_one();
        true
    }

    /// Invalidate the lock, waking every waiter with `ContainerDestroyed`.
    pub fn retire(&self) {
        let mut state = self.state.lock().unwrap();
        state.retired = true;
        state.holder = None;
        self.released.notify_all();
    }

    /// The task currently holding the lock.
    pub fn holder(&self) -> Option<TaskId> {
        self.state.lock().unwrap().holder
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.holder().is_some()
    }

    /// Number of tasks blocked in [`acquire`](Self::acquire).
    pub fn waiters(&self) -> usize {
        self.state.lock().unwrap().waiters
    }

    /// Whether the lock has been retired.
    pub fn is_retired(&self) -> bool {
        self.state.lock().unwrap().retired
    }
}

impl std::fmt::Debug for ObjectLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ObjectLock")
            .field("id", &self.id)
            .field("holder", &state.holder)
            .field("waiters", &state.waiters)
            .field("retired", &state.retired)
            .finish()
    }
}
