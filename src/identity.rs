//! Sources for "the calling task".
//!
//! The registry never asks who is calling; the [`Dispatcher`](crate::dispatch::Dispatcher)
//! resolves the caller through a [`TaskIdentity`] and passes the resulting
//! [`TaskId`] into every operation.

use crate::ids::TaskId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Provides the identity of the task issuing the current call.
pub trait TaskIdentity: Send + Sync {
    /// The task on whose behalf the current operation runs.
    fn current_task(&self) -> TaskId;
}

/// Global counter for thread task IDs. Zero is never handed out.
static THREAD_TASK_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TASK: TaskId = TaskId(THREAD_TASK_COUNTER.fetch_add(1, Ordering::Relaxed));
}

/// Identifies each OS thread as its own task.
///
/// IDs are assigned on first use per thread and stay stable for the
/// thread's lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadIdentity;

impl ThreadIdentity {
    /// The task ID of the current thread.
    pub fn current() -> TaskId {
        THREAD_TASK.with(|id| *id)
    }
}

impl TaskIdentity for ThreadIdentity {
    fn current_task(&self) -> TaskId {
        Self::current()
    }
}

/// Always reports the same task.
///
/// Useful when one dispatcher is bound to one client, e.g. a per-connection
/// handle or a test harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedIdentity(pub TaskId);

impl TaskIdentity for FixedIdentity {
    fn current_task(&self) -> TaskId {
        self.0
    }
}
