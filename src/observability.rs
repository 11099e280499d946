//! Tracing integration for structured logging and spans.

use crate::container::ContainerSnapshot;
use crate::ids::TaskId;
use tracing::{Level, Span, span};

/// Create a span for one control operation issued by `task`.
///
/// # Example
///
/// ```rust,ignore
/// use memory_container::observability::span_operation;
///
/// let _guard = span_operation("lock", task).entered();
/// // Operation here...
/// ```
#[inline]
pub fn span_operation(operation: &'static str, task: TaskId) -> Span {
    span!(Level::DEBUG, "container_op", op = operation, task = task.id())
}

/// Log a failed operation.
#[inline]
pub fn trace_failure(operation: &'static str, task: TaskId, error: &crate::Error) {
    if error.is_lookup_miss() {
        tracing::debug!(op = operation, task = task.id(), error = %error, "operation missed");
    } else {
        tracing::warn!(op = operation, task = task.id(), error = %error, "operation failed");
    }
}

/// Log every live container.
pub fn trace_snapshot(snapshot: &[ContainerSnapshot]) {
    if snapshot.is_empty() {
        tracing::trace!("no live containers");
    }
    for container in snapshot {
        tracing::trace!(
            container = container.id.id(),
            members = container.members.len(),
            objects = container.objects.len(),
            locks = container.locks.len(),
            "{}",
            container
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ContainerId;

    #[test]
    fn test_span_creation_without_subscriber() {
        let span = span_operation("create", TaskId(1));
        let _guard = span.enter();
        trace_failure("create", TaskId(1), &crate::Error::LockNotFound);
        trace_snapshot(&[ContainerSnapshot {
            id: ContainerId(1),
            members: vec![TaskId(1)],
            active: Some(TaskId(1)),
            objects: Vec::new(),
            locks: Vec::new(),
        }]);
    }
}
