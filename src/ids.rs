//! Identifiers for tasks, containers and memory objects.

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// Create a new identifier.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the numeric ID.
            pub const fn id(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }
    };
}

define_id!(
    /// Stable identifier of an execution context (thread or process).
    ///
    /// A task is a member of at most one container at a time.
    TaskId,
    "Task"
);

define_id!(
    /// Identifier of a container, chosen by the caller on create.
    ContainerId,
    "Container"
);

define_id!(
    /// Caller-chosen key of a shared memory object or lock within a container.
    ObjectId,
    "Object"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(TaskId::new(3).to_string(), "Task(3)");
        assert_eq!(ContainerId::from(7).to_string(), "Container(7)");
        assert_eq!(ObjectId(u64::MAX).id(), u64::MAX);
    }
}
