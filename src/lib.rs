//! # Memory Container
//!
//! Container-scoped task groups that share lazily allocated memory objects
//! and per-object locks.
//!
//! Tasks join a container by ID. Within a container, the first request to
//! map an object ID allocates its backing; every later request from any
//! member gets the same storage, so writes by one member are visible to all.
//! Members serialize access to an object with its lock. When the last member
//! leaves, the container and everything it owns is released at once.
//!
//! ## Features
//!
//! - **Shared objects**: memfd + `MAP_SHARED`, one allocation per (container, object)
//! - **Object locks**: blocking, binary, released on teardown
//! - **Control surface**: create, delete, lock, unlock, free, plus the mapping hook
//! - **Portable storage**: registry logic runs over any [`BackingStore`](memory::BackingStore)
//!
//! ## Quick Start
//!
//! ```rust
//! use memory_container::prelude::*;
//!
//! let registry = Registry::new(RegistryConfig::default());
//! let (a, b) = (TaskId(1), TaskId(2));
//!
//! registry.join_or_create(ContainerId(7), a)?;
//! registry.join_or_create(ContainerId(7), b)?;
//!
//! let view_a = registry.map(a, ObjectId(3), 4096)?;
//! let view_b = registry.map(b, ObjectId(3), 4096)?;
//! view_a.write_at(0, &[42]);
//!
//! let mut byte = [0u8];
//! view_b.read_at(0, &mut byte);
//! assert_eq!(byte[0], 42);
//!
//! registry.leave(a);
//! registry.leave(b);
//! assert_eq!(registry.container_count(), 0);
//! # Ok::<(), memory_container::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod ids;
pub mod lock;
pub mod memory;
pub mod observability;
pub mod registry;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{BackingKind, JoinPolicy, RegistryConfig};
    pub use crate::dispatch::{Command, CommandRecord, Dispatcher};
    pub use crate::error::{Error, Result};
    pub use crate::identity::{FixedIdentity, TaskIdentity, ThreadIdentity};
    pub use crate::ids::{ContainerId, ObjectId, TaskId};
    pub use crate::memory::{FrameDescriptor, Mapping};
    pub use crate::registry::Registry;
}

pub use error::{Error, Result};
