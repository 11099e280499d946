//! Memory object storage.
//!
//! This module provides the memory layer behind container objects: backing
//! allocations, the descriptors that identify them, and the mappings through
//! which tasks access them.
//!
//! # Architecture
//!
//! - [`Backing`]: Trait for an owned memory region (memfd or heap)
//! - [`BackingStore`]: Allocates, describes, installs and releases backings
//! - [`FrameDescriptor`]: What a task needs to install an object's storage
//! - [`Mapping`]: An installed view; writes are visible through every view
//! - [`MemoryObject`]: A container's object, owning exactly one backing
//!
//! # Example
//!
//! ```rust
//! use memory_container::ids::ObjectId;
//! use memory_container::memory::{BackingStore, MemfdStore, MemoryObject};
//!
//! let store = MemfdStore::new("doc");
//! let object = MemoryObject::allocate(&store, ObjectId(1), 4096).unwrap();
//!
//! let a = store.install(object.frame(), 4096).unwrap();
//! let b = store.install(object.frame(), 4096).unwrap();
//! a.write_at(0, b"hi");
//!
//! let mut out = [0u8; 2];
//! b.read_at(0, &mut out);
//! assert_eq!(&out, b"hi");
//! ```

mod frame;
mod heap;
mod object;
mod segment;
mod shared;
mod store;

pub use frame::{FrameDescriptor, Mapping};
pub use heap::HeapBacking;
pub use object::MemoryObject;
pub use segment::Backing;
pub use shared::MemfdBacking;
pub use store::{BackingStore, HeapStore, MemfdStore, store_for};
