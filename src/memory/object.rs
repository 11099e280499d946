//! Memory objects: a lazily allocated backing plus its frame descriptor.

use super::{Backing, BackingStore, FrameDescriptor};
use crate::error::Result;
use crate::ids::ObjectId;
use std::sync::Arc;

/// A shared memory object owned by one container.
///
/// The object exclusively owns its backing allocation: the allocation is
/// created with the object and released when the object is released.
pub struct MemoryObject {
    id: ObjectId,
    backing: Arc<dyn Backing>,
    frame: FrameDescriptor,
    handed_out: usize,
}

impl MemoryObject {
    /// Allocate a new zeroed object of `len` bytes from `store`.
    pub fn allocate(store: &dyn BackingStore, id: ObjectId, len: usize) -> Result<Self> {
        let backing = store.allocate(id, len)?;
        let frame = store.describe(id, &backing);
        Ok(Self {
            id,
            backing,
            frame,
            handed_out: 0,
        })
    }

    /// The object's ID.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Size of the backing allocation in bytes.
    pub fn size(&self) -> usize {
        self.backing.len()
    }

    /// Descriptor through which callers install the object.
    pub fn frame(&self) -> &FrameDescriptor {
        &self.frame
    }

    /// Hand the descriptor to one more requester.
    pub fn hand_out(&mut self) -> &FrameDescriptor {
        self.handed_out += 1;
        &self.frame
    }

    /// How many requests have been handed the descriptor.
    pub fn handed_out(&self) -> usize {
        self.handed_out
    }

    /// Release the backing allocation through `store`.
    pub fn release(self, store: &dyn BackingStore) {
        store.release(self.backing);
    }
}

impl std::fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObject")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("frame", &self.frame.frame_number())
            .field("handed_out", &self.handed_out)
            .finish()
    }
}
