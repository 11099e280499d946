//! Frame descriptors and installed mappings.

use super::Backing;
use crate::ids::ObjectId;
use std::sync::{Arc, Weak};

/// What a task needs to install a memory object's storage into its own
/// address space.
///
/// Descriptors do not keep storage alive: once the object is freed or its
/// container is torn down, installing a stale descriptor fails. Two
/// descriptors are equal when they describe the same allocation.
#[derive(Clone)]
pub struct FrameDescriptor {
    object: ObjectId,
    frame: u64,
    len: usize,
    backing: Weak<dyn Backing>,
}

impl FrameDescriptor {
    /// Derive the descriptor of an allocation.
    pub fn describe(object: ObjectId, backing: &Arc<dyn Backing>) -> Self {
        Self {
            object,
            frame: backing.frame_number(),
            len: backing.len(),
            backing: Arc::downgrade(backing),
        }
    }

    /// The memory object this frame belongs to.
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Frame number of the backing allocation.
    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    /// Size of the backing allocation in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the frame has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the backing allocation has been released.
    pub fn is_released(&self) -> bool {
        self.backing.strong_count() == 0
    }

    /// The backing allocation, if it is still alive.
    pub fn backing(&self) -> Option<Arc<dyn Backing>> {
        self.backing.upgrade()
    }
}

impl PartialEq for FrameDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object && self.frame == other.frame && self.len == other.len
    }
}

impl Eq for FrameDescriptor {}

impl std::fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("object", &self.object)
            .field("frame", &self.frame)
            .field("len", &self.len)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A memory object installed into a task's address space.
///
/// For memfd-backed objects the view is a separate `mmap` of the object's
/// pages; for heap-backed objects it shares the allocation. Either way,
/// writes through one mapping are visible through every other mapping of
/// the same frame. Dropping the mapping unmaps it.
pub struct Mapping {
    frame: FrameDescriptor,
    view: Arc<dyn Backing>,
    len: usize,
}

impl Mapping {
    /// Wrap an installed view of `frame`, exposing its first `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the view.
    pub fn new(frame: FrameDescriptor, view: Arc<dyn Backing>, len: usize) -> Self {
        assert!(len <= view.len(), "mapping length exceeds view");
        Self { frame, view, len }
    }

    /// The descriptor this mapping was installed from.
    pub fn frame(&self) -> &FrameDescriptor {
        &self.frame
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapping has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start address of the mapping in this address space.
    pub fn as_ptr(&self) -> *const u8 {
        self.view.as_ptr()
    }

    /// Mutable start address of the mapping in this address space.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.view.as_mut_ptr()
    }

    /// Copy bytes out of the mapping.
    ///
    /// Concurrent writers in the same container should be excluded with the
    /// object's lock.
    ///
    /// # Panics
    ///
    /// Panics if `offset + buf.len()` exceeds the mapping.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) {
        self.check_range(offset, buf.len());
        // SAFETY: range checked above; the view is alive for `&self`.
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
    }

    /// Copy bytes into the mapping.
    ///
    /// # Panics
    ///
    /// Panics if `offset + data.len()` exceeds the mapping.
    pub fn write_at(&self, offset: usize, data: &[u8]) {
        self.check_range(offset, data.len());
        // SAFETY: range checked above; the view is alive for `&self`.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.as_mut_ptr().add(offset), data.len());
        }
    }

    /// Get the mapping as a byte slice.
    ///
    /// # Safety
    ///
    /// No other mapping of the same frame may be written while the slice is
    /// alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Get the mapping as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the frame across every
    /// mapping of it, typically by holding the object's lock.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    fn check_range(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "range {}..{} out of bounds for mapping of {} bytes",
            offset,
            offset.saturating_add(len),
            self.len
        );
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("frame", &self.frame)
            .field("addr", &self.as_ptr())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapBacking;

    fn heap(len: usize) -> Arc<dyn Backing> {
        Arc::new(HeapBacking::new(len).unwrap())
    }

    #[test]
    fn test_descriptor_equality_follows_allocation() {
        let a = heap(64);
        let b = heap(64);
        let first = FrameDescriptor::describe(ObjectId(1), &a);
        let again = FrameDescriptor::describe(ObjectId(1), &a);
        let other = FrameDescriptor::describe(ObjectId(1), &b);
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn test_descriptor_observes_release() {
        let backing = heap(64);
        let frame = FrameDescriptor::describe(ObjectId(2), &backing);
        assert!(!frame.is_released());
        drop(backing);
        assert!(frame.is_released());
        assert!(frame.backing().is_none());
    }

    #[test]
    fn test_mapping_read_write() {
        let backing = heap(128);
        let frame = FrameDescriptor::describe(ObjectId(3), &backing);
        let mapping = Mapping::new(frame, Arc::clone(&backing), 128);

        mapping.write_at(10, b"abc");
        let mut out = [0u8; 3];
        mapping.read_at(10, &mut out);
        assert_eq!(&out, b"abc");
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_mapping_write_out_of_bounds_panics() {
        let backing = heap(16);
        let frame = FrameDescriptor::describe(ObjectId(4), &backing);
        let mapping = Mapping::new(frame, backing, 16);
        mapping.write_at(15, b"xy");
    }
}
