//! Heap-backed memory region.

use super::Backing;
use super::segment::next_frame_number;
use crate::config::BackingKind;
use crate::error::{Error, Result};
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

/// A zero-initialized heap allocation.
///
/// Heap regions cannot be mapped a second time; every installed view of a
/// heap-backed object shares this allocation.
///
/// # Example
///
/// ```rust
/// use memory_container::memory::{Backing, HeapBacking};
///
/// let backing = HeapBacking::new(1024).unwrap();
/// assert_eq!(backing.len(), 1024);
/// ```
pub struct HeapBacking {
    /// Start of the allocation, owned as a `Box<[u8]>` of `len` bytes.
    ptr: NonNull<u8>,
    len: usize,
    frame: u64,
}

impl HeapBacking {
    /// Allocate `size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if size is 0 or the allocator
    /// cannot satisfy the request.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;
        data.resize(size, 0u8);

        let data: &mut [u8] = Box::leak(data.into_boxed_slice());
        let ptr = NonNull::from(data).cast::<u8>();

        Ok(Self {
            ptr,
            len: size,
            frame: next_frame_number(),
        })
    }
}

impl Backing for HeapBacking {
    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn frame_number(&self) -> u64 {
        self.frame
    }

    fn kind(&self) -> BackingKind {
        BackingKind::Heap
    }

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

impl Drop for HeapBacking {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: `ptr`/`len` came from `Box::leak` in `new` and are released once.
        drop(unsafe { Box::from_raw(slice) });
    }
}

// SAFETY: HeapBacking uniquely owns its allocation; concurrent access to the
// bytes is serialized by callers.
unsafe impl Send for HeapBacking {}
unsafe impl Sync for HeapBacking {}
