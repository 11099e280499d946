//! Backing allocation trait.

use crate::config::BackingKind;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for frame numbers.
static FRAME_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique frame number.
pub(crate) fn next_frame_number() -> u64 {
    FRAME_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A contiguous, exclusively owned region of memory backing one memory object
/// or one installed view of it.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Pointers remain valid for the lifetime of the backing
/// - The memory is released exactly once, when the backing is dropped
/// - Thread-safety requirements are met (Send + Sync)
pub trait Backing: Send + Sync {
    /// Get a raw pointer to the start of this region.
    fn as_ptr(&self) -> *const u8;

    /// Get a mutable pointer to the start of this region.
    ///
    /// Shared memory is mutable through every view; callers serialize
    /// access through the container's object locks.
    fn as_mut_ptr(&self) -> *mut u8;

    /// Total size of the region in bytes.
    fn len(&self) -> usize;

    /// Returns true if the region has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame number, unique per allocation for the life of the process.
    fn frame_number(&self) -> u64;

    /// The kind of store that produced this region.
    fn kind(&self) -> BackingKind;

    /// File descriptor through which another view of this region can be
    /// mapped, if the region is fd-backed.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Get the region as a byte slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other view writes to this memory while the
    /// slice is alive.
    unsafe fn as_slice(&self) -> &[u8] {
        // SAFETY: Caller guarantees no concurrent writers.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len()) }
    }

    /// Get the region as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure exclusive access to this memory across every
    /// view of it.
    #[allow(clippy::mut_from_ref)]
    unsafe fn as_mut_slice(&self) -> &mut [u8] {
        // SAFETY: Caller guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len()) }
    }
}
