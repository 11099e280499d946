//! Shared memory backing using Linux memfd.
//!
//! Objects allocated here live in an anonymous memfd mapped `MAP_SHARED`.
//! Installing the object for another task maps the same fd again, so every
//! view addresses the same physical pages.

use super::Backing;
use super::segment::next_frame_number;
use crate::config::BackingKind;
use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::mm::{MapFlags, ProtFlags};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr::NonNull;

/// A memory region backed by Linux memfd (anonymous shared memory).
///
/// # Features
///
/// - Anonymous: No filesystem visibility (unlike `shm_open`)
/// - Zero-filled: `ftruncate` on a fresh memfd yields zeroed pages
/// - Auto-cleanup: Kernel reclaims memory when all mappings and fds are closed
pub struct MemfdBacking {
    /// The memfd file descriptor.
    fd: OwnedFd,
    /// Pointer to the mmap'd region.
    ptr: NonNull<u8>,
    /// Size of the region.
    len: usize,
    /// Frame number of this view.
    frame: u64,
    /// Optional name (for debugging).
    name: Option<String>,
}

impl MemfdBacking {
    /// Create a new zero-filled shared memory region.
    ///
    /// # Arguments
    ///
    /// * `name` - Debug name for the region (visible in `/proc/self/fd/`).
    /// * `size` - Size in bytes. Must be greater than 0.
    ///
    /// # Errors
    ///
    /// Returns an error if `memfd_create`, `ftruncate`, or `mmap` fails.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let cname = CString::new(name).map_err(|e| Error::AllocationFailed(e.to_string()))?;
        let fd = rustix::fs::memfd_create(&cname, rustix::fs::MemfdFlags::CLOEXEC)?;

        rustix::fs::ftruncate(&fd, size as u64)?;

        // SAFETY: `fd` was just sized to `size` bytes.
        let mut backing = unsafe { Self::from_fd(fd, size)? };
        backing.name = Some(name.to_string());
        Ok(backing)
    }

    /// Map an existing memfd.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `fd` is a valid memfd at least `size`
    /// bytes long.
    pub unsafe fn from_fd(fd: OwnedFd, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }

        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;

        Ok(Self {
            fd,
            ptr,
            len: size,
            frame: next_frame_number(),
            name: None,
        })
    }

    /// Create a second, independent mapping from a raw file descriptor.
    ///
    /// The fd is duplicated, so the new view keeps the pages alive on its own.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `fd` is a valid memfd at least `size`
    /// bytes long.
    pub unsafe fn from_raw_fd(fd: RawFd, size: usize) -> Result<Self> {
        let dup_fd = rustix::io::fcntl_dupfd_cloexec(unsafe { BorrowedFd::borrow_raw(fd) }, 0)?;
        unsafe { Self::from_fd(dup_fd, size) }
    }

    /// Get the debug name of this region.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Backing for MemfdBacking {
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
        BackingKind::Memfd
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.fd.as_raw_fd())
    }
}

impl Drop for MemfdBacking {
    fn drop(&mut self) {
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
        // fd is closed when OwnedFd is dropped
    }
}

// SAFETY: the mapping is process-wide and not tied to a thread; the fd is
// reference-counted by the kernel. Concurrent access to the bytes is
// serialized by callers.
unsafe impl Send for MemfdBacking {}
unsafe impl Sync for MemfdBacking {}

impl AsFd for MemfdBacking {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
