//! Backing stores: allocate, describe, install and release object storage.
//!
//! The registry only talks to a [`BackingStore`], so the same container
//! logic runs over memfd pages or plain heap buffers.

use super::{Backing, FrameDescriptor, HeapBacking, Mapping, MemfdBacking};
use crate::config::{BackingKind, RegistryConfig};
use crate::error::{Error, Result};
use crate::ids::ObjectId;
use std::sync::Arc;

/// Allocates object storage and installs it into callers' address spaces.
pub trait BackingStore: Send + Sync {
    /// The kind of storage this store hands out.
    fn kind(&self) -> BackingKind;

    /// Allocate `len` zeroed bytes for object `oid`.
    ///
    /// Failures are reported as [`Error::AllocationFailed`].
    fn allocate(&self, oid: ObjectId, len: usize) -> Result<Arc<dyn Backing>>;

    /// Derive the descriptor of an allocation.
    fn describe(&self, oid: ObjectId, backing: &Arc<dyn Backing>) -> FrameDescriptor {
        FrameDescriptor::describe(oid, backing)
    }

    /// Install the first `len` bytes of `frame` into the caller's address space.
    ///
    /// Failures are reported as [`Error::RemapFailed`].
    fn install(&self, frame: &FrameDescriptor, len: usize) -> Result<Mapping>;

    /// Release an allocation. The storage is gone once the last reference drops.
    fn release(&self, backing: Arc<dyn Backing>) {
        tracing::trace!(frame = backing.frame_number(), len = backing.len(), "releasing backing");
        drop(backing);
    }
}

/// Build the store selected by `config`.
pub fn store_for(config: &RegistryConfig) -> Arc<dyn BackingStore> {
    match config.backing {
        BackingKind::Memfd => Arc::new(MemfdStore::new(config.name_prefix.clone())),
        BackingKind::Heap => Arc::new(HeapStore),
    }
}

/// Looks up a frame's allocation and checks the requested length fits.
fn live_backing(frame: &FrameDescriptor, len: usize) -> Result<Arc<dyn Backing>> {
    if len == 0 {
        return Err(Error::RemapFailed("mapping length must be greater than 0".into()));
    }
    if len > frame.len() {
        return Err(Error::RemapFailed(format!(
            "mapping of {} bytes exceeds object of {} bytes",
            len,
            frame.len()
        )));
    }
    frame
        .backing()
        .ok_or_else(|| Error::RemapFailed(format!("frame {} was released", frame.frame_number())))
}

/// Memfd-backed store. Each install is an independent `MAP_SHARED` mapping.
#[derive(Debug, Clone)]
pub struct MemfdStore {
    prefix: String,
}

impl MemfdStore {
    /// Create a store whose memfds are named `<prefix>:<oid>`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl BackingStore for MemfdStore {
    fn kind(&self) -> BackingKind {
        BackingKind::Memfd
    }

    fn allocate(&self, oid: ObjectId, len: usize) -> Result<Arc<dyn Backing>> {
        let name = format!("{}:{}", self.prefix, oid.id());
        let backing = MemfdBacking::new(&name, len).map_err(|e| match e {
            Error::AllocationFailed(msg) => Error::AllocationFailed(msg),
            other => Error::AllocationFailed(other.to_string()),
        })?;
        Ok(Arc::new(backing))
    }

    fn install(&self, frame: &FrameDescriptor, len: usize) -> Result<Mapping> {
        let backing = live_backing(frame, len)?;
        let fd = backing
            .raw_fd()
            .ok_or_else(|| Error::RemapFailed("frame is not fd-backed".into()))?;

        // SAFETY: `fd` is the memfd of a live allocation of `frame.len()` bytes,
        // and `len` was checked against it.
        let view = unsafe { MemfdBacking::from_raw_fd(fd, len) }
            .map_err(|e| Error::RemapFailed(e.to_string()))?;

        Ok(Mapping::new(frame.clone(), Arc::new(view), len))
    }
}

/// Heap-backed store. Installs share the allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStore;

impl BackingStore for HeapStore {
    fn kind(&self) -> BackingKind {
        BackingKind::Heap
    }

    fn allocate(&self, _oid: ObjectId, len: usize) -> Result<Arc<dyn Backing>> {
        Ok(Arc::new(HeapBacking::new(len)?))
    }

    fn install(&self, frame: &FrameDescriptor, len: usize) -> Result<Mapping> {
        let backing = live_backing(frame, len)?;
        Ok(Mapping::new(frame.clone(), backing, len))
    }
}
