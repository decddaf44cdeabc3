// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Copy-engine seam: scoped execution context, async stream, strided 2D copies.
//!
//! The engine abstracts whatever device driver performs the copies. Its
//! contract mirrors the hardware model: copies are enqueued asynchronously on
//! a stream while an execution context is held, and a single synchronize
//! makes them visible. Mapping device memory goes through an explicit
//! staging download/upload pair.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

bitflags! {
    /// Access requested when mapping memory into host address space.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MapAccess: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Opaque device address. Only meaningful to the engine that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub fn offset(self, bytes: usize) -> Self {
        DevicePtr(self.0 + bytes as u64)
    }
}

/// Identity of the allocator context a device allocation came from.
/// Direct device-to-device copies require both sides to share one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocatorId(pub u64);

/// One side of a 2D copy: host-addressable or device memory.
#[derive(Clone, Copy, Debug)]
pub enum MemLocation {
    Host(*mut u8),
    Device(DevicePtr),
}

/// Per-plane strided 2D copy descriptor.
#[derive(Clone, Copy, Debug)]
pub struct Copy2d {
    pub src: MemLocation,
    pub src_pitch: usize,
    pub dst: MemLocation,
    pub dst_pitch: usize,
    pub width_bytes: usize,
    pub height: u32,
}

/// Device copy primitives.
///
/// Preconditions: `memcpy_2d_async` and `synchronize` are only valid while
/// the caller holds the execution context (see [`ScopedDeviceContext`]).
/// Postcondition of `synchronize`: every copy enqueued since the last
/// synchronize has completed.
pub trait DeviceCopyEngine: Send + Sync {
    /// Identity of this engine's allocator context.
    fn allocator_id(&self) -> AllocatorId;

    /// Push the execution context onto the calling thread.
    fn push_context(&self) -> Result<()>;

    /// Pop the execution context. Must be called once per successful push,
    /// on every path including failure.
    fn pop_context(&self);

    /// Enqueue a strided 2D copy on the engine stream.
    fn memcpy_2d_async(&self, desc: &Copy2d) -> Result<()>;

    /// Block until all enqueued copies complete.
    fn synchronize(&self) -> Result<()>;

    /// Allocate `len` bytes of device memory.
    fn alloc(&self, len: usize) -> Result<DevicePtr>;

    /// Release a device allocation.
    fn free(&self, ptr: DevicePtr);

    /// Staging read of device memory into host memory.
    fn download(&self, src: DevicePtr, len: usize) -> Result<Vec<u8>>;

    /// Staging write of host memory into device memory.
    fn upload(&self, dst: DevicePtr, data: &[u8]) -> Result<()>;
}

/// RAII guard for the push/pop-scoped execution context.
///
/// Any failure path after acquisition still pops the context on drop.
pub struct ScopedDeviceContext<'a> {
    engine: &'a dyn DeviceCopyEngine,
}

impl<'a> ScopedDeviceContext<'a> {
    pub fn acquire(engine: &'a dyn DeviceCopyEngine) -> Result<Self> {
        engine.push_context()?;
        Ok(Self { engine })
    }
}

impl Drop for ScopedDeviceContext<'_> {
    fn drop(&mut self) {
        self.engine.pop_context();
    }
}
