// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Test doubles for the device, graphics and compositor seams.
//!
//! Everything here is deterministic and in-process: the mock engine backs
//! device pointers with host byte vectors, the mock graphics backend maps
//! its objects through that engine, and the recording compositor captures
//! the full request stream for ordering assertions. Shared handles are
//! cheap clones so a test can keep inspecting state it has moved into a
//! worker or a `RenderSurface`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::device::{AllocatorId, Copy2d, DeviceCopyEngine, DevicePtr, MapAccess, MemLocation};
use crate::core::domain::{PlatformCaps, SubsystemToken};
use crate::core::error::{Result, RouteError};
use crate::core::format::PixelFormat;
use crate::core::frame::{FrameBuffer, FrameBufferId, FrameStorage};
use crate::core::geometry::{Rect, Size};
use crate::core::interop::{
    GraphicsBackend, GraphicsContextId, GraphicsObjectId, InteropHandle, MapDirection,
};
use crate::surface::compositor::{BlendMode, Compositor, SurfaceHandle};

/// Forge a subsystem token without going through process-wide init.
pub fn subsystem_token() -> SubsystemToken {
    SubsystemToken::new()
}

/// Platform capabilities with the requested tokens present.
pub fn platform_caps(vendor_surface: bool, graphics_interop: bool) -> PlatformCaps {
    PlatformCaps {
        vendor_surface: vendor_surface.then(subsystem_token),
        graphics_interop: graphics_interop.then(subsystem_token),
        ..PlatformCaps::default()
    }
}

// ---- device engine ----

struct EngineState {
    next_addr: u64,
    allocations: BTreeMap<u64, Vec<u8>>,
}

/// Copy engine backed by host memory. Copies apply immediately; the stream
/// is modeled as already drained by the time `synchronize` runs.
pub struct MockDeviceEngine {
    allocator: AllocatorId,
    state: Mutex<EngineState>,
    context_depth: AtomicI64,
    fail_copies: AtomicUsize,
}

impl MockDeviceEngine {
    pub fn new(allocator: AllocatorId) -> Self {
        Self {
            allocator,
            state: Mutex::new(EngineState {
                next_addr: 0x1000,
                allocations: BTreeMap::new(),
            }),
            context_depth: AtomicI64::new(0),
            fail_copies: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` enqueued copies fail.
    pub fn inject_copy_failures(&self, n: usize) {
        self.fail_copies.store(n, Ordering::SeqCst);
    }

    /// Current push/pop nesting. Zero means every context was released.
    pub fn context_depth(&self) -> i64 {
        self.context_depth.load(Ordering::SeqCst)
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    fn resolve(state: &EngineState, ptr: DevicePtr, len: usize) -> Result<(u64, usize)> {
        let (base, data) = state
            .allocations
            .range(..=ptr.0)
            .next_back()
            .ok_or_else(|| RouteError::Resource(format!("unknown device pointer {ptr:?}")))?;
        let offset = (ptr.0 - base) as usize;
        if offset + len > data.len() {
            return Err(RouteError::Resource(format!(
                "device access of {len} bytes at {ptr:?} overruns allocation"
            )));
        }
        Ok((*base, offset))
    }

    fn read_device(state: &EngineState, ptr: DevicePtr, len: usize) -> Result<Vec<u8>> {
        let (base, offset) = Self::resolve(state, ptr, len)?;
        Ok(state.allocations[&base][offset..offset + len].to_vec())
    }

    fn write_device(state: &mut EngineState, ptr: DevicePtr, data: &[u8]) -> Result<()> {
        let (base, offset) = Self::resolve(state, ptr, data.len())?;
        let alloc = state
            .allocations
            .get_mut(&base)
            .ok_or_else(|| RouteError::Resource("allocation vanished".into()))?;
        alloc[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_row(state: &EngineState, loc: MemLocation, row_offset: usize, len: usize) -> Result<Vec<u8>> {
        match loc {
            MemLocation::Device(ptr) => Self::read_device(state, ptr.offset(row_offset), len),
            MemLocation::Host(ptr) => {
                // Test-only: the caller guarantees the host region stays
                // alive and unaliased for the duration of the copy.
                Ok(unsafe { std::slice::from_raw_parts(ptr.add(row_offset), len) }.to_vec())
            }
        }
    }

    fn write_row(state: &mut EngineState, loc: MemLocation, row_offset: usize, data: &[u8]) -> Result<()> {
        match loc {
            MemLocation::Device(ptr) => Self::write_device(state, ptr.offset(row_offset), data),
            MemLocation::Host(ptr) => {
                unsafe {
                    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(row_offset), data.len());
                }
                Ok(())
            }
        }
    }
}

impl DeviceCopyEngine for MockDeviceEngine {
    fn allocator_id(&self) -> AllocatorId {
        self.allocator
    }

    fn push_context(&self) -> Result<()> {
        self.context_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pop_context(&self) {
        let prev = self.context_depth.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "context popped without a matching push");
    }

    fn memcpy_2d_async(&self, desc: &Copy2d) -> Result<()> {
        if self.context_depth() <= 0 {
            return Err(RouteError::Resource(
                "copy enqueued without an execution context".into(),
            ));
        }
        if self
            .fail_copies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RouteError::Transfer("injected copy failure".into()));
        }
        let mut state = self.state.lock();
        for row in 0..desc.height as usize {
            let bytes = Self::read_row(&state, desc.src, row * desc.src_pitch, desc.width_bytes)?;
            Self::write_row(&mut state, desc.dst, row * desc.dst_pitch, &bytes)?;
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        if self.context_depth() <= 0 {
            return Err(RouteError::Resource(
                "synchronize without an execution context".into(),
            ));
        }
        Ok(())
    }

    fn alloc(&self, len: usize) -> Result<DevicePtr> {
        let mut state = self.state.lock();
        let base = state.next_addr;
        state.next_addr += (len.max(1) as u64).next_multiple_of(0x100);
        state.allocations.insert(base, vec![0u8; len]);
        Ok(DevicePtr(base))
    }

    fn free(&self, ptr: DevicePtr) {
        self.state.lock().allocations.remove(&ptr.0);
    }

    fn download(&self, src: DevicePtr, len: usize) -> Result<Vec<u8>> {
        Self::read_device(&self.state.lock(), src, len)
    }

    fn upload(&self, dst: DevicePtr, data: &[u8]) -> Result<()> {
        Self::write_device(&mut self.state.lock(), dst, data)
    }
}

/// Deterministic per-plane fill pattern.
fn pattern_byte(seed: u8, plane: usize, row: usize, col: usize) -> u8 {
    seed.wrapping_add((plane * 31) as u8)
        .wrapping_add((row * 7) as u8)
        .wrapping_add(col as u8)
}

/// Fill every plane of a system/device/vendor buffer with a deterministic
/// pattern. Stride padding is left zeroed.
pub fn fill_frame(
    buf: &FrameBuffer,
    engine: Option<&Arc<MockDeviceEngine>>,
    seed: u8,
) -> Result<()> {
    for (p, layout) in buf.plane_layouts().to_vec().iter().enumerate() {
        let mut plane = vec![0u8; layout.stride * layout.height as usize];
        for row in 0..layout.height as usize {
            for col in 0..layout.row_bytes() {
                plane[row * layout.stride + col] = pattern_byte(seed, p, row, col);
            }
        }
        match buf.storage() {
            FrameStorage::System { .. } => {
                buf.with_system_data(|data| {
                    data[layout.offset..layout.offset + plane.len()].copy_from_slice(&plane);
                });
            }
            FrameStorage::Device { ptr, .. } => {
                let engine =
                    engine.ok_or_else(|| RouteError::Resource("no engine for fill".into()))?;
                engine.upload(ptr.offset(layout.offset), &plane)?;
            }
            FrameStorage::VendorSurface { desc } => {
                let engine =
                    engine.ok_or_else(|| RouteError::Resource("no engine for fill".into()))?;
                engine.upload(desc.base.offset(layout.offset), &plane)?;
            }
            FrameStorage::GraphicsInterop { .. } => {
                return Err(RouteError::NotSupported(
                    "fill interop buffers through the mock backend".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Meaningful rows of every plane (stride padding stripped), concatenated
/// per plane. Two buffers holding the same image compare equal regardless
/// of their strides.
pub fn frame_rows(
    buf: &FrameBuffer,
    engine: Option<&Arc<MockDeviceEngine>>,
) -> Result<Vec<Vec<u8>>> {
    let mut planes = Vec::new();
    for layout in buf.plane_layouts().to_vec() {
        let raw = match buf.storage() {
            FrameStorage::System { .. } => buf
                .with_system_data(|data| {
                    data[layout.offset..layout.offset + layout.stride * layout.height as usize]
                        .to_vec()
                })
                .unwrap_or_default(),
            FrameStorage::Device { ptr, .. } => engine
                .ok_or_else(|| RouteError::Resource("no engine for readback".into()))?
                .download(ptr.offset(layout.offset), layout.stride * layout.height as usize)?,
            FrameStorage::VendorSurface { desc } => engine
                .ok_or_else(|| RouteError::Resource("no engine for readback".into()))?
                .download(
                    desc.base.offset(layout.offset),
                    layout.stride * layout.height as usize,
                )?,
            FrameStorage::GraphicsInterop { .. } => {
                return Err(RouteError::NotSupported(
                    "read interop buffers through the mock backend".into(),
                ));
            }
        };
        let mut rows = Vec::with_capacity(layout.row_bytes() * layout.height as usize);
        for row in 0..layout.height as usize {
            let start = row * layout.stride;
            rows.extend_from_slice(&raw[start..start + layout.row_bytes()]);
        }
        planes.push(rows);
    }
    Ok(planes)
}

// ---- graphics backend ----

/// One recorded graphics-backend operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxOp {
    Register(GraphicsObjectId),
    Unregister(InteropHandle),
    MarkPending {
        object: GraphicsObjectId,
        to_graphics: bool,
    },
    Map(InteropHandle),
    Unmap(InteropHandle),
    HostMap(GraphicsObjectId),
    HostUnmap(GraphicsObjectId),
}

#[derive(Default)]
struct GfxState {
    objects: HashMap<u64, Vec<u8>>,
    registered: HashMap<u64, u64>,
    mapped: HashMap<u64, (DevicePtr, MapDirection)>,
    next_handle: u64,
    ops: Vec<GfxOp>,
    fail_registers: usize,
    fail_maps: usize,
}

/// Graphics backend whose objects are plain byte vectors, mapped into the
/// mock engine's address space on demand. Clones share state, so a test can
/// keep a handle after moving the backend onto its worker thread.
#[derive(Clone)]
pub struct MockGraphicsBackend {
    context: GraphicsContextId,
    engine: Option<Arc<MockDeviceEngine>>,
    state: Arc<Mutex<GfxState>>,
}

impl MockGraphicsBackend {
    pub fn new(context: GraphicsContextId, engine: Arc<MockDeviceEngine>) -> Self {
        Self {
            context,
            engine: Some(engine),
            state: Arc::new(Mutex::new(GfxState::default())),
        }
    }

    /// Backend with no device engine attached; device mapping fails.
    pub fn new_standalone(context: GraphicsContextId) -> Self {
        Self {
            context,
            engine: None,
            state: Arc::new(Mutex::new(GfxState::default())),
        }
    }

    pub fn create_object(&self, object: GraphicsObjectId, len: usize) {
        self.state.lock().objects.insert(object.0, vec![0u8; len]);
    }

    pub fn set_object_bytes(&self, object: GraphicsObjectId, bytes: Vec<u8>) {
        self.state.lock().objects.insert(object.0, bytes);
    }

    pub fn object_bytes(&self, object: GraphicsObjectId) -> Option<Vec<u8>> {
        self.state.lock().objects.get(&object.0).cloned()
    }

    pub fn ops(&self) -> Vec<GfxOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn registered_count(&self) -> usize {
        self.state.lock().registered.len()
    }

    /// Make the next `n` mappings fail, device and host mappings alike.
    pub fn inject_map_failures(&self, n: usize) {
        self.state.lock().fail_maps = n;
    }

    pub fn inject_register_failures(&self, n: usize) {
        self.state.lock().fail_registers = n;
    }
}

impl GraphicsBackend for MockGraphicsBackend {
    fn context_id(&self) -> GraphicsContextId {
        self.context
    }

    fn is_device_compatible(&self) -> bool {
        self.engine.is_some()
    }

    fn register(&mut self, object: GraphicsObjectId) -> Result<InteropHandle> {
        let mut state = self.state.lock();
        state.ops.push(GfxOp::Register(object));
        if state.fail_registers > 0 {
            state.fail_registers -= 1;
            return Err(RouteError::Resource("injected register failure".into()));
        }
        if !state.objects.contains_key(&object.0) {
            return Err(RouteError::Resource(format!(
                "unknown graphics object {object:?}"
            )));
        }
        state.next_handle += 1;
        let handle = InteropHandle(state.next_handle);
        state.registered.insert(handle.0, object.0);
        Ok(handle)
    }

    fn unregister(&mut self, handle: InteropHandle) {
        let mut state = self.state.lock();
        state.ops.push(GfxOp::Unregister(handle));
        state.registered.remove(&handle.0);
    }

    fn mark_pending_transfer(&mut self, object: GraphicsObjectId, to_graphics: bool) {
        self.state.lock().ops.push(GfxOp::MarkPending {
            object,
            to_graphics,
        });
    }

    fn map(&mut self, handle: InteropHandle, dir: MapDirection) -> Result<DevicePtr> {
        let mut state = self.state.lock();
        state.ops.push(GfxOp::Map(handle));
        if state.fail_maps > 0 {
            state.fail_maps -= 1;
            return Err(RouteError::Resource("injected map failure".into()));
        }
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| RouteError::Resource("backend has no device engine".into()))?;
        let object = *state
            .registered
            .get(&handle.0)
            .ok_or_else(|| RouteError::Resource(format!("{handle:?} is not registered")))?;
        let bytes = state.objects[&object].clone();
        let ptr = engine.alloc(bytes.len())?;
        if dir == MapDirection::ReadOnly {
            engine.upload(ptr, &bytes)?;
        }
        state.mapped.insert(handle.0, (ptr, dir));
        Ok(ptr)
    }

    fn unmap(&mut self, handle: InteropHandle) {
        let mut state = self.state.lock();
        state.ops.push(GfxOp::Unmap(handle));
        let Some((ptr, dir)) = state.mapped.remove(&handle.0) else {
            return;
        };
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        if dir == MapDirection::WriteDiscard {
            if let Some(&object) = state.registered.get(&handle.0) {
                let len = state.objects[&object].len();
                if let Ok(bytes) = engine.download(ptr, len) {
                    state.objects.insert(object, bytes);
                }
            }
        }
        engine.free(ptr);
    }

    fn map_host(&mut self, object: GraphicsObjectId, _access: MapAccess) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.ops.push(GfxOp::HostMap(object));
        if state.fail_maps > 0 {
            state.fail_maps -= 1;
            return Err(RouteError::Resource("injected map failure".into()));
        }
        state
            .objects
            .get(&object.0)
            .cloned()
            .ok_or_else(|| RouteError::Resource(format!("unknown graphics object {object:?}")))
    }

    fn unmap_host(
        &mut self,
        object: GraphicsObjectId,
        data: Vec<u8>,
        access: MapAccess,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.ops.push(GfxOp::HostUnmap(object));
        if access.contains(MapAccess::WRITE) {
            state.objects.insert(object.0, data);
        }
        Ok(())
    }
}

// ---- compositor ----

/// One recorded compositor request.
#[derive(Clone, Debug, PartialEq)]
pub enum CompositorOp {
    CreateSurface(SurfaceHandle),
    CreateSubsurface {
        surface: SurfaceHandle,
        parent: SurfaceHandle,
    },
    DestroySurface(SurfaceHandle),
    Position {
        surface: SurfaceHandle,
        x: i32,
        y: i32,
    },
    Sync {
        surface: SurfaceHandle,
        sync: bool,
    },
    ViewportDestination {
        surface: SurfaceHandle,
        size: Size,
    },
    ViewportSource {
        surface: SurfaceHandle,
        rect: Rect,
    },
    ClearViewportSource(SurfaceHandle),
    AttachFrame {
        surface: SurfaceHandle,
        buffer: FrameBufferId,
    },
    AttachSolid {
        surface: SurfaceHandle,
        size: Size,
        format: PixelFormat,
        color: [u8; 4],
    },
    Detach(SurfaceHandle),
    BufferScale {
        surface: SurfaceHandle,
        scale: u32,
    },
    OpaqueRegion {
        surface: SurfaceHandle,
        region: Option<Rect>,
    },
    ClearInputRegion(SurfaceHandle),
    Blend {
        surface: SurfaceHandle,
        mode: BlendMode,
        alpha: f32,
    },
    Damage {
        surface: SurfaceHandle,
        rect: Rect,
    },
    Commit(SurfaceHandle),
    Flush,
}

#[derive(Default)]
struct CompState {
    next_surface: u64,
    ops: Vec<CompositorOp>,
    fail_surface_creation: bool,
}

/// Compositor double that records the request stream. Clones share state;
/// keep one and hand the other to `RenderSurface::new`.
#[derive(Clone, Default)]
pub struct RecordingCompositor {
    state: Arc<Mutex<CompState>>,
}

impl RecordingCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<CompositorOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn fail_surface_creation(&self, fail: bool) {
        self.state.lock().fail_surface_creation = fail;
    }

    /// Ops touching `surface`, in recorded order.
    pub fn ops_for(&self, surface: SurfaceHandle) -> Vec<CompositorOp> {
        self.ops()
            .into_iter()
            .filter(|op| op_surface(op) == Some(surface))
            .collect()
    }
}

fn op_surface(op: &CompositorOp) -> Option<SurfaceHandle> {
    use CompositorOp::*;
    match op {
        CreateSurface(s)
        | DestroySurface(s)
        | ClearViewportSource(s)
        | Detach(s)
        | ClearInputRegion(s)
        | Commit(s) => Some(*s),
        CreateSubsurface { surface, .. }
        | Position { surface, .. }
        | Sync { surface, .. }
        | ViewportDestination { surface, .. }
        | ViewportSource { surface, .. }
        | AttachFrame { surface, .. }
        | AttachSolid { surface, .. }
        | BufferScale { surface, .. }
        | OpaqueRegion { surface, .. }
        | Blend { surface, .. }
        | Damage { surface, .. } => Some(*surface),
        Flush => None,
    }
}

impl Compositor for RecordingCompositor {
    fn create_surface(&mut self) -> Result<SurfaceHandle> {
        let mut state = self.state.lock();
        if state.fail_surface_creation {
            return Err(RouteError::Resource("surface creation refused".into()));
        }
        state.next_surface += 1;
        let handle = SurfaceHandle(state.next_surface);
        state.ops.push(CompositorOp::CreateSurface(handle));
        Ok(handle)
    }

    fn create_subsurface(&mut self, surface: SurfaceHandle, parent: SurfaceHandle) -> Result<()> {
        self.state
            .lock()
            .ops
            .push(CompositorOp::CreateSubsurface { surface, parent });
        Ok(())
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        self.state.lock().ops.push(CompositorOp::DestroySurface(surface));
    }

    fn set_subsurface_position(&mut self, surface: SurfaceHandle, x: i32, y: i32) {
        self.state.lock().ops.push(CompositorOp::Position { surface, x, y });
    }

    fn set_sync(&mut self, surface: SurfaceHandle, sync: bool) {
        self.state.lock().ops.push(CompositorOp::Sync { surface, sync });
    }

    fn set_viewport_destination(&mut self, surface: SurfaceHandle, size: Size) {
        self.state
            .lock()
            .ops
            .push(CompositorOp::ViewportDestination { surface, size });
    }

    fn set_viewport_source(&mut self, surface: SurfaceHandle, rect: Rect) {
        self.state
            .lock()
            .ops
            .push(CompositorOp::ViewportSource { surface, rect });
    }

    fn clear_viewport_source(&mut self, surface: SurfaceHandle) {
        self.state
            .lock()
            .ops
            .push(CompositorOp::ClearViewportSource(surface));
    }

    fn attach_frame(&mut self, surface: SurfaceHandle, buffer: &FrameBuffer) {
        self.state.lock().ops.push(CompositorOp::AttachFrame {
            surface,
            buffer: buffer.id(),
        });
    }

    fn attach_solid(
        &mut self,
        surface: SurfaceHandle,
        size: Size,
        format: PixelFormat,
        color: [u8; 4],
    ) -> Result<()> {
        self.state.lock().ops.push(CompositorOp::AttachSolid {
            surface,
            size,
            format,
            color,
        });
        Ok(())
    }

    fn detach(&mut self, surface: SurfaceHandle) {
        self.state.lock().ops.push(CompositorOp::Detach(surface));
    }

    fn set_buffer_scale(&mut self, surface: SurfaceHandle, scale: u32) {
        self.state
            .lock()
            .ops
            .push(CompositorOp::BufferScale { surface, scale });
    }

    fn set_opaque_region(&mut self, surface: SurfaceHandle, region: Option<Rect>) {
        self.state
            .lock()
            .ops
            .push(CompositorOp::OpaqueRegion { surface, region });
    }

    fn clear_input_region(&mut self, surface: SurfaceHandle) {
        self.state.lock().ops.push(CompositorOp::ClearInputRegion(surface));
    }

    fn set_blend(&mut self, surface: SurfaceHandle, mode: BlendMode, alpha: f32) {
        self.state
            .lock()
            .ops
            .push(CompositorOp::Blend { surface, mode, alpha });
    }

    fn damage(&mut self, surface: SurfaceHandle, rect: Rect) {
        self.state.lock().ops.push(CompositorOp::Damage { surface, rect });
    }

    fn commit(&mut self, surface: SurfaceHandle) {
        self.state.lock().ops.push(CompositorOp::Commit(surface));
    }

    fn flush(&mut self) {
        self.state.lock().ops.push(CompositorOp::Flush);
    }
}
