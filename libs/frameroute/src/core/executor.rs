// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Transfer execution: staged, direct-device and graphics-interop copies.
//!
//! Every public operation is synchronous from the caller's point of view.
//! Device copies are enqueued asynchronously on the engine stream but are
//! synchronized before returning; interop copies rendezvous with the worker
//! thread that owns the graphics context.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::core::device::{
    Copy2d, DeviceCopyEngine, DevicePtr, MapAccess, MemLocation, ScopedDeviceContext,
};
use crate::core::error::{Result, RouteError};
use crate::core::frame::{FrameBuffer, FrameStorage, PlaneLayout};
use crate::core::interop::{
    GraphicsObjectId, InteropHandle, InteropResource, InteropWorkerHandle, MapDirection,
};
use crate::core::planner::{TransferPlan, TransferStrategy};

/// Executes transfer plans against a device copy engine and, for interop
/// strategies, a graphics worker. Either collaborator may be absent; plans
/// that need the missing one fail with a resource error.
pub struct TransferExecutor {
    engine: Option<Arc<dyn DeviceCopyEngine>>,
    interop: Option<InteropWorkerHandle>,
}

fn copy_rows(
    src: &[u8],
    src_layout: &PlaneLayout,
    dst: &mut [u8],
    dst_layout: &PlaneLayout,
) {
    let row = src_layout.row_bytes().min(dst_layout.row_bytes());
    let rows = src_layout.height.min(dst_layout.height) as usize;
    for r in 0..rows {
        let s = r * src_layout.stride;
        let d = r * dst_layout.stride;
        dst[d..d + row].copy_from_slice(&src[s..s + row]);
    }
}

fn check_compatible(src: &FrameBuffer, dst: &FrameBuffer) -> Result<()> {
    let (a, b) = (src.format(), dst.format());
    if a.format != b.format || a.width != b.width || a.height != b.height {
        return Err(RouteError::Negotiation(format!(
            "transfer cannot change format: {:?} {}x{} vs {:?} {}x{}",
            a.format, a.width, a.height, b.format, b.width, b.height
        )));
    }
    Ok(())
}

impl TransferExecutor {
    pub fn new(
        engine: Option<Arc<dyn DeviceCopyEngine>>,
        interop: Option<InteropWorkerHandle>,
    ) -> Self {
        Self { engine, interop }
    }

    fn engine(&self) -> Result<&Arc<dyn DeviceCopyEngine>> {
        self.engine
            .as_ref()
            .ok_or_else(|| RouteError::Resource("no device copy engine configured".into()))
    }

    fn worker(&self) -> Result<&InteropWorkerHandle> {
        self.interop
            .as_ref()
            .ok_or_else(|| RouteError::Resource("no graphics-interop worker configured".into()))
    }

    /// Run the plan's chosen strategy once. No fallback.
    pub fn execute(&self, src: &FrameBuffer, dst: &FrameBuffer, plan: &TransferPlan) -> Result<()> {
        check_compatible(src, dst)?;
        trace!(?plan, src = ?src.id(), dst = ?dst.id(), "executing transfer");
        self.run_strategy(plan.strategy, src, dst)
    }

    /// Run the plan, re-planning at most once on failure. A failure of the
    /// fallback strategy is final and the frame is lost.
    pub fn execute_with_fallback(
        &self,
        src: &FrameBuffer,
        dst: &FrameBuffer,
        plan: &TransferPlan,
    ) -> Result<()> {
        match self.execute(src, dst, plan) {
            Ok(()) => Ok(()),
            Err(err) => {
                let Some(fallback) = plan.fallback else {
                    return Err(err);
                };
                warn!(
                    error = %err,
                    "{:?} transfer failed, retrying once as {:?}",
                    plan.strategy, fallback
                );
                self.run_strategy(fallback, src, dst)
            }
        }
    }

    fn run_strategy(
        &self,
        strategy: TransferStrategy,
        src: &FrameBuffer,
        dst: &FrameBuffer,
    ) -> Result<()> {
        match strategy {
            TransferStrategy::Identity => Ok(()),
            TransferStrategy::Staged => self.staged_copy(src, dst),
            TransferStrategy::Direct => self.direct_copy(src, dst),
            TransferStrategy::Interop => self.interop_copy(src, dst),
        }
    }

    // ---- staged path ----

    /// Read every plane of `buf` into host memory, each `stride * height`
    /// bytes. Device memory goes through the engine staging download; interop
    /// objects are host-mapped on their worker thread.
    fn read_planes(&self, buf: &FrameBuffer) -> Result<Vec<Vec<u8>>> {
        let layouts = buf.plane_layouts().to_vec();
        match buf.storage() {
            FrameStorage::System { .. } => Ok(buf
                .with_system_data(|data| {
                    layouts
                        .iter()
                        .map(|l| data[l.offset..l.offset + l.stride * l.height as usize].to_vec())
                        .collect()
                })
                .unwrap_or_default()),
            FrameStorage::Device { ptr, .. } => self.download_planes(*ptr, &layouts),
            FrameStorage::VendorSurface { desc } => self.download_planes(desc.base, &layouts),
            FrameStorage::GraphicsInterop { objects, .. } => {
                let worker = self.worker()?;
                let objects = objects.clone();
                worker.submit(move |backend| {
                    let mut planes = Vec::with_capacity(objects.len());
                    for object in objects {
                        let data = backend.map_host(object, MapAccess::READ)?;
                        backend.unmap_host(object, Vec::new(), MapAccess::READ)?;
                        planes.push(data);
                    }
                    Ok(planes)
                })?
            }
        }
    }

    fn download_planes(&self, base: DevicePtr, layouts: &[PlaneLayout]) -> Result<Vec<Vec<u8>>> {
        let engine = self.engine()?;
        layouts
            .iter()
            .map(|l| engine.download(base.offset(l.offset), l.stride * l.height as usize))
            .collect()
    }

    /// Write per-plane host bytes back into `buf`'s storage.
    fn write_planes(&self, buf: &FrameBuffer, planes: Vec<Vec<u8>>) -> Result<()> {
        let layouts = buf.plane_layouts().to_vec();
        match buf.storage() {
            FrameStorage::System { .. } => {
                buf.with_system_data(|data| {
                    for (l, plane) in layouts.iter().zip(&planes) {
                        data[l.offset..l.offset + plane.len()].copy_from_slice(plane);
                    }
                });
                Ok(())
            }
            FrameStorage::Device { ptr, .. } => self.upload_planes(*ptr, &layouts, &planes),
            FrameStorage::VendorSurface { desc } => {
                self.upload_planes(desc.base, &layouts, &planes)
            }
            FrameStorage::GraphicsInterop { objects, .. } => {
                let worker = self.worker()?;
                let jobs: Vec<(GraphicsObjectId, Vec<u8>)> =
                    objects.iter().copied().zip(planes).collect();
                worker.submit(move |backend| {
                    for (object, data) in jobs {
                        backend.map_host(object, MapAccess::WRITE)?;
                        backend.unmap_host(object, data, MapAccess::WRITE)?;
                    }
                    Ok(())
                })?
            }
        }
    }

    fn upload_planes(
        &self,
        base: DevicePtr,
        layouts: &[PlaneLayout],
        planes: &[Vec<u8>],
    ) -> Result<()> {
        let engine = self.engine()?;
        for (l, plane) in layouts.iter().zip(planes) {
            engine.upload(base.offset(l.offset), plane)?;
        }
        Ok(())
    }

    /// Row-strided copy through addressable memory, honoring both pitches.
    fn staged_copy(&self, src: &FrameBuffer, dst: &FrameBuffer) -> Result<()> {
        let src_planes = self.read_planes(src)?;
        let mut dst_planes: Vec<Vec<u8>> = dst
            .plane_layouts()
            .iter()
            .map(|l| vec![0u8; l.stride * l.height as usize])
            .collect();
        for ((sp, sl), (dp, dl)) in src_planes
            .iter()
            .zip(src.plane_layouts())
            .zip(dst_planes.iter_mut().zip(dst.plane_layouts()))
        {
            copy_rows(sp, sl, dp, dl);
        }
        self.write_planes(dst, dst_planes)
    }

    // ---- direct path ----

    fn device_base(buf: &FrameBuffer) -> Option<DevicePtr> {
        match buf.storage() {
            FrameStorage::Device { ptr, .. } => Some(*ptr),
            FrameStorage::VendorSurface { desc } => Some(desc.base),
            _ => None,
        }
    }

    /// Per-plane async 2D copies under a scoped device context, one
    /// synchronize after all planes. A plane failure aborts the rest but
    /// still synchronizes and releases the context.
    fn direct_copy(&self, src: &FrameBuffer, dst: &FrameBuffer) -> Result<()> {
        let engine = self.engine()?;
        let src_base = Self::device_base(src).ok_or_else(|| {
            RouteError::NotSupported("direct copy source is not device-addressable".into())
        })?;
        let dst_base = Self::device_base(dst).ok_or_else(|| {
            RouteError::NotSupported("direct copy destination is not device-addressable".into())
        })?;

        let mut failed = None;
        {
            let _ctx = ScopedDeviceContext::acquire(engine.as_ref())?;
            for (sl, dl) in src.plane_layouts().iter().zip(dst.plane_layouts()) {
                let desc = Copy2d {
                    src: MemLocation::Device(src_base.offset(sl.offset)),
                    src_pitch: sl.stride,
                    dst: MemLocation::Device(dst_base.offset(dl.offset)),
                    dst_pitch: dl.stride,
                    width_bytes: sl.row_bytes().min(dl.row_bytes()),
                    height: sl.height.min(dl.height),
                };
                if let Err(e) = engine.memcpy_2d_async(&desc) {
                    failed = Some(e);
                    break;
                }
            }
            let sync = engine.synchronize();
            if failed.is_none() {
                failed = sync.err();
            }
        }
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ---- interop path ----

    /// Registered interop handles for every plane object, creating and
    /// caching them on the buffer the first time.
    fn ensure_registered(
        &self,
        buf: &FrameBuffer,
        objects: &[GraphicsObjectId],
    ) -> Result<Vec<(InteropHandle, GraphicsObjectId)>> {
        let worker = self.worker()?;
        let context = worker.context_id();
        if let Some(cached) = buf.cached_interop(context) {
            return Ok(cached.iter().map(|r| (r.handle(), r.object())).collect());
        }
        debug!(buffer = ?buf.id(), ?context, "registering graphics objects");
        let to_register = objects.to_vec();
        let handles = worker.submit(move |backend| -> Result<Vec<InteropHandle>> {
            let mut acquired = Vec::with_capacity(to_register.len());
            for object in to_register {
                match backend.register(object) {
                    Ok(handle) => acquired.push(handle),
                    Err(err) => {
                        // A partial registration rolls back before the error
                        // surfaces; a retried frame starts from a clean table.
                        for handle in acquired {
                            backend.unregister(handle);
                        }
                        return Err(err);
                    }
                }
            }
            Ok(acquired)
        })??;
        let resources: Vec<Arc<InteropResource>> = handles
            .iter()
            .zip(objects)
            .map(|(h, o)| Arc::new(InteropResource::new(*h, *o, worker.clone())))
            .collect();
        let pairs = resources.iter().map(|r| (r.handle(), r.object())).collect();
        buf.cache_interop(context, resources);
        Ok(pairs)
    }

    /// Copy between a graphics-interop buffer and a device-addressable one,
    /// entirely on the worker thread owning the graphics context.
    fn interop_copy(&self, src: &FrameBuffer, dst: &FrameBuffer) -> Result<()> {
        let to_graphics = matches!(dst.storage(), FrameStorage::GraphicsInterop { .. });
        let (gfx, other) = if to_graphics { (dst, src) } else { (src, dst) };
        let FrameStorage::GraphicsInterop { context, objects } = gfx.storage() else {
            return Err(RouteError::NotSupported(
                "interop copy without a graphics-interop endpoint".into(),
            ));
        };
        if matches!(other.storage(), FrameStorage::GraphicsInterop { .. }) {
            // Same domain on both sides is an identity as far as the plan is
            // concerned; nothing to move.
            return Ok(());
        }

        let worker = self.worker()?;
        if *context != worker.context_id() {
            return Err(RouteError::Resource(format!(
                "buffer belongs to graphics context {context:?}, worker owns {:?}",
                worker.context_id()
            )));
        }

        // A system-memory peer has no device address to copy against; route
        // the bytes through the worker's host mapping instead.
        let Some(other_base) = Self::device_base(other) else {
            trace!("interop peer is system memory, using host-mapped path");
            return self.staged_copy(src, dst);
        };

        // Device mapping needs the graphics context and the copy engine on
        // the same device; otherwise the fallback strategy takes over.
        if !worker.device_compatible() {
            return Err(RouteError::NotSupported(
                "graphics context does not share a device with the copy engine".into(),
            ));
        }

        let engine = Arc::clone(self.engine()?);
        let pairs = self.ensure_registered(gfx, objects)?;
        let gfx_layouts = gfx.plane_layouts().to_vec();
        let other_layouts = other.plane_layouts().to_vec();
        let dir = if to_graphics {
            MapDirection::WriteDiscard
        } else {
            MapDirection::ReadOnly
        };

        worker.submit(move |backend| -> Result<()> {
            let _ctx = ScopedDeviceContext::acquire(engine.as_ref())?;
            let mut failed = None;
            for (((handle, object), gl), ol) in
                pairs.iter().copied().zip(&gfx_layouts).zip(&other_layouts)
            {
                backend.mark_pending_transfer(object, to_graphics);
                let mapped = match backend.map(handle, dir) {
                    Ok(p) => p,
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                };
                let other_loc = MemLocation::Device(other_base.offset(ol.offset));
                let desc = if to_graphics {
                    Copy2d {
                        src: other_loc,
                        src_pitch: ol.stride,
                        dst: MemLocation::Device(mapped),
                        dst_pitch: gl.stride,
                        width_bytes: ol.row_bytes().min(gl.row_bytes()),
                        height: ol.height.min(gl.height),
                    }
                } else {
                    Copy2d {
                        src: MemLocation::Device(mapped),
                        src_pitch: gl.stride,
                        dst: other_loc,
                        dst_pitch: ol.stride,
                        width_bytes: gl.row_bytes().min(ol.row_bytes()),
                        height: gl.height.min(ol.height),
                    }
                };
                let copied = engine.memcpy_2d_async(&desc);
                backend.unmap(handle);
                if let Err(e) = copied {
                    failed = Some(e);
                    break;
                }
            }
            let sync = engine.synchronize();
            if failed.is_none() {
                failed = sync.err();
            }
            match failed {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })?
    }
}
