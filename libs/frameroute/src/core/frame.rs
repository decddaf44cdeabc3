// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame buffers: shared pixel-data handles tagged with a memory domain.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::device::{AllocatorId, DeviceCopyEngine, DevicePtr};
use crate::core::error::{Result, RouteError};
use crate::core::format::VideoFormatInfo;
use crate::core::interop::{GraphicsContextId, GraphicsObjectId, InteropResource};

/// Process-unique frame buffer identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameBufferId(u64);

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Byte layout of one plane within its backing storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub stride: usize,
    /// Plane width in samples.
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl PlaneLayout {
    /// Bytes in one meaningful row (excluding stride padding).
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }
}

/// Vendor-surface plane parameters, read from the surface's own descriptor
/// rather than recomputed from the format.
#[derive(Clone, Debug)]
pub struct VendorSurfaceDescriptor {
    pub base: DevicePtr,
    pub len: usize,
    pub allocator: AllocatorId,
    pub planes: Vec<PlaneLayout>,
}

/// Backing storage of a frame buffer, which determines its memory domain.
pub enum FrameStorage {
    /// Host-addressable bytes.
    System { data: Mutex<Vec<u8>> },
    /// Device allocation. `owner` is set only for allocations the core made
    /// itself; externally supplied device memory is never freed here.
    Device {
        ptr: DevicePtr,
        len: usize,
        allocator: AllocatorId,
        owner: Option<Arc<dyn DeviceCopyEngine>>,
    },
    /// Platform-native surface with self-describing plane layout.
    VendorSurface { desc: VendorSurfaceDescriptor },
    /// Graphics-API buffer objects, one per plane.
    GraphicsInterop {
        context: GraphicsContextId,
        objects: Vec<GraphicsObjectId>,
    },
}

struct FrameInner {
    id: FrameBufferId,
    format: VideoFormatInfo,
    planes: Vec<PlaneLayout>,
    storage: FrameStorage,
    /// Cached interop registrations keyed by worker context, one entry per
    /// plane. Lives and dies with the buffer; see `InteropResource::drop`.
    interop_cache: Mutex<HashMap<GraphicsContextId, Vec<Arc<InteropResource>>>>,
}

impl Drop for FrameInner {
    fn drop(&mut self) {
        if let FrameStorage::Device {
            ptr,
            owner: Some(engine),
            ..
        } = &self.storage
        {
            engine.free(*ptr);
        }
    }
}

/// Reference-counted frame buffer. Clone shares the same pixels; the last
/// reference releases core-owned backing storage and cached registrations.
#[derive(Clone)]
pub struct FrameBuffer {
    inner: Arc<FrameInner>,
}

fn tight_layouts(info: &VideoFormatInfo) -> Vec<PlaneLayout> {
    let mut offset = 0usize;
    (0..info.format.plane_count())
        .map(|p| {
            let (w, h) = info.format.plane_dimensions(p, info.width, info.height);
            let pinfo = info.format.plane_info(p);
            let stride = info.format.plane_row_bytes(p, info.width);
            let layout = PlaneLayout {
                offset,
                stride,
                width: w,
                height: h,
                bytes_per_pixel: pinfo.bytes_per_pixel,
            };
            offset += stride * h as usize;
            layout
        })
        .collect()
}

fn strided_layouts(info: &VideoFormatInfo, strides: &[usize]) -> Result<Vec<PlaneLayout>> {
    if strides.len() != info.format.plane_count() {
        return Err(RouteError::Configuration(format!(
            "expected {} strides, got {}",
            info.format.plane_count(),
            strides.len()
        )));
    }
    let mut offset = 0usize;
    let mut layouts = Vec::with_capacity(strides.len());
    for (p, &stride) in strides.iter().enumerate() {
        let (w, h) = info.format.plane_dimensions(p, info.width, info.height);
        let pinfo = info.format.plane_info(p);
        let row = info.format.plane_row_bytes(p, info.width);
        if stride < row {
            return Err(RouteError::Configuration(format!(
                "stride {stride} below row size {row} for plane {p}"
            )));
        }
        layouts.push(PlaneLayout {
            offset,
            stride,
            width: w,
            height: h,
            bytes_per_pixel: pinfo.bytes_per_pixel,
        });
        offset += stride * h as usize;
    }
    Ok(layouts)
}

impl FrameBuffer {
    fn from_parts(format: VideoFormatInfo, planes: Vec<PlaneLayout>, storage: FrameStorage) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                id: FrameBufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)),
                format,
                planes,
                storage,
                interop_cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Allocate a zero-filled system-memory buffer with tight strides.
    pub fn new_system(format: VideoFormatInfo) -> Self {
        let planes = tight_layouts(&format);
        let len = planes
            .iter()
            .map(|p| p.offset + p.stride * p.height as usize)
            .max()
            .unwrap_or(0);
        Self::from_parts(
            format,
            planes,
            FrameStorage::System {
                data: Mutex::new(vec![0u8; len]),
            },
        )
    }

    /// Allocate a zero-filled system-memory buffer with the given per-plane
    /// strides (each at least the plane row size).
    pub fn new_system_with_strides(format: VideoFormatInfo, strides: &[usize]) -> Result<Self> {
        let planes = strided_layouts(&format, strides)?;
        let len = planes
            .iter()
            .map(|p| p.offset + p.stride * p.height as usize)
            .max()
            .unwrap_or(0);
        Ok(Self::from_parts(
            format,
            planes,
            FrameStorage::System {
                data: Mutex::new(vec![0u8; len]),
            },
        ))
    }

    /// Allocate a device-memory buffer through the engine. Freed by the core
    /// when the last reference drops.
    pub fn new_device(format: VideoFormatInfo, engine: &Arc<dyn DeviceCopyEngine>) -> Result<Self> {
        let planes = tight_layouts(&format);
        let len = format.frame_size();
        let ptr = engine.alloc(len)?;
        Ok(Self::from_parts(
            format,
            planes,
            FrameStorage::Device {
                ptr,
                len,
                allocator: engine.allocator_id(),
                owner: Some(Arc::clone(engine)),
            },
        ))
    }

    /// Wrap externally owned device memory. Never freed by the core.
    pub fn from_device_memory(
        format: VideoFormatInfo,
        ptr: DevicePtr,
        len: usize,
        allocator: AllocatorId,
    ) -> Self {
        let planes = tight_layouts(&format);
        Self::from_parts(
            format,
            planes,
            FrameStorage::Device {
                ptr,
                len,
                allocator,
                owner: None,
            },
        )
    }

    /// Wrap a vendor surface. Plane layout comes from the descriptor itself
    /// and must agree with the negotiated format's plane count.
    pub fn from_vendor_surface(
        format: VideoFormatInfo,
        desc: VendorSurfaceDescriptor,
    ) -> Result<Self> {
        if desc.planes.len() != format.format.plane_count() {
            return Err(RouteError::Configuration(format!(
                "surface descriptor has {} planes, format {:?} needs {}",
                desc.planes.len(),
                format.format,
                format.format.plane_count()
            )));
        }
        let planes = desc.planes.clone();
        Ok(Self::from_parts(
            format,
            planes,
            FrameStorage::VendorSurface { desc },
        ))
    }

    /// Wrap graphics buffer objects, one per plane, with the pipeline's
    /// negotiated strides.
    pub fn from_graphics_objects(
        format: VideoFormatInfo,
        context: GraphicsContextId,
        objects: Vec<GraphicsObjectId>,
    ) -> Result<Self> {
        if objects.len() != format.format.plane_count() {
            return Err(RouteError::Configuration(format!(
                "expected {} graphics objects, got {}",
                format.format.plane_count(),
                objects.len()
            )));
        }
        // Each object is its own allocation: offset zero, tight stride.
        let planes = (0..objects.len())
            .map(|p| {
                let (w, h) = format.format.plane_dimensions(p, format.width, format.height);
                let pinfo = format.format.plane_info(p);
                PlaneLayout {
                    offset: 0,
                    stride: format.format.plane_row_bytes(p, format.width),
                    width: w,
                    height: h,
                    bytes_per_pixel: pinfo.bytes_per_pixel,
                }
            })
            .collect();
        Ok(Self::from_parts(
            format,
            planes,
            FrameStorage::GraphicsInterop { context, objects },
        ))
    }

    pub fn id(&self) -> FrameBufferId {
        self.inner.id
    }

    pub fn format(&self) -> &VideoFormatInfo {
        &self.inner.format
    }

    pub fn plane_layouts(&self) -> &[PlaneLayout] {
        &self.inner.planes
    }

    pub fn storage(&self) -> &FrameStorage {
        &self.inner.storage
    }

    /// Allocator context of device-backed storage, if any.
    pub fn allocator(&self) -> Option<AllocatorId> {
        match &self.inner.storage {
            FrameStorage::Device { allocator, .. } => Some(*allocator),
            FrameStorage::VendorSurface { desc } => Some(desc.allocator),
            _ => None,
        }
    }

    /// Run `f` over the system-memory bytes. Returns None for other domains.
    pub fn with_system_data<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Option<R> {
        match &self.inner.storage {
            FrameStorage::System { data } => Some(f(&mut data.lock())),
            _ => None,
        }
    }

    /// Cached interop registrations for `context`, if any.
    pub fn cached_interop(&self, context: GraphicsContextId) -> Option<Vec<Arc<InteropResource>>> {
        self.inner.interop_cache.lock().get(&context).cloned()
    }

    /// Attach interop registrations for `context` to this buffer's lifetime.
    pub fn cache_interop(&self, context: GraphicsContextId, resources: Vec<Arc<InteropResource>>) {
        self.inner.interop_cache.lock().insert(context, resources);
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let domain = match &self.inner.storage {
            FrameStorage::System { .. } => "system",
            FrameStorage::Device { .. } => "device",
            FrameStorage::VendorSurface { .. } => "vendor-surface",
            FrameStorage::GraphicsInterop { .. } => "graphics-interop",
        };
        f.debug_struct("FrameBuffer")
            .field("id", &self.inner.id.0)
            .field("storage", &domain)
            .field("format", &self.inner.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::PixelFormat;

    #[test]
    fn system_buffer_sized_from_format() {
        let buf = FrameBuffer::new_system(VideoFormatInfo::new(PixelFormat::Nv12, 64, 48));
        assert_eq!(buf.plane_layouts().len(), 2);
        let total = buf.with_system_data(|d| d.len()).unwrap();
        assert_eq!(total, 64 * 48 + 64 * 24);
    }

    #[test]
    fn padded_strides_are_honored() {
        let info = VideoFormatInfo::new(PixelFormat::Rgba8, 10, 4);
        let buf = FrameBuffer::new_system_with_strides(info, &[64]).unwrap();
        let layout = buf.plane_layouts()[0];
        assert_eq!(layout.stride, 64);
        assert_eq!(layout.row_bytes(), 40);
        assert_eq!(buf.with_system_data(|d| d.len()).unwrap(), 64 * 4);
    }

    #[test]
    fn undersized_stride_is_rejected() {
        let info = VideoFormatInfo::new(PixelFormat::Rgba8, 10, 4);
        assert!(FrameBuffer::new_system_with_strides(info, &[8]).is_err());
    }

    #[test]
    fn vendor_descriptor_plane_count_must_match_format() {
        let info = VideoFormatInfo::new(PixelFormat::Nv12, 16, 16);
        let desc = VendorSurfaceDescriptor {
            base: DevicePtr(0x1000),
            len: 16 * 16 * 3 / 2,
            allocator: AllocatorId(1),
            planes: vec![PlaneLayout {
                offset: 0,
                stride: 16,
                width: 16,
                height: 16,
                bytes_per_pixel: 1,
            }],
        };
        assert!(FrameBuffer::from_vendor_surface(info, desc).is_err());
    }

    #[test]
    fn graphics_object_count_must_match_planes() {
        let info = VideoFormatInfo::new(PixelFormat::Nv12, 16, 16);
        let err = FrameBuffer::from_graphics_objects(
            info,
            GraphicsContextId(1),
            vec![GraphicsObjectId(1)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn clones_share_identity() {
        let buf = FrameBuffer::new_system(VideoFormatInfo::new(PixelFormat::Rgba8, 2, 2));
        let other = buf.clone();
        assert_eq!(buf.id(), other.id());
    }
}
