// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! CUDA-backed device copy engine.
//!
//! Compiled only with the `engine-cuda` feature. cudarc loads the driver
//! library dynamically, so a machine without the toolkit fails engine
//! construction at runtime instead of failing the build.

use std::sync::Arc;

use cudarc::driver::{result, sys, CudaContext, CudaStream};
use tracing::{debug, warn};

use crate::core::device::{AllocatorId, Copy2d, DeviceCopyEngine, DevicePtr, MemLocation};
use crate::core::error::{Result, RouteError};

/// Whether a CUDA driver and at least one device are reachable.
pub fn is_available() -> bool {
    CudaContext::device_count().map(|n| n > 0).unwrap_or(false)
}

fn driver_err(what: &str, e: impl std::fmt::Display) -> RouteError {
    RouteError::Resource(format!("{what}: {e}"))
}

/// Copy engine over one CUDA device, using its default stream.
pub struct CudaCopyEngine {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    ordinal: usize,
}

impl CudaCopyEngine {
    pub fn new(ordinal: usize) -> Result<Self> {
        let ctx = CudaContext::new(ordinal)
            .map_err(|e| driver_err("failed to acquire CUDA context", e))?;
        let stream = ctx.default_stream();
        debug!(ordinal, "CUDA copy engine up");
        Ok(Self {
            ctx,
            stream,
            ordinal,
        })
    }

}

impl DeviceCopyEngine for CudaCopyEngine {
    fn allocator_id(&self) -> AllocatorId {
        AllocatorId(self.ordinal as u64)
    }

    fn push_context(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| driver_err("failed to bind CUDA context", e))
    }

    fn pop_context(&self) {
        // Binding is per-thread and sticky with cudarc; leaving it bound is
        // harmless and the next push rebinds.
    }

    fn memcpy_2d_async(&self, desc: &Copy2d) -> Result<()> {
        let mut cfg: sys::CUDA_MEMCPY2D = unsafe { std::mem::zeroed() };
        match desc.src {
            MemLocation::Host(p) => {
                cfg.srcMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
                cfg.srcHost = p.cast_const().cast();
            }
            MemLocation::Device(p) => {
                cfg.srcMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
                cfg.srcDevice = p.0;
            }
        }
        match desc.dst {
            MemLocation::Host(p) => {
                cfg.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
                cfg.dstHost = p.cast();
            }
            MemLocation::Device(p) => {
                cfg.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
                cfg.dstDevice = p.0;
            }
        }
        cfg.srcPitch = desc.src_pitch;
        cfg.dstPitch = desc.dst_pitch;
        cfg.WidthInBytes = desc.width_bytes;
        cfg.Height = desc.height as usize;
        unsafe {
            sys::lib()
                .cuMemcpy2DAsync_v2(&cfg, self.stream.cu_stream())
                .result()
        }
        .map_err(|e| RouteError::Transfer(format!("2D copy enqueue failed: {e}")))
    }

    fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| RouteError::Transfer(format!("stream synchronize failed: {e}")))
    }

    fn alloc(&self, len: usize) -> Result<DevicePtr> {
        self.push_context()?;
        let ptr = unsafe { result::malloc_sync(len) }
            .map_err(|e| driver_err("device allocation failed", e))?;
        Ok(DevicePtr(ptr))
    }

    fn free(&self, ptr: DevicePtr) {
        if self.push_context().is_err() {
            return;
        }
        if let Err(e) = unsafe { result::free_sync(ptr.0) } {
            warn!("leaking device allocation, free failed: {e}");
        }
    }

    fn download(&self, src: DevicePtr, len: usize) -> Result<Vec<u8>> {
        self.push_context()?;
        let mut out = vec![0u8; len];
        unsafe { result::memcpy_dtoh_sync(&mut out, src.0) }
            .map_err(|e| RouteError::Transfer(format!("staging download failed: {e}")))?;
        Ok(out)
    }

    fn upload(&self, dst: DevicePtr, data: &[u8]) -> Result<()> {
        self.push_context()?;
        unsafe { result::memcpy_htod_sync(dst.0, data) }
            .map_err(|e| RouteError::Transfer(format!("staging upload failed: {e}")))
    }
}
