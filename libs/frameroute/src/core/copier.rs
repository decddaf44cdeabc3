// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Direction-tagged memory-copy component: classify, plan, execute.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::device::DeviceCopyEngine;
use crate::core::domain::{classify, MemoryDomain, PlatformCaps};
use crate::core::error::{Result, RouteError};
use crate::core::frame::FrameBuffer;
use crate::core::executor::TransferExecutor;
use crate::core::interop::InteropWorkerHandle;
use crate::core::planner::{plan, TransferPlan};

/// Which way frames move relative to the device. One component serves both
/// directions; the tag only changes capability ordering, never the transfer
/// logic itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyDirection {
    /// Toward device memory (system/surface/interop sources).
    Upload,
    /// Away from device memory (system/interop destinations).
    Download,
}

/// Per-stream copy front end. Owns the executor and the capability tokens;
/// invoked synchronously from the pipeline's streaming thread.
pub struct MemoryCopier {
    direction: CopyDirection,
    caps: PlatformCaps,
    executor: TransferExecutor,
}

impl MemoryCopier {
    pub fn new(
        direction: CopyDirection,
        caps: PlatformCaps,
        engine: Option<Arc<dyn DeviceCopyEngine>>,
        interop: Option<InteropWorkerHandle>,
    ) -> Self {
        Self {
            direction,
            caps,
            executor: TransferExecutor::new(engine, interop),
        }
    }

    pub fn direction(&self) -> CopyDirection {
        self.direction
    }

    pub fn platform_caps(&self) -> &PlatformCaps {
        &self.caps
    }

    /// The plan this copier would run for the given pair, without executing.
    pub fn plan_for(&self, src: &FrameBuffer, dst: &FrameBuffer) -> TransferPlan {
        plan(
            classify(src, &self.caps),
            classify(dst, &self.caps),
            src.allocator(),
            dst.allocator(),
        )
    }

    /// Move one frame. Classifies both endpoints, plans, and executes with
    /// the plan's one-shot fallback. A final failure drops the frame and is
    /// reported upstream as a transfer error.
    pub fn process_frame(&self, src: &FrameBuffer, dst: &FrameBuffer) -> Result<()> {
        let chosen = self.plan_for(src, dst);
        debug!(
            direction = ?self.direction,
            src = ?chosen.src,
            dst = ?chosen.dst,
            strategy = ?chosen.strategy,
            "transferring frame"
        );
        self.executor
            .execute_with_fallback(src, dst, &chosen)
            .map_err(|e| match e {
                // Unsupported pairs stay negotiation errors; everything else
                // surfaces as a dropped-frame transfer failure.
                RouteError::Negotiation(_) | RouteError::Transfer(_) => e,
                other => RouteError::Transfer(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::{PixelFormat, VideoFormatInfo};
    use crate::core::planner::TransferStrategy;

    #[test]
    fn system_endpoints_short_circuit_to_staged() {
        let copier = MemoryCopier::new(
            CopyDirection::Upload,
            PlatformCaps::default(),
            None,
            None,
        );
        let info = VideoFormatInfo::new(PixelFormat::Rgba8, 8, 8);
        let a = FrameBuffer::new_system(info);
        let b = FrameBuffer::new_system(info);
        let chosen = copier.plan_for(&a, &b);
        assert_eq!(chosen.strategy, TransferStrategy::Staged);
        // Staged system-to-system needs no engine at all.
        copier.process_frame(&a, &b).unwrap();
    }

    #[test]
    fn format_mismatch_is_refused_as_negotiation() {
        let copier = MemoryCopier::new(
            CopyDirection::Download,
            PlatformCaps::default(),
            None,
            None,
        );
        let a = FrameBuffer::new_system(VideoFormatInfo::new(PixelFormat::Rgba8, 8, 8));
        let b = FrameBuffer::new_system(VideoFormatInfo::new(PixelFormat::Nv12, 8, 8));
        let err = copier.process_frame(&a, &b).unwrap_err();
        assert!(matches!(err, RouteError::Negotiation(_)), "{err:?}");
    }
}
