// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Memory-domain classification and process-wide subsystem initialization.
//!
//! Vendor-surface and graphics-interop support are probed once per process;
//! dependent code carries the resulting capability token instead of
//! re-querying global state.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::frame::{FrameBuffer, FrameStorage};

/// The memory/ownership regime a frame buffer's pixels currently reside in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryDomain {
    System,
    Device,
    VendorSurface,
    GraphicsInterop,
}

/// Proof that a lazily-initialized subsystem came up. Only obtainable from
/// the `ensure_*` entry points (or the test helpers).
#[derive(Clone, Copy, Debug)]
pub struct SubsystemToken(());

impl SubsystemToken {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

static VENDOR_SURFACE_INIT: OnceLock<bool> = OnceLock::new();
static GRAPHICS_INTEROP_INIT: OnceLock<bool> = OnceLock::new();

fn ensure(cell: &OnceLock<bool>, name: &str, probe: impl FnOnce() -> bool) -> Option<SubsystemToken> {
    let up = *cell.get_or_init(|| {
        let up = probe();
        info!("{name} subsystem {}", if up { "initialized" } else { "unavailable" });
        up
    });
    up.then(SubsystemToken::new)
}

/// Initialize vendor-surface support, once per process. The first caller's
/// probe decides; later callers get the cached outcome.
pub fn ensure_vendor_surface(probe: impl FnOnce() -> bool) -> Option<SubsystemToken> {
    ensure(&VENDOR_SURFACE_INIT, "vendor-surface", probe)
}

/// Initialize graphics-interop support, once per process.
pub fn ensure_graphics_interop(probe: impl FnOnce() -> bool) -> Option<SubsystemToken> {
    ensure(&GRAPHICS_INTEROP_INIT, "graphics-interop", probe)
}

/// Platform and compositor capabilities threaded through the core.
///
/// The subsystem tokens gate classification; the compositor flags gate
/// optional presentation behavior, which degrades silently when absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformCaps {
    pub vendor_surface: Option<SubsystemToken>,
    pub graphics_interop: Option<SubsystemToken>,
    pub viewport_scaling: bool,
    pub alpha_blending: bool,
    /// Suppress opaque-region hints. Some overlay-composition hardware
    /// misrenders surfaces declared opaque; kept configurable.
    pub overlay_opacity_quirk: bool,
}

impl PlatformCaps {
    /// Probe-backed detection for the subsystem tokens. Compositor flags are
    /// supplied by whoever owns the connection.
    pub fn detect(
        vendor_probe: impl FnOnce() -> bool,
        interop_probe: impl FnOnce() -> bool,
    ) -> Self {
        Self {
            vendor_surface: ensure_vendor_surface(vendor_probe),
            graphics_interop: ensure_graphics_interop(interop_probe),
            ..Self::default()
        }
    }
}

/// Classify a buffer's memory domain from its storage tag and the process
/// capability tokens. Pure: the same buffer and caps always classify alike.
///
/// Vendor-surface and interop tags degrade to `System` when their subsystem
/// never came up; the staged path can still move such a frame.
pub fn classify(buffer: &FrameBuffer, caps: &PlatformCaps) -> MemoryDomain {
    match buffer.storage() {
        FrameStorage::System { .. } => MemoryDomain::System,
        FrameStorage::Device { .. } => MemoryDomain::Device,
        FrameStorage::VendorSurface { .. } => {
            if caps.vendor_surface.is_some() {
                MemoryDomain::VendorSurface
            } else {
                MemoryDomain::System
            }
        }
        FrameStorage::GraphicsInterop { .. } => {
            if caps.graphics_interop.is_some() {
                MemoryDomain::GraphicsInterop
            } else {
                MemoryDomain::System
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::{PixelFormat, VideoFormatInfo};
    use crate::core::interop::{GraphicsContextId, GraphicsObjectId};
    use serial_test::serial;

    #[test]
    fn system_and_device_classify_by_storage_alone() {
        let caps = PlatformCaps::default();
        let buf = FrameBuffer::new_system(VideoFormatInfo::new(PixelFormat::Rgba8, 4, 4));
        assert_eq!(classify(&buf, &caps), MemoryDomain::System);
        assert_eq!(classify(&buf, &caps), MemoryDomain::System);
    }

    #[test]
    fn interop_tag_degrades_without_token() {
        let info = VideoFormatInfo::new(PixelFormat::Rgba8, 4, 4);
        let buf = FrameBuffer::from_graphics_objects(
            info,
            GraphicsContextId(1),
            vec![GraphicsObjectId(1)],
        )
        .unwrap();
        let without = PlatformCaps::default();
        assert_eq!(classify(&buf, &without), MemoryDomain::System);
        let with = PlatformCaps {
            graphics_interop: Some(SubsystemToken::new()),
            ..PlatformCaps::default()
        };
        assert_eq!(classify(&buf, &with), MemoryDomain::GraphicsInterop);
    }

    #[test]
    #[serial]
    fn ensure_is_idempotent_and_caches_first_probe() {
        let first = ensure_vendor_surface(|| true);
        // A later probe result is ignored; the first outcome sticks.
        let second = ensure_vendor_surface(|| false);
        assert_eq!(first.is_some(), second.is_some());
    }
}
