// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! frameroute moves decoded video frames between heterogeneous memory
//! domains (system, device, vendor surface, graphics interop) and manages
//! the on-screen presentation surface that shows them.
//!
//! The transfer side classifies a frame's domain, plans the cheapest valid
//! copy (direct device, graphics interop, or staged through host memory
//! with a single fallback), and executes it synchronously. The presentation
//! side keeps a border/video surface pair consistent through geometry and
//! format changes, with aspect-preserving letterboxing.
//!
//! Device drivers and the display server sit behind trait seams
//! ([`core::device::DeviceCopyEngine`], [`core::interop::GraphicsBackend`],
//! [`surface::compositor::Compositor`]); [`testing`] provides in-process
//! doubles for all three.

pub mod core;
#[cfg(feature = "engine-cuda")]
pub mod cuda;
pub mod surface;
pub mod testing;

pub use crate::core::caps::{decide_pool, propose_pool, BufferPoolConfig, DomainCaps};
pub use crate::core::copier::{CopyDirection, MemoryCopier};
pub use crate::core::device::DeviceCopyEngine;
pub use crate::core::domain::{classify, MemoryDomain, PlatformCaps};
pub use crate::core::error::{Result, RouteError};
pub use crate::core::executor::TransferExecutor;
pub use crate::core::format::{PixelFormat, VideoFormatInfo};
pub use crate::core::frame::FrameBuffer;
pub use crate::core::geometry::{center_rect, compute_fit, Rect, Size};
pub use crate::core::interop::{GraphicsBackend, InteropWorker};
pub use crate::core::planner::{plan, TransferPlan, TransferStrategy};
pub use crate::surface::compositor::Compositor;
pub use crate::surface::window::RenderSurface;
