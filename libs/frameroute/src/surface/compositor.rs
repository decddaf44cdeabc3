// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Compositor protocol seam.
//!
//! The presentation layer talks to the display server through this trait.
//! Nothing takes effect until `commit`; attach/damage/viewport changes on a
//! surface are pending state, and a surface in sync mode folds its commits
//! into its parent's.

use crate::core::error::Result;
use crate::core::format::PixelFormat;
use crate::core::frame::FrameBuffer;
use crate::core::geometry::{Rect, Size};

/// Server-side surface identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// How the compositor blends the surface over what is beneath it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    /// Color channels already carry the alpha weighting.
    Premultiplied,
    /// Straight alpha: weight source color by the coefficient at blend time.
    SourceWeighted,
}

pub trait Compositor: Send {
    fn create_surface(&mut self) -> Result<SurfaceHandle>;

    /// Make `surface` a child of `parent`. Child content positions relative
    /// to the parent and commits are governed by its sync mode.
    fn create_subsurface(&mut self, surface: SurfaceHandle, parent: SurfaceHandle) -> Result<()>;

    fn destroy_surface(&mut self, surface: SurfaceHandle);

    fn set_subsurface_position(&mut self, surface: SurfaceHandle, x: i32, y: i32);

    /// Sync mode: `true` folds this surface's commits into the parent's
    /// next commit, `false` lets them apply independently.
    fn set_sync(&mut self, surface: SurfaceHandle, sync: bool);

    /// Scale the surface's content to the given destination size.
    fn set_viewport_destination(&mut self, surface: SurfaceHandle, size: Size);

    /// Present only the given source rectangle of the attached buffer.
    fn set_viewport_source(&mut self, surface: SurfaceHandle, rect: Rect);

    fn clear_viewport_source(&mut self, surface: SurfaceHandle);

    fn attach_frame(&mut self, surface: SurfaceHandle, buffer: &FrameBuffer);

    /// Attach a solid single-color buffer (border filler).
    fn attach_solid(
        &mut self,
        surface: SurfaceHandle,
        size: Size,
        format: PixelFormat,
        color: [u8; 4],
    ) -> Result<()>;

    /// Detach the current buffer, blanking the surface on the next commit.
    fn detach(&mut self, surface: SurfaceHandle);

    fn set_buffer_scale(&mut self, surface: SurfaceHandle, scale: u32);

    /// Declare a region the compositor may treat as fully opaque; `None`
    /// clears the declaration.
    fn set_opaque_region(&mut self, surface: SurfaceHandle, region: Option<Rect>);

    /// Remove the surface from input delivery entirely.
    fn clear_input_region(&mut self, surface: SurfaceHandle);

    fn set_blend(&mut self, surface: SurfaceHandle, mode: BlendMode, alpha: f32);

    fn damage(&mut self, surface: SurfaceHandle, rect: Rect);

    fn commit(&mut self, surface: SurfaceHandle);

    /// Push buffered requests to the server.
    fn flush(&mut self);
}
