// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Presentation surface state: a border surface with the video surface
//! nested inside it, kept consistent across geometry and format changes.

use tracing::{debug, trace};

use crate::core::domain::PlatformCaps;
use crate::core::error::{Result, RouteError};
use crate::core::format::{PixelFormat, VideoFormatInfo};
use crate::core::frame::FrameBuffer;
use crate::core::geometry::{center_rect, Rect, Size};
use crate::surface::compositor::{BlendMode, Compositor, SurfaceHandle};

const BORDER_COLOR: [u8; 4] = [0, 0, 0, 0xff];

/// A layered surface pair bound to one output target.
///
/// The border (area) surface fills the render rectangle; the video surface
/// is a strictly nested child positioned by the geometry engine. Geometry
/// changes commit both atomically: the video subsurface is switched to
/// sync-with-parent for the update so both land in one compositor cycle.
pub struct RenderSurface {
    comp: Box<dyn Compositor>,
    caps: PlatformCaps,
    area: SurfaceHandle,
    video: SurfaceHandle,
    parented: bool,
    render_rect: Rect,
    /// Display size of the content (after pixel-aspect-ratio scaling).
    video_size: Size,
    /// Last rectangle computed for the video surface, area-local.
    video_rect: Rect,
    crop: Option<Rect>,
    scale: u32,
    alpha: Option<f32>,
    /// Once a 1x1 viewport-scaled border is attached it never needs
    /// regeneration; only its viewport destination changes.
    no_border_update: bool,
}

impl RenderSurface {
    /// Create the surface pair, optionally nested inside `parent`. Core
    /// surface creation failing is fatal; optional capabilities are not
    /// checked here and degrade silently later.
    pub fn new(
        mut comp: Box<dyn Compositor>,
        parent: Option<SurfaceHandle>,
        caps: PlatformCaps,
    ) -> Result<Self> {
        let area = comp.create_surface()?;
        let video = comp.create_surface()?;
        if let Some(parent) = parent {
            comp.create_subsurface(area, parent)?;
        }
        comp.create_subsurface(video, area)?;
        // Video must never swallow pointer or touch input.
        comp.clear_input_region(area);
        comp.clear_input_region(video);
        Ok(Self {
            comp,
            caps,
            area,
            video,
            parented: parent.is_some(),
            render_rect: Rect::default(),
            video_size: Size::default(),
            video_rect: Rect::default(),
            crop: None,
            scale: 1,
            alpha: None,
            no_border_update: false,
        })
    }

    pub fn render_rectangle(&self) -> Rect {
        self.render_rect
    }

    pub fn video_rectangle(&self) -> Rect {
        self.video_rect
    }

    pub fn video_size(&self) -> Size {
        self.video_size
    }

    fn update_borders(&mut self) -> Result<()> {
        if self.no_border_update || self.render_rect.is_empty() {
            return Ok(());
        }
        if self.caps.viewport_scaling {
            // A single pixel stretched by the compositor covers any render
            // rectangle, so this buffer is created exactly once.
            self.comp
                .attach_solid(self.area, Size::new(1, 1), PixelFormat::Bgrx8, BORDER_COLOR)?;
            self.no_border_update = true;
        } else {
            self.comp.attach_solid(
                self.area,
                self.render_rect.size(),
                PixelFormat::Bgrx8,
                BORDER_COLOR,
            )?;
        }
        Ok(())
    }

    /// Recompute and apply the video surface geometry for the current render
    /// rectangle, content size, crop and scale.
    fn resize_video_surface(&mut self, commit: bool) {
        let bounds = Rect::new(0, 0, self.render_rect.w, self.render_rect.h);
        let res = center_rect(self.video_size, bounds, self.caps.viewport_scaling);
        if self.caps.viewport_scaling {
            if !res.is_empty() {
                self.comp.set_viewport_destination(self.video, res.size());
            }
            match self.crop {
                Some(crop) => {
                    // Viewport source is in buffer coordinates, which the
                    // buffer scale divides.
                    let s = self.scale.max(1);
                    self.comp.set_viewport_source(
                        self.video,
                        Rect::new(
                            crop.x / s as i32,
                            crop.y / s as i32,
                            crop.w / s,
                            crop.h / s,
                        ),
                    );
                }
                None => self.comp.clear_viewport_source(self.video),
            }
        }
        self.comp.set_subsurface_position(self.video, res.x, res.y);
        if commit {
            self.comp.damage(self.video, Rect::new(0, 0, res.w, res.h));
            self.comp.commit(self.video);
        }
        trace!(?res, size = ?self.video_size, "video surface placed");
        self.video_rect = res;
    }

    /// Update destination geometry. Repositions the nested video surface,
    /// regenerates the border buffer, and commits border and video in one
    /// compositor update cycle.
    pub fn set_render_rectangle(&mut self, rect: Rect) -> Result<()> {
        debug!(?rect, "render rectangle update");
        self.render_rect = rect;
        if self.parented {
            self.comp.set_subsurface_position(self.area, rect.x, rect.y);
        }
        self.update_borders()?;
        if self.caps.viewport_scaling && !rect.is_empty() {
            self.comp.set_viewport_destination(self.area, rect.size());
        }
        let have_video = !self.video_size.is_empty();
        if have_video {
            self.comp.set_sync(self.video, true);
            self.resize_video_surface(true);
        }
        self.comp.damage(self.area, Rect::new(0, 0, rect.w, rect.h));
        self.comp.commit(self.area);
        if have_video {
            self.comp.set_sync(self.video, false);
        }
        self.comp.flush();
        Ok(())
    }

    /// Present a frame, or blank the surface when no buffer is given.
    ///
    /// Supplying format info signals a format/size change: geometry is
    /// recomputed, the opaque hint refreshed, and the border surface
    /// committed alongside the video surface.
    pub fn render_frame(
        &mut self,
        buffer: Option<&FrameBuffer>,
        info: Option<&VideoFormatInfo>,
    ) -> Result<()> {
        let format_changed = info.is_some();
        if let Some(info) = info {
            self.video_size = info.display_size();
            self.comp.set_sync(self.video, true);
            self.resize_video_surface(false);
            if !info.has_alpha() && !self.caps.overlay_opacity_quirk {
                let r = self.video_rect;
                self.comp
                    .set_opaque_region(self.video, Some(Rect::new(0, 0, r.w, r.h)));
            }
        }
        if self.video_size.is_empty() {
            return Err(RouteError::Configuration(
                "no video format established before rendering".into(),
            ));
        }
        match buffer {
            Some(buffer) => self.comp.attach_frame(self.video, buffer),
            None => self.comp.detach(self.video),
        }
        self.comp.set_buffer_scale(self.video, self.scale);
        let r = self.video_rect;
        self.comp.damage(self.video, Rect::new(0, 0, r.w, r.h));
        self.comp.commit(self.video);
        if format_changed {
            let rect = self.render_rect;
            self.comp
                .damage(self.area, Rect::new(0, 0, rect.w, rect.h));
            self.comp.commit(self.area);
            self.comp.set_sync(self.video, false);
        }
        self.comp.flush();
        Ok(())
    }

    /// Record a source subregion to present; `None` resets to the full
    /// frame. Takes effect on the next geometry pass.
    pub fn set_source_crop(&mut self, crop: Option<Rect>) {
        self.crop = crop;
    }

    /// Integer buffer scale, clamped to at least 1.
    pub fn set_buffer_scale(&mut self, scale: u32) {
        self.scale = scale.max(1);
    }

    /// Blend coefficient in `[0, 1]`. Anything below fully opaque needs the
    /// straight-alpha blend equation; opaque content stays premultiplied.
    /// Silently does nothing without compositor alpha support.
    pub fn set_alpha(&mut self, alpha: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(RouteError::Configuration(format!(
                "alpha {alpha} outside [0, 1]"
            )));
        }
        self.alpha = Some(alpha);
        if self.caps.alpha_blending {
            let mode = if alpha < 1.0 {
                BlendMode::SourceWeighted
            } else {
                BlendMode::Premultiplied
            };
            self.comp.set_blend(self.video, mode, alpha);
            self.comp.commit(self.video);
            self.comp.flush();
        }
        Ok(())
    }

    /// Apply a compositor configure event. Degenerate sizes are protocol
    /// noise and ignored.
    pub fn handle_configure(&mut self, w: u32, h: u32) -> Result<()> {
        if w == 0 || h == 0 {
            trace!("ignoring degenerate configure");
            return Ok(());
        }
        self.set_render_rectangle(Rect::new(0, 0, w, h))
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        self.comp.destroy_surface(self.video);
        self.comp.destroy_surface(self.area);
        self.comp.flush();
    }
}
