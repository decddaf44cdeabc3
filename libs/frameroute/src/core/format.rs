// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pixel formats and negotiated format info.

use serde::{Deserialize, Serialize};

use crate::core::geometry::Size;

/// Pixel formats shared across every memory domain.
///
/// The set is intentionally small: whatever the decode stage hands over.
/// Color conversion is out of scope, so a transfer never changes the format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    /// BGRx little-endian, alpha byte ignored. Border filler format.
    Bgrx8,
    Nv12,
    I420,
}

/// Per-plane sampling layout: component divisors and bytes per pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneInfo {
    pub x_div: u32,
    pub y_div: u32,
    pub bytes_per_pixel: u32,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Bgrx8 => 1,
            PixelFormat::Nv12 => 2,
            PixelFormat::I420 => 3,
        }
    }

    pub fn plane_info(&self, plane: usize) -> PlaneInfo {
        const P1X4: PlaneInfo = PlaneInfo {
            x_div: 1,
            y_div: 1,
            bytes_per_pixel: 4,
        };
        match (self, plane) {
            (PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Bgrx8, 0) => P1X4,
            (PixelFormat::Nv12, 0) => PlaneInfo {
                x_div: 1,
                y_div: 1,
                bytes_per_pixel: 1,
            },
            (PixelFormat::Nv12, 1) => PlaneInfo {
                x_div: 2,
                y_div: 2,
                bytes_per_pixel: 2,
            },
            (PixelFormat::I420, 0) => PlaneInfo {
                x_div: 1,
                y_div: 1,
                bytes_per_pixel: 1,
            },
            (PixelFormat::I420, 1 | 2) => PlaneInfo {
                x_div: 2,
                y_div: 2,
                bytes_per_pixel: 1,
            },
            _ => panic!("plane {plane} out of range for {self:?}"),
        }
    }

    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelFormat::Rgba8 | PixelFormat::Bgra8)
    }

    /// Pixel dimensions of one plane for a frame of `width` x `height`.
    pub fn plane_dimensions(&self, plane: usize, width: u32, height: u32) -> (u32, u32) {
        let info = self.plane_info(plane);
        (width.div_ceil(info.x_div), height.div_ceil(info.y_div))
    }

    /// Bytes in one tightly-packed row of the given plane.
    pub fn plane_row_bytes(&self, plane: usize, width: u32) -> usize {
        let info = self.plane_info(plane);
        let (w, _) = self.plane_dimensions(plane, width, 1);
        w as usize * info.bytes_per_pixel as usize
    }
}

/// Negotiated format info carried alongside a frame.
///
/// `par` is the pixel-aspect-ratio numerator/denominator; display sizing
/// scales the pixel width by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormatInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub par: (u32, u32),
}

impl VideoFormatInfo {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            par: (1, 1),
        }
    }

    pub fn with_par(mut self, par_n: u32, par_d: u32) -> Self {
        self.par = (par_n.max(1), par_d.max(1));
        self
    }

    pub fn has_alpha(&self) -> bool {
        self.format.has_alpha()
    }

    /// Width in display pixels: `round(width * par_n / par_d)`.
    pub fn display_width(&self) -> u32 {
        let (n, d) = self.par;
        ((self.width as u64 * n as u64 + d as u64 / 2) / d as u64) as u32
    }

    pub fn display_size(&self) -> Size {
        Size {
            w: self.display_width(),
            h: self.height,
        }
    }

    /// Total bytes of a tightly-packed frame in this format.
    pub fn frame_size(&self) -> usize {
        (0..self.format.plane_count())
            .map(|p| {
                let (_, h) = self.format.plane_dimensions(p, self.width, self.height);
                self.format.plane_row_bytes(p, self.width) * h as usize
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_plane_layout() {
        let f = PixelFormat::Nv12;
        assert_eq!(f.plane_count(), 2);
        assert_eq!(f.plane_dimensions(0, 1920, 1080), (1920, 1080));
        assert_eq!(f.plane_dimensions(1, 1920, 1080), (960, 540));
        // Interleaved UV: half-width samples, two bytes each.
        assert_eq!(f.plane_row_bytes(1, 1920), 1920);
    }

    #[test]
    fn frame_size_accounts_for_subsampling() {
        let info = VideoFormatInfo::new(PixelFormat::I420, 4, 4);
        // 16 luma + 4 + 4 chroma.
        assert_eq!(info.frame_size(), 24);
        let info = VideoFormatInfo::new(PixelFormat::Rgba8, 2, 2);
        assert_eq!(info.frame_size(), 16);
    }

    #[test]
    fn display_width_rounds_par_scaling() {
        // 720x576 at 16:15 PAR -> 768 display pixels.
        let info = VideoFormatInfo::new(PixelFormat::Nv12, 720, 576).with_par(16, 15);
        assert_eq!(info.display_width(), 768);
        assert_eq!(info.display_size().h, 576);
    }

    #[test]
    fn alpha_presence_follows_format() {
        assert!(PixelFormat::Rgba8.has_alpha());
        assert!(!PixelFormat::Bgrx8.has_alpha());
        assert!(!PixelFormat::Nv12.has_alpha());
    }
}
