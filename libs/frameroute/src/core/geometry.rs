// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Destination-rectangle math for centered, aspect-preserving presentation.

use serde::{Deserialize, Serialize};

/// Rectangle in source or destination pixel space. Extents are unsigned,
/// so a clamped rectangle can never go negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn size(&self) -> Size {
        Size {
            w: self.w,
            h: self.h,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// Result of fitting content into a bounding rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitResult {
    /// Destination rectangle for the content, positioned inside the bounds.
    pub rect: Rect,
    /// Total unused width (split evenly left/right when centered).
    pub border_w: u32,
    /// Total unused height (split evenly top/bottom when centered).
    pub border_h: u32,
}

/// Center `content` inside `bounds`.
///
/// With `scale` set, the content is scaled to the largest aspect-preserving
/// rectangle that fits. Without it, the content keeps its own size, clamped
/// to the bounds per axis. Degenerate content or bounds yield a zero-size
/// rectangle anchored at the bounds origin.
pub fn center_rect(content: Size, bounds: Rect, scale: bool) -> Rect {
    if content.is_empty() || bounds.is_empty() {
        return Rect::new(bounds.x, bounds.y, 0, 0);
    }

    let (w, h) = if scale {
        // Compare aspect ratios without division: content wider than the
        // bounds is width-limited, otherwise height-limited.
        let cw = content.w as u64;
        let ch = content.h as u64;
        let bw = bounds.w as u64;
        let bh = bounds.h as u64;
        if cw * bh >= ch * bw {
            let h = ((ch * bw + cw / 2) / cw) as u32;
            (bounds.w, h.min(bounds.h))
        } else {
            let w = ((cw * bh + ch / 2) / ch) as u32;
            (w.min(bounds.w), bounds.h)
        }
    } else {
        (content.w.min(bounds.w), content.h.min(bounds.h))
    };

    Rect {
        x: bounds.x + ((bounds.w - w) / 2) as i32,
        y: bounds.y + ((bounds.h - h) / 2) as i32,
        w,
        h,
    }
}

/// Fit `content` into `bounds`, reporting the letterbox borders.
pub fn compute_fit(content: Size, bounds: Rect, letterbox: bool) -> FitResult {
    let rect = center_rect(content, bounds, letterbox);
    FitResult {
        rect,
        border_w: bounds.w.saturating_sub(rect.w),
        border_h: bounds.h.saturating_sub(rect.h),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aspect_close(content: Size, rect: Rect) -> bool {
        // Within one pixel of the exact aspect on the scaled axis.
        let expect_h = (content.h as u64 * rect.w as u64) as f64 / content.w as f64;
        (expect_h - rect.h as f64).abs() <= 1.0
            || ((content.w as u64 * rect.h as u64) as f64 / content.h as f64 - rect.w as f64).abs()
                <= 1.0
    }

    #[test]
    fn exact_fit_has_no_borders() {
        let fit = compute_fit(
            Size::new(1920, 1080),
            Rect::new(0, 0, 1280, 720),
            true,
        );
        assert_eq!(fit.rect, Rect::new(0, 0, 1280, 720));
        assert_eq!((fit.border_w, fit.border_h), (0, 0));
    }

    #[test]
    fn wide_content_in_square_bounds_letterboxes_vertically() {
        let fit = compute_fit(
            Size::new(1920, 1080),
            Rect::new(0, 0, 1280, 1280),
            true,
        );
        assert_eq!(fit.rect, Rect::new(0, 280, 1280, 720));
        assert_eq!(fit.border_w, 0);
        assert_eq!(fit.border_h, 560);
    }

    #[test]
    fn tall_content_pillarboxes() {
        let fit = compute_fit(Size::new(1080, 1920), Rect::new(0, 0, 1920, 1080), true);
        assert_eq!(fit.rect.h, 1080);
        assert!(fit.rect.w < 1920);
        assert_eq!(fit.rect.y, 0);
        assert!(fit.rect.x > 0);
    }

    #[test]
    fn fit_is_contained_centered_and_touches_edges() {
        let cases = [
            (Size::new(640, 480), Rect::new(10, 20, 800, 600)),
            (Size::new(1921, 1080), Rect::new(0, 0, 1280, 720)),
            (Size::new(100, 700), Rect::new(-5, 3, 333, 177)),
            (Size::new(1, 1), Rect::new(0, 0, 9, 7)),
        ];
        for (content, bounds) in cases {
            let r = center_rect(content, bounds, true);
            assert!(r.x >= bounds.x && r.y >= bounds.y, "{content:?} {bounds:?}");
            assert!(r.x as i64 + r.w as i64 <= bounds.x as i64 + bounds.w as i64);
            assert!(r.y as i64 + r.h as i64 <= bounds.y as i64 + bounds.h as i64);
            // Touches the bounds on at least one axis.
            assert!(r.w == bounds.w || r.h == bounds.h, "{content:?} {bounds:?}");
            // Centered: slack split within a pixel.
            let slack_x = (bounds.w - r.w) as i32;
            let slack_y = (bounds.h - r.h) as i32;
            assert!((r.x - bounds.x - slack_x / 2).abs() <= 1);
            assert!((r.y - bounds.y - slack_y / 2).abs() <= 1);
            assert!(aspect_close(content, r), "{content:?} {bounds:?} -> {r:?}");
        }
    }

    #[test]
    fn degenerate_bounds_yield_zero_rect() {
        let r = center_rect(Size::new(1920, 1080), Rect::new(4, 5, 0, 100), true);
        assert_eq!(r, Rect::new(4, 5, 0, 0));
        let r = center_rect(Size::new(0, 0), Rect::new(0, 0, 100, 100), true);
        assert!(r.is_empty());
    }

    #[test]
    fn unscaled_centering_clamps_to_bounds() {
        // Smaller content floats centered at its own size.
        let r = center_rect(Size::new(320, 240), Rect::new(0, 0, 640, 480), false);
        assert_eq!(r, Rect::new(160, 120, 320, 240));
        // Larger content is cropped by the bounds.
        let r = center_rect(Size::new(800, 600), Rect::new(0, 0, 640, 480), false);
        assert_eq!(r, Rect::new(0, 0, 640, 480));
    }
}
