// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Presentation-surface behavior over the recording compositor: geometry,
//! border buffers, commit ordering, opacity hints and blend selection.

use frameroute::surface::compositor::{BlendMode, SurfaceHandle};
use frameroute::testing::{CompositorOp, RecordingCompositor};
use frameroute::{
    FrameBuffer, PixelFormat, PlatformCaps, Rect, RenderSurface, RouteError, Size,
    VideoFormatInfo,
};

fn caps(viewport: bool, alpha: bool, quirk: bool) -> PlatformCaps {
    PlatformCaps {
        viewport_scaling: viewport,
        alpha_blending: alpha,
        overlay_opacity_quirk: quirk,
        ..PlatformCaps::default()
    }
}

fn surface(caps: PlatformCaps) -> (RecordingCompositor, RenderSurface) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let comp = RecordingCompositor::new();
    let surf = RenderSurface::new(Box::new(comp.clone()), None, caps).unwrap();
    (comp, surf)
}

const AREA: SurfaceHandle = SurfaceHandle(1);
const VIDEO: SurfaceHandle = SurfaceHandle(2);

fn hd_frame() -> (FrameBuffer, VideoFormatInfo) {
    let info = VideoFormatInfo::new(PixelFormat::Nv12, 1920, 1080);
    (FrameBuffer::new_system(info), info)
}

fn index_of(ops: &[CompositorOp], pred: impl Fn(&CompositorOp) -> bool) -> usize {
    ops.iter()
        .position(pred)
        .unwrap_or_else(|| panic!("expected op not recorded: {ops:#?}"))
}

#[test]
fn construction_fails_without_core_surfaces() {
    let comp = RecordingCompositor::new();
    comp.fail_surface_creation(true);
    let err = RenderSurface::new(Box::new(comp.clone()), None, caps(true, false, false));
    assert!(matches!(err, Err(RouteError::Resource(_))));
}

#[test]
fn creation_nests_video_and_clears_input() {
    let (comp, _surf) = surface(caps(true, false, false));
    let ops = comp.ops();
    assert!(ops.contains(&CompositorOp::CreateSubsurface {
        surface: VIDEO,
        parent: AREA,
    }));
    assert!(ops.contains(&CompositorOp::ClearInputRegion(AREA)));
    assert!(ops.contains(&CompositorOp::ClearInputRegion(VIDEO)));
}

#[test]
fn exact_aspect_fit_fills_the_render_rectangle() {
    let (_comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert_eq!(surf.video_rectangle(), Rect::new(0, 0, 1280, 720));
}

#[test]
fn square_target_letterboxes_with_280px_borders() {
    let (comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 1280)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert_eq!(surf.video_rectangle(), Rect::new(0, 280, 1280, 720));
    assert!(comp.ops().contains(&CompositorOp::ViewportDestination {
        surface: VIDEO,
        size: Size::new(1280, 720),
    }));
}

#[test]
fn pixel_aspect_ratio_widens_display_size() {
    let (_comp, mut surf) = surface(caps(true, false, false));
    let info = VideoFormatInfo::new(PixelFormat::Nv12, 720, 576).with_par(16, 15);
    let buf = FrameBuffer::new_system(info);
    surf.set_render_rectangle(Rect::new(0, 0, 768, 576)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert_eq!(surf.video_size(), Size::new(768, 576));
    assert_eq!(surf.video_rectangle(), Rect::new(0, 0, 768, 576));
}

#[test]
fn viewport_border_is_one_pixel_and_latched() {
    let (comp, mut surf) = surface(caps(true, false, false));
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    let ops = comp.ops();
    let solid = index_of(&ops, |op| {
        matches!(
            op,
            CompositorOp::AttachSolid {
                surface,
                size,
                format: PixelFormat::Bgrx8,
                ..
            } if *surface == AREA && *size == Size::new(1, 1)
        )
    });
    let dest = index_of(&ops, |op| {
        *op == CompositorOp::ViewportDestination {
            surface: AREA,
            size: Size::new(1280, 720),
        }
    });
    assert!(solid < dest);

    // The 1x1 border never regenerates; only the viewport is resized.
    comp.clear_ops();
    surf.set_render_rectangle(Rect::new(0, 0, 640, 480)).unwrap();
    assert!(!comp
        .ops()
        .iter()
        .any(|op| matches!(op, CompositorOp::AttachSolid { .. })));
    assert!(comp.ops().contains(&CompositorOp::ViewportDestination {
        surface: AREA,
        size: Size::new(640, 480),
    }));
}

#[test]
fn border_is_full_size_without_viewport_scaling() {
    let (comp, mut surf) = surface(caps(false, false, false));
    surf.set_render_rectangle(Rect::new(0, 0, 800, 600)).unwrap();
    assert!(comp.ops().contains(&CompositorOp::AttachSolid {
        surface: AREA,
        size: Size::new(800, 600),
        format: PixelFormat::Bgrx8,
        color: [0, 0, 0, 0xff],
    }));
    // Each resize rebuilds the filler at the new size.
    comp.clear_ops();
    surf.set_render_rectangle(Rect::new(0, 0, 320, 240)).unwrap();
    assert!(comp.ops().iter().any(|op| matches!(
        op,
        CompositorOp::AttachSolid { size, .. } if *size == Size::new(320, 240)
    )));
}

#[test]
fn geometry_updates_are_idempotent() {
    let (_comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 1280)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    let first = surf.video_rectangle();

    surf.set_render_rectangle(Rect::new(0, 0, 1280, 1280)).unwrap();
    assert_eq!(surf.video_rectangle(), first);

    // A frame without format info repositions nothing.
    surf.render_frame(Some(&buf), None).unwrap();
    assert_eq!(surf.video_rectangle(), first);
}

#[test]
fn resize_commits_border_and_video_in_one_cycle() {
    let (comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();

    comp.clear_ops();
    surf.set_render_rectangle(Rect::new(0, 0, 1024, 768)).unwrap();
    let ops = comp.ops();
    let sync = index_of(&ops, |op| {
        *op == CompositorOp::Sync {
            surface: VIDEO,
            sync: true,
        }
    });
    let video_commit = index_of(&ops, |op| *op == CompositorOp::Commit(VIDEO));
    let area_commit = index_of(&ops, |op| *op == CompositorOp::Commit(AREA));
    let desync = index_of(&ops, |op| {
        *op == CompositorOp::Sync {
            surface: VIDEO,
            sync: false,
        }
    });
    assert!(sync < video_commit);
    assert!(video_commit < area_commit);
    assert!(area_commit < desync, "desync must wait for the area commit");
}

#[test]
fn format_change_recommits_the_border_surface() {
    let (comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();

    comp.clear_ops();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    let ops = comp.ops();
    let video_commit = index_of(&ops, |op| *op == CompositorOp::Commit(VIDEO));
    let area_commit = index_of(&ops, |op| *op == CompositorOp::Commit(AREA));
    assert!(video_commit < area_commit);

    // Steady-state frames leave the border surface alone.
    comp.clear_ops();
    surf.render_frame(Some(&buf), None).unwrap();
    assert!(!comp.ops().contains(&CompositorOp::Commit(AREA)));
}

#[test]
fn opaque_hint_follows_format_unless_quirked() {
    let (comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert!(comp.ops().iter().any(|op| matches!(
        op,
        CompositorOp::OpaqueRegion {
            surface,
            region: Some(_),
        } if *surface == VIDEO
    )));

    // Alpha-capable formats never declare opacity.
    let (comp, mut surf) = surface(caps(true, false, false));
    let info = VideoFormatInfo::new(PixelFormat::Rgba8, 640, 480);
    let buf = FrameBuffer::new_system(info);
    surf.set_render_rectangle(Rect::new(0, 0, 640, 480)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert!(!comp
        .ops()
        .iter()
        .any(|op| matches!(op, CompositorOp::OpaqueRegion { .. })));

    // The platform quirk suppresses the hint even for opaque formats.
    let (comp, mut surf) = surface(caps(true, false, true));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert!(!comp
        .ops()
        .iter()
        .any(|op| matches!(op, CompositorOp::OpaqueRegion { .. })));
}

#[test]
fn alpha_selects_the_blend_equation() {
    let (comp, mut surf) = surface(caps(true, true, false));
    surf.set_alpha(0.5).unwrap();
    surf.set_alpha(1.0).unwrap();
    let blends: Vec<(BlendMode, f32)> = comp
        .ops()
        .iter()
        .filter_map(|op| match op {
            CompositorOp::Blend { mode, alpha, .. } => Some((*mode, *alpha)),
            _ => None,
        })
        .collect();
    assert_eq!(
        blends,
        vec![
            (BlendMode::SourceWeighted, 0.5),
            (BlendMode::Premultiplied, 1.0),
        ]
    );
}

#[test]
fn alpha_degrades_silently_without_compositor_support() {
    let (comp, mut surf) = surface(caps(true, false, false));
    surf.set_alpha(0.25).unwrap();
    assert!(!comp
        .ops()
        .iter()
        .any(|op| matches!(op, CompositorOp::Blend { .. })));
}

#[test]
fn alpha_outside_unit_range_is_rejected() {
    let (_comp, mut surf) = surface(caps(true, true, false));
    assert!(matches!(
        surf.set_alpha(1.5),
        Err(RouteError::Configuration(_))
    ));
}

#[test]
fn source_crop_is_scaled_into_buffer_coordinates() {
    let (comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    surf.set_buffer_scale(2);
    surf.set_source_crop(Some(Rect::new(20, 10, 640, 360)));
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert!(comp.ops().contains(&CompositorOp::ViewportSource {
        surface: VIDEO,
        rect: Rect::new(10, 5, 320, 180),
    }));

    comp.clear_ops();
    surf.set_source_crop(None);
    surf.render_frame(Some(&buf), Some(&info)).unwrap();
    assert!(comp.ops().contains(&CompositorOp::ClearViewportSource(VIDEO)));
}

#[test]
fn missing_buffer_blanks_the_video_surface() {
    let (comp, mut surf) = surface(caps(true, false, false));
    let (buf, info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    surf.render_frame(Some(&buf), Some(&info)).unwrap();

    comp.clear_ops();
    surf.render_frame(None, None).unwrap();
    let ops = comp.ops();
    let detach = index_of(&ops, |op| *op == CompositorOp::Detach(VIDEO));
    let commit = index_of(&ops, |op| *op == CompositorOp::Commit(VIDEO));
    assert!(detach < commit);
}

#[test]
fn rendering_before_format_info_is_refused() {
    let (_comp, mut surf) = surface(caps(true, false, false));
    let (buf, _info) = hd_frame();
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    assert!(matches!(
        surf.render_frame(Some(&buf), None),
        Err(RouteError::Configuration(_))
    ));
}

#[test]
fn degenerate_configure_is_ignored() {
    let (comp, mut surf) = surface(caps(true, false, false));
    surf.set_render_rectangle(Rect::new(0, 0, 1280, 720)).unwrap();
    comp.clear_ops();
    surf.handle_configure(0, 720).unwrap();
    assert!(comp.ops().is_empty());
    assert_eq!(surf.render_rectangle(), Rect::new(0, 0, 1280, 720));

    surf.handle_configure(800, 600).unwrap();
    assert_eq!(surf.render_rectangle(), Rect::new(0, 0, 800, 600));
}

#[test]
fn teardown_destroys_both_surfaces() {
    let (comp, surf) = surface(caps(true, false, false));
    drop(surf);
    let ops = comp.ops();
    let video = index_of(&ops, |op| *op == CompositorOp::DestroySurface(VIDEO));
    let area = index_of(&ops, |op| *op == CompositorOp::DestroySurface(AREA));
    assert!(video < area, "child goes before its parent");
}
