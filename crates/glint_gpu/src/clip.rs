//! Clip resolution
//!
//! Given the accumulated clip and the device bounds of a draw, decide
//! the cheapest correct treatment: nothing, a hardware scissor rect,
//! analytic per-fragment coverage, or a rasterized mask texture. The
//! mask is cached per surface and invalidated by clip identity alone.

use glint_core::{ClipPath, Rect};

use crate::cache::ResourceRef;

/// Tolerance for treating an edge as sitting on a whole pixel
pub const PIXEL_ALIGN_EPSILON: f32 = 1e-3;

/// Vertical origin of a surface's pixel grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SurfaceOrigin {
    #[default]
    TopLeft,
    /// First row is the bottom of the image; scissor rects flip
    BottomLeft,
}

/// Outcome of classifying a clip against a draw's device bounds
#[derive(Clone, Debug, PartialEq)]
pub enum ClipClass {
    /// Nothing can pass the clip; the draw is skipped
    Empty,
    /// The clip fully contains the draw; no masking needed
    Unclipped,
    /// One pixel-aligned rectangle, usable as a hardware scissor
    Scissor(Rect),
    /// Rectangular but not pixel-aligned; coverage computed
    /// analytically per fragment
    AnalyticCoverage(Rect),
    /// General case: rasterize the clip once into a cached mask
    NeedsMask,
}

/// Classify `clip` for a draw covering `draw_bounds` on a surface of
/// `device_bounds`. Checks run cheapest-first.
pub fn classify_clip(clip: &ClipPath, device_bounds: Rect, draw_bounds: Rect) -> ClipClass {
    if clip.is_empty() {
        return ClipClass::Empty;
    }
    if clip.contains_rect(&draw_bounds) {
        return ClipClass::Unclipped;
    }
    if let Some(rect) = clip.as_rect() {
        let clipped = rect.intersect(&device_bounds);
        if clipped.is_empty() {
            return ClipClass::Empty;
        }
        if clipped.is_pixel_aligned(PIXEL_ALIGN_EPSILON) {
            return ClipClass::Scissor(clipped.round());
        }
        return ClipClass::AnalyticCoverage(clipped);
    }
    ClipClass::NeedsMask
}

/// Map a device-space rect to the backend's scissor coordinate space,
/// flipping vertically for bottom-left-origin surfaces
pub fn to_scissor_space(rect: Rect, origin: SurfaceOrigin, surface_height: f32) -> Rect {
    match origin {
        SurfaceOrigin::TopLeft => rect,
        SurfaceOrigin::BottomLeft => Rect::new(
            rect.x,
            surface_height - rect.bottom(),
            rect.width,
            rect.height,
        ),
    }
}

/// A rasterized clip mask cached on a surface, valid only while the
/// surface's clip identity equals `tag`
#[derive(Clone, Debug)]
pub struct ClipMask {
    pub tag: u32,
    pub texture: ResourceRef,
    /// Device-space rect the mask maps onto
    pub bounds: Rect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::{Matrix, Path};

    const DEVICE: Rect = Rect::new(0.0, 0.0, 100.0, 100.0);

    #[test]
    fn full_cover_clip_needs_nothing() {
        let clip = ClipPath::full(DEVICE);
        assert_eq!(classify_clip(&clip, DEVICE, DEVICE), ClipClass::Unclipped);
    }

    #[test]
    fn aligned_sub_rect_becomes_scissor() {
        let mut clip = ClipPath::full(DEVICE);
        clip.intersect(Path::rect(Rect::new(10.0, 10.0, 50.0, 50.0)));
        assert_eq!(
            classify_clip(&clip, DEVICE, DEVICE),
            ClipClass::Scissor(Rect::new(10.0, 10.0, 50.0, 50.0))
        );
    }

    #[test]
    fn draw_inside_sub_rect_is_unclipped() {
        let mut clip = ClipPath::full(DEVICE);
        clip.intersect(Path::rect(Rect::new(10.0, 10.0, 50.0, 50.0)));
        let draw = Rect::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(classify_clip(&clip, DEVICE, draw), ClipClass::Unclipped);
    }

    #[test]
    fn unaligned_rect_gets_analytic_coverage() {
        let mut clip = ClipPath::full(DEVICE);
        clip.intersect(Path::rect(Rect::new(10.25, 10.0, 50.0, 50.0)));
        match classify_clip(&clip, DEVICE, DEVICE) {
            ClipClass::AnalyticCoverage(rect) => {
                assert_eq!(rect, Rect::new(10.25, 10.0, 50.0, 50.0));
            }
            other => panic!("expected analytic coverage, got {other:?}"),
        }
    }

    #[test]
    fn rotated_rect_clip_never_scissors() {
        let mut clip = ClipPath::full(DEVICE);
        let rotated = Path::rect(Rect::new(10.0, 10.0, 50.0, 50.0)).transform(&Matrix::rotate(0.3));
        clip.intersect(rotated);
        let class = classify_clip(&clip, DEVICE, DEVICE);
        assert!(
            matches!(class, ClipClass::NeedsMask),
            "rotated clip must rasterize, got {class:?}"
        );
    }

    #[test]
    fn disjoint_clip_is_empty() {
        let mut clip = ClipPath::full(DEVICE);
        clip.intersect(Path::rect(Rect::new(500.0, 500.0, 10.0, 10.0)));
        assert_eq!(classify_clip(&clip, DEVICE, DEVICE), ClipClass::Empty);
    }

    #[test]
    fn bottom_left_origin_flips_scissor() {
        let rect = Rect::new(10.0, 10.0, 30.0, 20.0);
        let flipped = to_scissor_space(rect, SurfaceOrigin::BottomLeft, 100.0);
        assert_eq!(flipped, Rect::new(10.0, 70.0, 30.0, 20.0));
        assert_eq!(to_scissor_space(rect, SurfaceOrigin::TopLeft, 100.0), rect);
    }
}
