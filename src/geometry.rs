//! Normalized rectangle arithmetic and the display-space transform.
//!
//! All rectangles are expressed in image-normalized coordinates with a
//! top-left origin. Every operation returns a new value; rects are never
//! mutated in place.

use serde::{Deserialize, Serialize};

/// Rectangle in `[0,1] x [0,1]` normalized image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const FULL: NormalizedRect = NormalizedRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Half-open containment: `x <= u < x + width`, `y <= v < y + height`.
    pub fn contains(&self, u: f32, v: f32) -> bool {
        u >= self.x && u < self.max_x() && v >= self.y && v < self.max_y()
    }

    /// True when the rect lies inside the unit square, allowing for the
    /// rounding of `x + width`.
    pub fn is_within_unit(&self) -> bool {
        const EPS: f32 = 1e-6;
        self.x >= 0.0 && self.y >= 0.0 && self.max_x() <= 1.0 + EPS && self.max_y() <= 1.0 + EPS
    }

    pub fn inset(&self, delta: f32) -> Self {
        inset_normalized(*self, delta)
    }
}

/// Shrinks (positive `delta`) or grows (negative `delta`) a rect on all sides,
/// then clamps it to the unit square.
///
/// The origin is clamped to `>= 0` and the size reduced so that
/// `origin + size <= 1`. Sizes never go negative.
pub fn inset_normalized(rect: NormalizedRect, delta: f32) -> NormalizedRect {
    let min_x = rect.x + delta;
    let min_y = rect.y + delta;
    let max_x = rect.max_x() - delta;
    let max_y = rect.max_y() - delta;

    // A shrink past the midpoint collapses onto the center rather than flipping.
    let (min_x, max_x) = if min_x > max_x {
        let c = (min_x + max_x) * 0.5;
        (c, c)
    } else {
        (min_x, max_x)
    };
    let (min_y, max_y) = if min_y > max_y {
        let c = (min_y + max_y) * 0.5;
        (c, c)
    } else {
        (min_y, max_y)
    };

    let x = min_x.clamp(0.0, 1.0);
    let y = min_y.clamp(0.0, 1.0);
    let width = (max_x.min(1.0) - x).max(0.0);
    let height = (max_y.min(1.0) - y).max(0.0);

    NormalizedRect {
        x,
        y,
        width,
        height,
    }
}

/// 2D affine transform with the conventional `[a b; c d; tx ty]` layout:
/// `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn apply_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    /// Maps a rect through the transform and returns the axis-aligned bounds
    /// of the four transformed corners. The result is not clamped.
    pub fn apply_rect(&self, rect: &NormalizedRect) -> NormalizedRect {
        let corners = [
            self.apply_point(rect.x, rect.y),
            self.apply_point(rect.max_x(), rect.y),
            self.apply_point(rect.x, rect.max_y()),
            self.apply_point(rect.max_x(), rect.max_y()),
        ];
        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for (cx, cy) in corners {
            min_x = min_x.min(cx);
            min_y = min_y.min(cy);
            max_x = max_x.max(cx);
            max_y = max_y.max(cy);
        }
        NormalizedRect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Viewport size in view-space points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: f32,
    pub height: f32,
}

impl ViewportSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Width over height. Zero-height viewports report an aspect of zero.
    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }
}

/// Point in view space (points, not normalized).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewPoint {
    pub x: f32,
    pub y: f32,
}

/// Maps a normalized image rect into view space: display transform first,
/// then a scale up to the viewport size.
pub fn view_space_rect(
    image_rect: &NormalizedRect,
    display_transform: &AffineTransform,
    viewport: ViewportSize,
) -> NormalizedRect {
    let normalized_view = display_transform.apply_rect(image_rect);
    AffineTransform::scale(viewport.width, viewport.height).apply_rect(&normalized_view)
}

/// View-space center of a normalized image rect.
pub fn view_space_center(
    image_rect: &NormalizedRect,
    display_transform: &AffineTransform,
    viewport: ViewportSize,
) -> ViewPoint {
    let (x, y) = view_space_rect(image_rect, display_transform, viewport).center();
    ViewPoint { x, y }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn rect_approx(a: &NormalizedRect, b: &NormalizedRect) -> bool {
        approx(a.x, b.x) && approx(a.y, b.y) && approx(a.width, b.width) && approx(a.height, b.height)
    }

    #[test]
    fn grow_pads_interior_rect_symmetrically() {
        let r = NormalizedRect::new(0.4, 0.4, 0.2, 0.2).inset(-0.02);
        assert!(rect_approx(&r, &NormalizedRect::new(0.38, 0.38, 0.24, 0.24)));
    }

    #[test]
    fn grow_near_origin_clamps_instead_of_wrapping() {
        let r = inset_normalized(NormalizedRect::new(0.01, 0.0, 0.3, 0.3), -0.02);
        assert_eq!(r.x, 0.0);
        assert_eq!(r.y, 0.0);
        assert!(approx(r.width, 0.33));
        assert!(approx(r.height, 0.32));
    }

    #[test]
    fn grow_near_far_edge_trims_size() {
        let r = inset_normalized(NormalizedRect::new(0.8, 0.9, 0.2, 0.1), -0.05);
        assert!(approx(r.x, 0.75));
        assert!(approx(r.y, 0.85));
        assert!(approx(r.max_x(), 1.0));
        assert!(approx(r.max_y(), 1.0));
    }

    #[test]
    fn shrink_past_midpoint_collapses_to_zero_size() {
        let r = inset_normalized(NormalizedRect::new(0.4, 0.4, 0.1, 0.1), 0.2);
        assert_eq!(r.width, 0.0);
        assert_eq!(r.height, 0.0);
        assert!(approx(r.x, 0.45));
    }

    #[test]
    fn display_transform_maps_center_into_view_points() {
        // Quarter turn: (x, y) -> (1 - y, x)
        let rotate = AffineTransform {
            a: 0.0,
            b: 1.0,
            c: -1.0,
            d: 0.0,
            tx: 1.0,
            ty: 0.0,
        };
        let rect = NormalizedRect::new(0.0, 0.0, 0.5, 0.25);
        let center = view_space_center(&rect, &rotate, ViewportSize::new(100.0, 200.0));
        assert!(approx(center.x, 87.5));
        assert!(approx(center.y, 50.0));
    }

    #[test]
    fn half_open_containment() {
        let r = NormalizedRect::new(0.0, 0.0, 0.5, 0.5);
        assert!(r.contains(0.0, 0.0));
        assert!(r.contains(0.49, 0.49));
        assert!(!r.contains(0.5, 0.25));
    }

    #[test]
    fn clamped_grow_does_not_round_trip() {
        let rect = NormalizedRect::new(0.02, 0.4, 0.2, 0.2);
        let grown = inset_normalized(rect, -0.05);
        assert_eq!(grown.x, 0.0);
        let back = inset_normalized(grown, 0.05);
        assert!(approx(back.x, 0.05));
        assert!(approx(back.width, 0.17));
        assert!(!rect_approx(&back, &rect));
        // The unclamped axis still comes back.
        assert!(approx(back.y, rect.y));
        assert!(approx(back.height, rect.height));
    }

    fn arb_rect() -> impl Strategy<Value = NormalizedRect> {
        (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0).prop_map(|(x, y, w, h)| {
            NormalizedRect::new(x, y, w.min(1.0 - x), h.min(1.0 - y))
        })
    }

    proptest! {
        #[test]
        fn inset_result_stays_in_unit_square(rect in arb_rect(), delta in -0.5f32..0.5) {
            let r = inset_normalized(rect, delta);
            prop_assert!(r.x >= 0.0 && r.y >= 0.0);
            prop_assert!(r.width >= 0.0 && r.height >= 0.0);
            prop_assert!(r.max_x() <= 1.0 + 1e-6);
            prop_assert!(r.max_y() <= 1.0 + 1e-6);
        }

        #[test]
        fn inset_round_trips_when_unclamped(
            (rect, delta) in (0.1f32..0.5, 0.1f32..0.5)
                .prop_flat_map(|(x, y)| (Just(x), Just(y), 0.0f32..(0.9 - x), 0.0f32..(0.9 - y)))
                .prop_map(|(x, y, w, h)| NormalizedRect::new(x, y, w, h))
                .prop_flat_map(|rect| (Just(rect), 0.0f32..0.1))
        ) {
            // Interior rects with at least 0.1 clearance: growing never clamps.
            let grown = inset_normalized(rect, -delta);
            prop_assert!(grown.x >= 0.0 && grown.y >= 0.0);
            prop_assert!(grown.max_x() <= 1.0 && grown.max_y() <= 1.0);
            let back = inset_normalized(grown, delta);
            prop_assert!(rect_approx(&back, &rect));
        }
    }
}
