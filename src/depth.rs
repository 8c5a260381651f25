//! Depth probe and anchor placement.
//!
//! The probe maps the target region's center into view space, hit-tests it
//! against the tracked scene, and converts the nearest hit's camera distance
//! into the value a perspective projection would have written to the depth
//! buffer for that surface. A flat quad carrying that value is then occluded
//! exactly like real geometry at the same distance.

use serde::{Deserialize, Serialize};

use crate::geometry::{view_space_center, AffineTransform, NormalizedRect, ViewPoint, ViewportSize};

/// Camera near/far clipping planes, in scene units (meters).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipPlanes {
    pub z_near: f64,
    pub z_far: f64,
}

impl ClipPlanes {
    pub fn new(z_near: f64, z_far: f64) -> Self {
        Self { z_near, z_far }
    }

    pub fn is_valid(&self) -> bool {
        self.z_near.is_finite() && self.z_far.is_finite() && self.z_near > 0.0 && self.z_near < self.z_far
    }
}

impl Default for ClipPlanes {
    fn default() -> Self {
        Self {
            z_near: 0.001,
            z_far: 100.0,
        }
    }
}

/// Projection state exposed by the render target.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub planes: ClipPlanes,
    /// Larger stored depth means nearer.
    pub reverse_z: bool,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            planes: ClipPlanes::default(),
            reverse_z: true,
        }
    }
}

/// Normalized depth-buffer value for a surface `distance` away from the camera.
///
/// With reverse-Z the planes are swapped before projecting, so near surfaces
/// encode towards 1 and far ones towards 0. `distance` is clamped into
/// `[z_near, z_far]`. Returns `None` for degenerate planes or a distance that
/// is not a positive finite number.
pub fn depth_buffer_value(planes: ClipPlanes, distance: f64, reverse_z: bool) -> Option<f32> {
    if !planes.is_valid() || !distance.is_finite() || distance <= 0.0 {
        return None;
    }
    let distance = distance.clamp(planes.z_near, planes.z_far);

    let (z_near, z_far) = if reverse_z {
        (planes.z_far, planes.z_near)
    } else {
        (planes.z_near, planes.z_far)
    };
    let range = 2.0 * z_near * z_far;
    // Normalized device depth in [-1, 1].
    let ndc_depth = (z_far + z_near - range / distance) / (z_far - z_near);
    Some(((ndc_depth + 1.0) / 2.0) as f32)
}

/// One surface hit, in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceHit {
    pub position: [f32; 3],
    /// Distance from the camera to the hit.
    pub distance: f64,
}

/// Surface/feature hit-testing supplied by the tracking platform.
pub trait HitTester: Send + Sync {
    /// Hits along the ray through `point`, nearest first.
    fn hit_test(&self, point: ViewPoint) -> Vec<SurfaceHit>;
}

/// World position of the tracked object plus its camera distance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldAnchor {
    pub position: [f32; 3],
    pub distance: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProbeOutcome {
    /// New anchor and depth value established.
    Placed { anchor: WorldAnchor, depth: f32 },
    /// No hit (or no usable depth); previous state retained.
    Missed,
}

/// Per-probe inputs that come from the current frame.
#[derive(Clone, Copy, Debug)]
pub struct ProbeContext {
    pub display_transform: AffineTransform,
    pub viewport: ViewportSize,
    pub projection: Projection,
}

/// Owns the `WorldAnchor` and `DepthBufferValue`. Both are sticky: a miss
/// leaves the last good values in place.
#[derive(Debug, Default)]
pub struct DepthProbe {
    anchor: Option<WorldAnchor>,
    depth: Option<f32>,
    misses: u64,
}

impl DepthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(&self) -> Option<WorldAnchor> {
        self.anchor
    }

    pub fn depth_value(&self) -> Option<f32> {
        self.depth
    }

    /// Consecutive misses since the last placement.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Probe at the center of `region`.
    pub fn probe(
        &mut self,
        region: &NormalizedRect,
        ctx: &ProbeContext,
        hit_tester: &dyn HitTester,
    ) -> ProbeOutcome {
        let point = view_space_center(region, &ctx.display_transform, ctx.viewport);
        let nearest = hit_tester
            .hit_test(point)
            .into_iter()
            .filter(|hit| hit.distance.is_finite())
            .min_by(|a, b| a.distance.total_cmp(&b.distance));

        let Some(hit) = nearest else {
            self.misses += 1;
            log::debug!("depth probe: no hit at ({:.1}, {:.1})", point.x, point.y);
            return ProbeOutcome::Missed;
        };

        let Some(depth) = depth_buffer_value(
            ctx.projection.planes,
            hit.distance,
            ctx.projection.reverse_z,
        ) else {
            self.misses += 1;
            log::debug!("depth probe: unusable hit distance {}", hit.distance);
            return ProbeOutcome::Missed;
        };

        let anchor = WorldAnchor {
            position: hit.position,
            distance: hit.distance,
        };
        if self.anchor.is_none() {
            log::info!(
                "anchor placed at [{:.3}, {:.3}, {:.3}], {:.2} m",
                anchor.position[0],
                anchor.position[1],
                anchor.position[2],
                anchor.distance
            );
        } else {
            log::debug!("anchor moved, {:.2} m, depth {:.6}", anchor.distance, depth);
        }
        self.anchor = Some(anchor);
        self.depth = Some(depth);
        self.misses = 0;
        ProbeOutcome::Placed { anchor, depth }
    }
}
