//! Mask compositing pass.
//!
//! A screen-filling quad is drawn over the camera background. For each
//! fragment the pass:
//!
//! 1. maps the screen UV into camera-image UV through the aspect correction
//! 2. discards it outside the region of interest (when the region filter is on)
//! 3. samples the class mask and discards anything but the target class
//! 4. depth-tests the supplied depth value against the target, optionally
//!    writing it, then writes the overlay color
//!
//! `composite_mask` is the stateless pass; `MaskCompositor` holds the state
//! that feeds it and builds fresh `CompositorUniforms` for each draw.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::depth::Projection;
use crate::detect::{SegmentationMask, SharedMask};
use crate::geometry::NormalizedRect;

/// Depth comparison applied to each fragment: `fragment <op> stored`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthCompare {
    Always,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl DepthCompare {
    pub fn passes(self, fragment: f32, stored: f32) -> bool {
        match self {
            Self::Always => true,
            Self::Less => fragment < stored,
            Self::LessEqual => fragment <= stored,
            Self::Greater => fragment > stored,
            Self::GreaterEqual => fragment >= stored,
        }
    }

    /// "Nearer than" for the given depth convention.
    pub fn nearer(reverse_z: bool) -> Self {
        if reverse_z {
            Self::Greater
        } else {
            Self::Less
        }
    }
}

/// How the overlay interacts with real-world depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    /// Always drawn on top; the depth buffer is left alone.
    MaskOnly,
    /// Depth-tested and written so nearer real geometry hides the overlay.
    #[default]
    Occlusion,
}

impl std::str::FromStr for DepthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mask_only" | "mask-only" => Ok(Self::MaskOnly),
            "occlusion" => Ok(Self::Occlusion),
            other => Err(anyhow!(
                "unknown depth mode '{}' (expected mask_only or occlusion)",
                other
            )),
        }
    }
}

/// Capability flags for the pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositorConfig {
    pub has_region_filter: bool,
    pub writes_depth: bool,
    pub compare: DepthCompare,
    /// RGBA, straight alpha.
    pub overlay_color: [u8; 4],
}

impl CompositorConfig {
    pub fn mask_only() -> Self {
        Self {
            has_region_filter: true,
            writes_depth: false,
            compare: DepthCompare::Always,
            overlay_color: [255, 255, 255, 255],
        }
    }

    pub fn occlusion(reverse_z: bool) -> Self {
        Self {
            has_region_filter: true,
            writes_depth: true,
            compare: DepthCompare::nearer(reverse_z),
            overlay_color: [255, 255, 255, 255],
        }
    }

    pub fn for_mode(mode: DepthMode, reverse_z: bool) -> Self {
        match mode {
            DepthMode::MaskOnly => Self::mask_only(),
            DepthMode::Occlusion => Self::occlusion(reverse_z),
        }
    }

    pub fn with_region_filter(mut self, enabled: bool) -> Self {
        self.has_region_filter = enabled;
        self
    }

    pub fn with_color(mut self, rgba: [u8; 4]) -> Self {
        self.overlay_color = rgba;
        self
    }

    /// Whether the pass needs a depth value to run.
    pub fn uses_depth(&self) -> bool {
        self.writes_depth || self.compare != DepthCompare::Always
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self::occlusion(true)
    }
}

/// Per-draw bundle. Built fresh for every pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositorUniforms {
    /// `screen_aspect / camera_aspect`.
    pub aspect_correction: f32,
    /// `None` disables region clipping for this draw.
    pub region_of_interest: Option<NormalizedRect>,
    pub class_index: u8,
    /// Normalized depth written/tested for every surviving fragment.
    pub depth_value: f32,
}

/// Correction factor for aspect-filling a camera image onto a screen.
/// Both aspects are width over height. Invalid inputs yield `1.0`.
pub fn aspect_correction(screen_aspect: f32, camera_aspect: f32) -> f32 {
    if screen_aspect.is_finite() && camera_aspect.is_finite() && screen_aspect > 0.0 && camera_aspect > 0.0 {
        screen_aspect / camera_aspect
    } else {
        1.0
    }
}

/// Maps screen UV into camera-image UV for an aspect-filled camera image.
///
/// `k < 1`: the screen is narrower than the camera, so the image is cropped
/// left and right. `k > 1`: cropped top and bottom.
pub fn camera_uv(u: f32, v: f32, k: f32) -> (f32, f32) {
    if k < 1.0 {
        (0.5 + (u - 0.5) * k, v)
    } else {
        (u, 0.5 + (v - 0.5) / k)
    }
}

/// Color and depth attachments for one frame.
pub struct RenderTarget {
    width: u32,
    height: u32,
    color: Vec<[u8; 4]>,
    depth: Vec<f32>,
    projection: Projection,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32, projection: Projection) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("render target dimensions must be non-zero"));
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("render target dimensions overflow"))?;
        let far = Self::far_value(projection.reverse_z);
        Ok(Self {
            width,
            height,
            color: vec![[0, 0, 0, 255]; len],
            depth: vec![far; len],
            projection,
        })
    }

    /// Depth clear value: the far end of the buffer for the convention.
    pub fn far_value(reverse_z: bool) -> f32 {
        if reverse_z {
            0.0
        } else {
            1.0
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Reset both attachments: color to `background`, depth to far.
    pub fn clear(&mut self, background: [u8; 4]) {
        self.color.fill(background);
        self.depth.fill(Self::far_value(self.projection.reverse_z));
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    pub fn color_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.index(x, y).map(|i| self.color[i])
    }

    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        self.index(x, y).map(|i| self.depth[i])
    }

    /// Write depth for real geometry covering pixels `[x0, x1) x [y0, y1)`.
    pub fn fill_depth(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, value: f32) {
        for y in y0..y1.min(self.height) {
            for x in x0..x1.min(self.width) {
                let i = y as usize * self.width as usize + x as usize;
                self.depth[i] = value;
            }
        }
    }

    pub fn color_buffer(&self) -> &[[u8; 4]] {
        &self.color
    }

    /// Color attachment as packed RGBA bytes.
    pub fn rgba_bytes(&self) -> Vec<u8> {
        self.color.iter().flatten().copied().collect()
    }
}

/// Per-pass fragment accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrawStats {
    /// The pass did not run (missing mask, region, or depth).
    pub skipped: bool,
    pub fragments: usize,
    pub written: usize,
    pub discarded_region: usize,
    pub discarded_coverage: usize,
    pub discarded_class: usize,
    pub discarded_depth: usize,
}

impl DrawStats {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

fn blend(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    if src[3] == 255 {
        return src;
    }
    let a = src[3] as f32 / 255.0;
    let mix = |s: u8, d: u8| (s as f32 * a + d as f32 * (1.0 - a)).round() as u8;
    [
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        dst[3].max(src[3]),
    ]
}

/// Draw the mask quad into `target`.
pub fn composite_mask(
    config: &CompositorConfig,
    uniforms: &CompositorUniforms,
    mask: &SegmentationMask,
    target: &mut RenderTarget,
) -> DrawStats {
    let mut stats = DrawStats::default();
    let region = if config.has_region_filter {
        uniforms.region_of_interest
    } else {
        None
    };
    let w = target.width as f32;
    let h = target.height as f32;

    for y in 0..target.height {
        for x in 0..target.width {
            stats.fragments += 1;
            let u = (x as f32 + 0.5) / w;
            let v = (y as f32 + 0.5) / h;
            let (cu, cv) = camera_uv(u, v, uniforms.aspect_correction);

            if let Some(roi) = region {
                if !roi.contains(cu, cv) {
                    stats.discarded_region += 1;
                    continue;
                }
            }

            let Some(class) = mask.sample(cu, cv) else {
                stats.discarded_coverage += 1;
                continue;
            };
            if class != uniforms.class_index {
                stats.discarded_class += 1;
                continue;
            }

            let i = y as usize * target.width as usize + x as usize;
            if !config.compare.passes(uniforms.depth_value, target.depth[i]) {
                stats.discarded_depth += 1;
                continue;
            }
            if config.writes_depth {
                target.depth[i] = uniforms.depth_value;
            }
            target.color[i] = blend(target.color[i], config.overlay_color);
            stats.written += 1;
        }
    }

    stats
}

/// State feeding the mask pass.
#[derive(Debug)]
pub struct MaskCompositor {
    config: CompositorConfig,
    class_index: u8,
    mask: Option<SharedMask>,
    region: Option<NormalizedRect>,
    aspect_correction: f32,
    depth_value: Option<f32>,
}

impl MaskCompositor {
    pub fn new(config: CompositorConfig, class_index: u8) -> Self {
        Self {
            config,
            class_index,
            mask: None,
            region: None,
            aspect_correction: 1.0,
            depth_value: None,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn class_index(&self) -> u8 {
        self.class_index
    }

    /// Replace the mask. The previous one is dropped once no draw holds it.
    pub fn set_mask(&mut self, mask: SharedMask) {
        self.mask = Some(mask);
    }

    pub fn mask(&self) -> Option<&SharedMask> {
        self.mask.as_ref()
    }

    pub fn set_region(&mut self, region: Option<NormalizedRect>) {
        self.region = region;
    }

    pub fn region(&self) -> Option<NormalizedRect> {
        self.region
    }

    pub fn set_aspect_correction(&mut self, factor: f32) {
        self.aspect_correction = factor;
    }

    pub fn aspect_correction(&self) -> f32 {
        self.aspect_correction
    }

    pub fn set_depth_value(&mut self, depth: f32) {
        self.depth_value = Some(depth);
    }

    pub fn depth_value(&self) -> Option<f32> {
        self.depth_value
    }

    /// Uniforms for the next draw, or `None` when the pass cannot run yet.
    pub fn uniforms(&self) -> Option<CompositorUniforms> {
        if self.config.has_region_filter && self.region.is_none() {
            return None;
        }
        let depth_value = if self.config.uses_depth() {
            self.depth_value?
        } else {
            0.0
        };
        Some(CompositorUniforms {
            aspect_correction: self.aspect_correction,
            region_of_interest: self.region,
            class_index: self.class_index,
            depth_value,
        })
    }

    /// Run the pass. Missing state is a silent no-op: the target keeps the
    /// unmodified camera background.
    pub fn render(&self, target: &mut RenderTarget) -> DrawStats {
        let (Some(mask), Some(uniforms)) = (self.mask.as_ref(), self.uniforms()) else {
            return DrawStats::skipped();
        };
        composite_mask(&self.config, &uniforms, mask, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::ClipPlanes;
    use std::sync::Arc;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn projection(reverse_z: bool) -> Projection {
        Projection {
            planes: ClipPlanes::new(0.01, 100.0),
            reverse_z,
        }
    }

    /// 4x4 raster: top-left quadrant `a`, everything else `b`.
    fn quadrant_mask(a: u8, b: u8) -> SegmentationMask {
        let mut data = vec![b; 16];
        for y in 0..2 {
            for x in 0..2 {
                data[y * 4 + x] = a;
            }
        }
        SegmentationMask::new(4, 4, data).unwrap()
    }

    fn drawn(target: &RenderTarget) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for y in 0..target.height() {
            for x in 0..target.width() {
                if target.color_at(x, y) == Some(WHITE) {
                    out.push((x, y));
                }
            }
        }
        out
    }

    fn uniforms(region: Option<NormalizedRect>, class_index: u8) -> CompositorUniforms {
        CompositorUniforms {
            aspect_correction: 1.0,
            region_of_interest: region,
            class_index,
            depth_value: 0.5,
        }
    }

    #[test]
    fn draws_exactly_the_matching_quadrant() {
        let mask = quadrant_mask(7, 0);
        let mut target = RenderTarget::new(4, 4, projection(true)).unwrap();
        let roi = NormalizedRect::new(0.0, 0.0, 0.5, 0.5);
        let stats = composite_mask(
            &CompositorConfig::mask_only(),
            &uniforms(Some(roi), 7),
            &mask,
            &mut target,
        );
        assert_eq!(drawn(&target), vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert_eq!(stats.written, 4);
        assert_eq!(stats.discarded_region, 12);
    }

    #[test]
    fn region_clips_matching_pixels() {
        // Every cell matches the class; only the region may be written.
        let mask = SegmentationMask::new(4, 4, vec![7; 16]).unwrap();
        let mut target = RenderTarget::new(4, 4, projection(true)).unwrap();
        let roi = NormalizedRect::new(0.5, 0.5, 0.5, 0.5);
        let stats = composite_mask(
            &CompositorConfig::mask_only(),
            &uniforms(Some(roi), 7),
            &mask,
            &mut target,
        );
        assert_eq!(drawn(&target), vec![(2, 2), (3, 2), (2, 3), (3, 3)]);
        assert_eq!(stats.discarded_region, 12);
        assert_eq!(stats.discarded_class, 0);
    }

    #[test]
    fn class_mismatch_is_discarded() {
        let mask = quadrant_mask(7, 0);
        let mut target = RenderTarget::new(4, 4, projection(true)).unwrap();
        let stats = composite_mask(
            &CompositorConfig::mask_only().with_region_filter(false),
            &uniforms(None, 0),
            &mask,
            &mut target,
        );
        assert_eq!(stats.written, 12);
        assert_eq!(stats.discarded_class, 4);
        assert_eq!(target.color_at(0, 0), Some(BLACK));
    }

    #[test]
    fn mask_only_leaves_depth_untouched() {
        let mask = SegmentationMask::new(1, 1, vec![7]).unwrap();
        let mut target = RenderTarget::new(2, 2, projection(true)).unwrap();
        target.fill_depth(0, 0, 2, 2, 0.9);
        let stats = composite_mask(
            &CompositorConfig::mask_only(),
            &uniforms(Some(NormalizedRect::FULL), 7),
            &mask,
            &mut target,
        );
        assert_eq!(stats.written, 4);
        assert_eq!(target.depth_at(1, 1), Some(0.9));
    }

    #[test]
    fn nearer_geometry_occludes_overlay_reverse_z() {
        let mask = SegmentationMask::new(1, 1, vec![7]).unwrap();
        let mut target = RenderTarget::new(2, 1, projection(true)).unwrap();
        // Left pixel: real geometry nearer than the overlay (larger under reverse-Z).
        target.fill_depth(0, 0, 1, 1, 0.8);
        // Right pixel: geometry farther away.
        target.fill_depth(1, 0, 2, 1, 0.2);
        let stats = composite_mask(
            &CompositorConfig::occlusion(true),
            &uniforms(Some(NormalizedRect::FULL), 7),
            &mask,
            &mut target,
        );
        assert_eq!(stats.discarded_depth, 1);
        assert_eq!(target.color_at(0, 0), Some(BLACK));
        assert_eq!(target.color_at(1, 0), Some(WHITE));
        assert_eq!(target.depth_at(1, 0), Some(0.5));
        assert_eq!(target.depth_at(0, 0), Some(0.8));
    }

    #[test]
    fn nearer_geometry_occludes_overlay_forward_z() {
        let mask = SegmentationMask::new(1, 1, vec![7]).unwrap();
        let mut target = RenderTarget::new(2, 1, projection(false)).unwrap();
        target.fill_depth(0, 0, 1, 1, 0.2);
        let stats = composite_mask(
            &CompositorConfig::occlusion(false),
            &uniforms(Some(NormalizedRect::FULL), 7),
            &mask,
            &mut target,
        );
        assert_eq!(stats.written, 1);
        assert_eq!(target.color_at(0, 0), Some(BLACK));
        assert_eq!(target.color_at(1, 0), Some(WHITE));
    }

    #[test]
    fn aspect_correction_crops_horizontally() {
        assert_eq!(aspect_correction(0.5, 1.0), 0.5);
        assert_eq!(aspect_correction(0.0, 1.0), 1.0);
        assert_eq!(camera_uv(0.0, 0.3, 0.5), (0.25, 0.3));
        assert_eq!(camera_uv(1.0, 0.3, 0.5), (0.75, 0.3));
        assert_eq!(camera_uv(0.3, 0.0, 2.0), (0.3, 0.25));

        // A narrow screen shows only the middle half of a 4-wide mask.
        let mask = SegmentationMask::new(4, 1, vec![0, 7, 7, 0]).unwrap();
        let mut target = RenderTarget::new(4, 1, projection(true)).unwrap();
        let mut u = uniforms(None, 7);
        u.aspect_correction = 0.5;
        let stats = composite_mask(
            &CompositorConfig::mask_only().with_region_filter(false),
            &u,
            &mask,
            &mut target,
        );
        assert_eq!(stats.written, 4);
    }

    #[test]
    fn translucent_overlay_blends_over_background() {
        let mask = SegmentationMask::new(1, 1, vec![1]).unwrap();
        let mut target = RenderTarget::new(1, 1, projection(true)).unwrap();
        target.clear([0, 0, 200, 255]);
        composite_mask(
            &CompositorConfig::mask_only()
                .with_region_filter(false)
                .with_color([255, 0, 0, 128]),
            &uniforms(None, 1),
            &mask,
            &mut target,
        );
        assert_eq!(target.color_at(0, 0), Some([128, 0, 100, 255]));
    }

    #[test]
    fn compositor_without_mask_is_a_no_op() {
        let mut compositor = MaskCompositor::new(CompositorConfig::mask_only(), 7);
        compositor.set_region(Some(NormalizedRect::FULL));
        let mut target = RenderTarget::new(2, 2, projection(true)).unwrap();
        target.clear([10, 20, 30, 255]);
        let stats = compositor.render(&mut target);
        assert!(stats.skipped);
        assert_eq!(target.color_at(0, 0), Some([10, 20, 30, 255]));
    }

    #[test]
    fn compositor_waits_for_region_and_depth() {
        let mut compositor = MaskCompositor::new(CompositorConfig::occlusion(true), 7);
        compositor.set_mask(Arc::new(SegmentationMask::new(1, 1, vec![7]).unwrap()));
        assert_eq!(compositor.uniforms(), None);
        compositor.set_region(Some(NormalizedRect::FULL));
        assert_eq!(compositor.uniforms(), None);
        compositor.set_depth_value(0.5);
        let uniforms = compositor.uniforms().unwrap();
        assert_eq!(uniforms.class_index, 7);
        assert_eq!(uniforms.depth_value, 0.5);

        let mut target = RenderTarget::new(2, 2, projection(true)).unwrap();
        assert_eq!(compositor.render(&mut target).written, 4);
    }

    #[test]
    fn parses_depth_modes() {
        assert_eq!("mask_only".parse::<DepthMode>().unwrap(), DepthMode::MaskOnly);
        assert_eq!("Occlusion".parse::<DepthMode>().unwrap(), DepthMode::Occlusion);
        assert!("z-fighting".parse::<DepthMode>().is_err());
    }
}
