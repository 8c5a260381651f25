use anyhow::Result;

use crate::detect::backend::{InferenceBackend, InferenceCapability};
use crate::detect::result::{ClassifiedDetection, LabelCandidate, SegmentationMask};
use crate::frame::CameraFrame;
use crate::geometry::NormalizedRect;
use crate::labels::BACKGROUND_CLASS;

/// Channel value above which a pixel counts as part of the bright object.
const BRIGHT_THRESHOLD: u8 = 200;

/// Minimum bright pixels before the object counts as detected.
const MIN_OBJECT_PIXELS: usize = 4;

/// Threshold-based backend for synthetic scenes.
///
/// Treats every pixel whose channels all exceed `BRIGHT_THRESHOLD` as the
/// object of interest. Detection reports the bounding box of those pixels
/// with a fixed label list; segmentation rasterizes them into `class_index`
/// at a lower resolution than the frame.
pub struct SyntheticBackend {
    labels: Vec<String>,
    class_index: u8,
    mask_width: u32,
    mask_height: u32,
}

impl SyntheticBackend {
    /// `labels` are reported most-likely-first on every detection.
    pub fn new(labels: &[&str], class_index: u8) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            class_index,
            mask_width: 64,
            mask_height: 64,
        }
    }

    /// Override the mask raster resolution.
    pub fn with_mask_size(mut self, width: u32, height: u32) -> Self {
        self.mask_width = width.max(1);
        self.mask_height = height.max(1);
        self
    }

    fn is_bright(px: [u8; 3]) -> bool {
        px.iter().all(|&c| c > BRIGHT_THRESHOLD)
    }

    fn bright_bounds(frame: &CameraFrame) -> Option<NormalizedRect> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut count = 0usize;

        for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
            if !Self::is_bright([px[0], px[1], px[2]]) {
                continue;
            }
            let x = (i % frame.width as usize) as u32;
            let y = (i / frame.width as usize) as u32;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            count += 1;
        }

        if count < MIN_OBJECT_PIXELS {
            return None;
        }

        let w = frame.width as f32;
        let h = frame.height as f32;
        Some(NormalizedRect::new(
            min_x as f32 / w,
            min_y as f32 / h,
            (max_x + 1 - min_x) as f32 / w,
            (max_y + 1 - min_y) as f32 / h,
        ))
    }
}

impl InferenceBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn supports(&self, capability: InferenceCapability) -> bool {
        matches!(
            capability,
            InferenceCapability::ObjectDetection | InferenceCapability::Segmentation
        )
    }

    fn detect_objects(&mut self, frame: &CameraFrame) -> Result<Vec<ClassifiedDetection>> {
        let Some(bounds) = Self::bright_bounds(frame) else {
            return Ok(Vec::new());
        };
        let count = self.labels.len().max(1) as f32;
        let labels = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, l)| LabelCandidate::new(l.clone(), 0.9 * (1.0 - i as f32 / count)))
            .collect();
        Ok(vec![ClassifiedDetection::new(bounds, labels)])
    }

    fn segment(
        &mut self,
        frame: &CameraFrame,
        region: Option<NormalizedRect>,
    ) -> Result<SegmentationMask> {
        let coverage = region
            .filter(|r| r.is_finite() && !r.is_empty())
            .unwrap_or(NormalizedRect::FULL);
        let mut data = vec![BACKGROUND_CLASS; (self.mask_width * self.mask_height) as usize];

        for my in 0..self.mask_height {
            for mx in 0..self.mask_width {
                let u = coverage.x + (mx as f32 + 0.5) / self.mask_width as f32 * coverage.width;
                let v = coverage.y + (my as f32 + 0.5) / self.mask_height as f32 * coverage.height;
                let fx = ((u * frame.width as f32) as u32).min(frame.width - 1);
                let fy = ((v * frame.height as f32) as u32).min(frame.height - 1);
                if frame.pixel(fx, fy).is_some_and(Self::is_bright) {
                    data[(my * self.mask_width + mx) as usize] = self.class_index;
                }
            }
        }

        SegmentationMask::with_coverage(self.mask_width, self.mask_height, data, coverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8x8 dark frame with a bright 2x2 block at (2, 4).
    fn frame_with_block() -> CameraFrame {
        let mut data = vec![10u8; 8 * 8 * 3];
        for y in 4..6 {
            for x in 2..4 {
                let i = (y * 8 + x) * 3;
                data[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        CameraFrame::new(data, 8, 8, 1).unwrap()
    }

    #[test]
    fn detects_bright_block_bounds() {
        let mut backend = SyntheticBackend::new(&["car", "truck"], 7);
        let dets = backend.detect_objects(&frame_with_block()).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bounding_box, NormalizedRect::new(0.25, 0.5, 0.25, 0.25));
        assert_eq!(dets[0].rank_of("car"), Some(0));
    }

    #[test]
    fn dark_frame_yields_no_detections() {
        let mut backend = SyntheticBackend::new(&["car"], 7);
        let frame = CameraFrame::new(vec![0u8; 4 * 4 * 3], 4, 4, 0).unwrap();
        assert!(backend.detect_objects(&frame).unwrap().is_empty());
    }

    #[test]
    fn segments_block_into_class_index() {
        let mut backend = SyntheticBackend::new(&["car"], 7).with_mask_size(4, 4);
        let mask = backend.segment(&frame_with_block(), None).unwrap();
        assert_eq!(mask.value(1, 2), Some(7));
        assert_eq!(mask.value(0, 0), Some(BACKGROUND_CLASS));
        assert_eq!(mask.count_class(7), 1);
    }
}
