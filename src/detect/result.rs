use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::NormalizedRect;

/// One (label, confidence) candidate. Detectors list these most-likely-first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelCandidate {
    pub label: String,
    pub confidence: f32,
}

impl LabelCandidate {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// One object-detector output: a normalized box plus its ranked labels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedDetection {
    pub bounding_box: NormalizedRect,
    pub labels: Vec<LabelCandidate>,
}

impl ClassifiedDetection {
    pub fn new(bounding_box: NormalizedRect, labels: Vec<LabelCandidate>) -> Self {
        Self {
            bounding_box,
            labels,
        }
    }

    /// Builds a detection from labels alone, with descending synthetic
    /// confidences. Handy for fixtures.
    pub fn with_labels(bounding_box: NormalizedRect, labels: &[&str]) -> Self {
        let count = labels.len().max(1) as f32;
        let labels = labels
            .iter()
            .enumerate()
            .map(|(i, l)| LabelCandidate::new(*l, 1.0 - i as f32 / count))
            .collect();
        Self::new(bounding_box, labels)
    }

    /// Position of `label` in this detection's own candidate list.
    pub fn rank_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|c| c.label == label)
    }

    pub fn top_label(&self) -> Option<&LabelCandidate> {
        self.labels.first()
    }
}

/// Per-pixel class raster (single channel, 8-bit).
///
/// `coverage` is the normalized frame region the raster spans: the full
/// frame unless the segmenter ran on a cropped region.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
    coverage: NormalizedRect,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::with_coverage(width, height, data, NormalizedRect::FULL)
    }

    pub fn with_coverage(
        width: u32,
        height: u32,
        data: Vec<u8>,
        coverage: NormalizedRect,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("segmentation mask dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("segmentation mask dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "segmentation mask length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        if !coverage.is_finite() || coverage.is_empty() {
            return Err(anyhow!("segmentation mask coverage must be a non-empty rect"));
        }
        Ok(Self {
            width,
            height,
            data,
            coverage,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn coverage(&self) -> NormalizedRect {
        self.coverage
    }

    pub fn value(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Nearest-neighbour read at normalized frame coordinates. Returns `None`
    /// outside the mask coverage.
    pub fn sample(&self, u: f32, v: f32) -> Option<u8> {
        if !self.coverage.contains(u, v) {
            return None;
        }
        let local_u = (u - self.coverage.x) / self.coverage.width;
        let local_v = (v - self.coverage.y) / self.coverage.height;
        let x = ((local_u * self.width as f32) as u32).min(self.width - 1);
        let y = ((local_v * self.height as f32) as u32).min(self.height - 1);
        self.value(x, y)
    }

    /// Number of raster cells holding `class_index`.
    pub fn count_class(&self, class_index: u8) -> usize {
        self.data.iter().filter(|&&v| v == class_index).count()
    }
}

/// Masks are replaced wholesale each cycle and shared with the render side.
pub type SharedMask = Arc<SegmentationMask>;
