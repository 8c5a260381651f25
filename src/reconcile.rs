//! Detection reconciliation.
//!
//! Turns a batch of raw detector outputs into a single target region:
//!
//! 1. keep detections whose label list contains the target label
//! 2. rank each by the position of the target label in its own list
//! 3. take the lowest rank; reject it when `rank >= rank_threshold`
//! 4. pad the winning box with `inset_normalized(box, roi_inset)`
//!
//! What happens to the previous region on a rejected or empty batch is
//! governed by `TrackingPolicy`.

use serde::{Deserialize, Serialize};

use crate::detect::ClassifiedDetection;
use crate::geometry::{inset_normalized, NormalizedRect};

/// Behaviour when a cycle produces no acceptable detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPolicy {
    /// Keep the last accepted region unchanged.
    #[default]
    Sticky,
    /// Drop the region until the next accepted detection.
    Clear,
}

impl std::str::FromStr for TrackingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sticky" => Ok(Self::Sticky),
            "clear" => Ok(Self::Clear),
            other => Err(anyhow::anyhow!(
                "unknown tracking policy '{}' (expected sticky or clear)",
                other
            )),
        }
    }
}

/// The region of interest chosen for the current cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetRegion {
    /// Padded region, clamped to the unit square.
    pub rect: NormalizedRect,
    /// Rank of the target label within the winning detection's labels.
    pub rank: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// A detection was accepted and replaced the region.
    Updated(TargetRegion),
    /// No acceptable detection; the previous region (if any) is kept.
    Retained(Option<TargetRegion>),
    /// No acceptable detection; the region was cleared.
    Cleared,
}

impl ReconcileOutcome {
    pub fn region(&self) -> Option<TargetRegion> {
        match self {
            Self::Updated(region) => Some(*region),
            Self::Retained(region) => *region,
            Self::Cleared => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReconcilerSettings {
    pub target_label: String,
    /// Ranks `0..rank_threshold` are accepted.
    pub rank_threshold: usize,
    /// Passed to `inset_normalized`; negative values grow the box.
    pub roi_inset: f32,
    pub policy: TrackingPolicy,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            target_label: "car".to_string(),
            rank_threshold: 3,
            roi_inset: -0.02,
            policy: TrackingPolicy::Sticky,
        }
    }
}

/// Owns the current `TargetRegion`.
#[derive(Debug)]
pub struct DetectionReconciler {
    settings: ReconcilerSettings,
    current: Option<TargetRegion>,
}

impl DetectionReconciler {
    pub fn new(settings: ReconcilerSettings) -> Self {
        Self {
            settings,
            current: None,
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    pub fn current(&self) -> Option<TargetRegion> {
        self.current
    }

    /// Best detection for the target label, with its rank, before thresholding.
    pub fn best_match<'a>(
        &self,
        detections: &'a [ClassifiedDetection],
    ) -> Option<(usize, &'a ClassifiedDetection)> {
        let mut ranked: Vec<(usize, &ClassifiedDetection)> = detections
            .iter()
            // Non-finite or non-positive boxes are malformed output, not candidates.
            .filter(|d| d.bounding_box.is_finite() && !d.bounding_box.is_empty())
            .filter_map(|d| d.rank_of(&self.settings.target_label).map(|rank| (rank, d)))
            .collect();
        // Stable: equal ranks keep detector order.
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().next()
    }

    /// Reconcile one complete detection batch.
    pub fn reconcile(&mut self, detections: &[ClassifiedDetection]) -> ReconcileOutcome {
        match self.best_match(detections) {
            Some((rank, detection)) if rank < self.settings.rank_threshold => {
                let region = TargetRegion {
                    rect: inset_normalized(detection.bounding_box, self.settings.roi_inset),
                    rank,
                };
                self.current = Some(region);
                ReconcileOutcome::Updated(region)
            }
            best => {
                if let Some((rank, _)) = best {
                    log::debug!(
                        "reconcile: best '{}' rank {} outside top {}",
                        self.settings.target_label,
                        rank,
                        self.settings.rank_threshold
                    );
                }
                self.on_miss()
            }
        }
    }

    /// Apply the tracking policy for a cycle without usable detections
    /// (including failed inference).
    pub fn on_miss(&mut self) -> ReconcileOutcome {
        match self.settings.policy {
            TrackingPolicy::Sticky => ReconcileOutcome::Retained(self.current),
            TrackingPolicy::Clear => {
                self.current = None;
                ReconcileOutcome::Cleared
            }
        }
    }
}
