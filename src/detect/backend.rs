use anyhow::{anyhow, Result};

use crate::detect::result::{ClassifiedDetection, SegmentationMask};
use crate::frame::CameraFrame;
use crate::geometry::NormalizedRect;

/// Inference capabilities a backend may provide.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceCapability {
    ObjectDetection,
    Segmentation,
}

/// Inference backend trait.
///
/// Models are black boxes to the pipeline: a backend only has to turn a frame
/// into labeled boxes, a class raster, or both. Backends are called from
/// whichever thread the orchestrator dispatches on and must not retain the
/// frame beyond the call.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: InferenceCapability) -> bool;

    /// Detect objects in a frame. Labels per detection are most-likely-first.
    fn detect_objects(&mut self, _frame: &CameraFrame) -> Result<Vec<ClassifiedDetection>> {
        Err(anyhow!("backend '{}' does not detect objects", self.name()))
    }

    /// Segment a frame, optionally restricted to `region`.
    fn segment(
        &mut self,
        _frame: &CameraFrame,
        _region: Option<NormalizedRect>,
    ) -> Result<SegmentationMask> {
        Err(anyhow!("backend '{}' does not segment", self.name()))
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
