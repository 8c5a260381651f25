//! Occlusion Overlay
//!
//! Core of an AR overlay that highlights one class of real-world object. For
//! every camera frame an object detector proposes boxes, the best box for the
//! target label becomes a region of interest, a hit-test at its center gives
//! the object's camera distance, and a semantic segmentation mask is
//! composited over the camera image inside that region. The mask pass writes
//! and tests the depth the object would have produced, so nearer real
//! geometry occludes the overlay.
//!
//! # Module Structure
//!
//! - `geometry`: normalized rects, the display transform, view-space mapping
//! - `labels`: class vocabularies and raster indices
//! - `frame`: camera frames handed to inference
//! - `ingest`: frame sources (synthetic `stub://`)
//! - `detect`: inference backend trait, registry, detections and masks
//! - `reconcile`: detection batch -> target region
//! - `depth`: depth-buffer value and the center-of-region depth probe
//! - `compositor`: the mask pass and its software render target
//! - `scene`: node table (mask quad, highlighter)
//! - `orchestrator`: per-frame submission, drop-on-busy, completion handling
//! - `config`: file + environment configuration

pub mod compositor;
pub mod config;
pub mod depth;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod labels;
pub mod orchestrator;
pub mod reconcile;
pub mod scene;

pub use compositor::{
    aspect_correction, camera_uv, composite_mask, CompositorConfig, CompositorUniforms,
    DepthCompare, DepthMode, DrawStats, MaskCompositor, RenderTarget,
};
pub use config::{ConfigFormat, OverlayConfig};
pub use depth::{
    depth_buffer_value, ClipPlanes, DepthProbe, HitTester, ProbeContext, ProbeOutcome, Projection,
    SurfaceHit, WorldAnchor,
};
pub use detect::{
    BackendRegistry, ClassifiedDetection, InferenceBackend, InferenceCapability, LabelCandidate,
    SegmentationMask, SharedMask, SyntheticBackend,
};
pub use frame::CameraFrame;
pub use geometry::{
    inset_normalized, view_space_center, view_space_rect, AffineTransform, NormalizedRect,
    ViewPoint, ViewportSize,
};
pub use ingest::{open_source, CameraConfig, FrameSource};
pub use labels::{LabelVocabulary, BACKGROUND_CLASS, SEGMENTATION_LABELS};
pub use orchestrator::{
    CycleOutcome, CycleStatus, Executor, FrameContext, FrameOrchestrator, InferenceOrdering,
    OrchestratorSettings, OrchestratorStats, OverlaySnapshot, RequestGate, RequestState,
    SubmitOutcome,
};
pub use reconcile::{
    DetectionReconciler, ReconcileOutcome, ReconcilerSettings, TargetRegion, TrackingPolicy,
};
pub use scene::{HighlighterNode, NodeHandle, Scene, SceneNode};
