//! Per-frame driver.
//!
//! Each camera frame:
//! 1. updates the compositor's aspect correction
//! 2. tries to open a request cycle on the `RequestGate`; frames arriving
//!    while a cycle is outstanding are dropped, not queued
//! 3. dispatches object detection and segmentation
//! 4. feeds completions into the reconciler, the depth probe, and the scene
//!
//! Shared state has one mutex per logical owner: the gate, the reconciler
//! (target region), the probe (world anchor + depth), and the scene (mask,
//! region, depth value as seen by the render pass, highlighter). When a
//! completion touches several owners it takes them one at a time in the order
//! reconciler -> probe -> scene and never holds a lock across an inference call.
//!
//! Inference calls are not cancellable and carry no timeout: a backend that
//! never returns keeps its cycle `Submitted` and every later frame is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::compositor::{aspect_correction, CompositorConfig, DrawStats, MaskCompositor, RenderTarget};
use crate::depth::{DepthProbe, HitTester, ProbeContext, ProbeOutcome, Projection, WorldAnchor};
use crate::detect::{BackendRegistry, ClassifiedDetection, SegmentationMask};
use crate::frame::CameraFrame;
use crate::geometry::{AffineTransform, NormalizedRect, ViewportSize};
use crate::reconcile::{DetectionReconciler, ReconcileOutcome, ReconcilerSettings, TargetRegion};
use crate::scene::{HighlighterNode, NodeHandle, Scene, SceneNode};

/// Inference parts per cycle: detection and segmentation.
const PARTS_PER_CYCLE: u8 = 2;

/// How detection and segmentation are issued within one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceOrdering {
    /// Detection completes and is reconciled before segmentation is issued
    /// with this cycle's region.
    #[default]
    Sequential,
    /// Both run concurrently; segmentation uses the previous cycle's region.
    Parallel,
}

impl std::str::FromStr for InferenceOrdering {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(anyhow!(
                "unknown inference ordering '{}' (expected sequential or parallel)",
                other
            )),
        }
    }
}

/// Where inference jobs run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Executor {
    /// On the submitting thread, before `submit_frame` returns.
    Inline,
    /// On dedicated worker threads.
    #[default]
    Background,
}

// ----------------------------------------------------------------------------
// RequestGate: drop-on-busy cycle state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RequestState {
    Idle,
    Submitted { cycle: u64, pending: u8 },
    Resolved { cycle: u64 },
    Failed { cycle: u64 },
}

impl RequestState {
    /// Legal transitions: `Idle -> Submitted -> (Resolved | Failed) -> Idle`,
    /// plus `Submitted -> Submitted` as parts complete.
    pub fn can_transition_to(&self, next: &RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Idle, Submitted { .. }) => true,
            (Submitted { cycle: a, .. }, Submitted { cycle: b, .. }) => a == b,
            (Submitted { cycle: a, .. }, Resolved { cycle: b }) => a == b,
            (Submitted { cycle: a, .. }, Failed { cycle: b }) => a == b,
            (Resolved { .. }, Idle) | (Failed { .. }, Idle) => true,
            _ => false,
        }
    }
}

/// How a finished cycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CycleStatus {
    Resolved,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    pub cycle: u64,
    pub status: CycleStatus,
}

struct GateInner {
    state: RequestState,
    any_failed: bool,
    next_cycle: u64,
    last: Option<CycleOutcome>,
}

impl GateInner {
    fn transition(&mut self, next: RequestState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(anyhow!(
                "illegal request transition {:?} -> {:?}",
                self.state,
                next
            ));
        }
        log::trace!("request gate: {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }
}

/// In-flight guard for one request pipeline.
pub struct RequestGate {
    inner: Mutex<GateInner>,
    idle: Condvar,
}

impl RequestGate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: RequestState::Idle,
                any_failed: false,
                next_cycle: 1,
                last: None,
            }),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, GateInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("request gate lock poisoned"))
    }

    /// Open a cycle expecting `parts` completions. Returns `None` when a
    /// cycle is already outstanding.
    pub fn try_submit(&self, parts: u8) -> Result<Option<u64>> {
        if parts == 0 {
            return Err(anyhow!("a request cycle needs at least one part"));
        }
        let mut inner = self.lock()?;
        if inner.state != RequestState::Idle {
            return Ok(None);
        }
        let cycle = inner.next_cycle;
        inner.transition(RequestState::Submitted {
            cycle,
            pending: parts,
        })?;
        inner.next_cycle += 1;
        inner.any_failed = false;
        Ok(Some(cycle))
    }

    /// Record one finished part. When the last part lands the cycle resolves
    /// (or fails if any part failed) and the gate returns to `Idle`.
    pub fn complete_part(&self, cycle: u64, succeeded: bool) -> Result<Option<CycleOutcome>> {
        let mut inner = self.lock()?;
        let pending = match inner.state {
            RequestState::Submitted { cycle: c, pending } if c == cycle => pending,
            other => {
                return Err(anyhow!(
                    "completion for cycle {} while gate is {:?}",
                    cycle,
                    other
                ))
            }
        };
        inner.any_failed |= !succeeded;

        if pending > 1 {
            inner.transition(RequestState::Submitted {
                cycle,
                pending: pending - 1,
            })?;
            return Ok(None);
        }

        let (terminal, status) = if inner.any_failed {
            (RequestState::Failed { cycle }, CycleStatus::Failed)
        } else {
            (RequestState::Resolved { cycle }, CycleStatus::Resolved)
        };
        inner.transition(terminal)?;
        inner.transition(RequestState::Idle)?;
        let outcome = CycleOutcome { cycle, status };
        inner.last = Some(outcome);
        self.idle.notify_all();
        Ok(Some(outcome))
    }

    pub fn state(&self) -> Result<RequestState> {
        Ok(self.lock()?.state)
    }

    pub fn last_outcome(&self) -> Result<Option<CycleOutcome>> {
        Ok(self.lock()?.last)
    }

    /// Block until the gate is idle or `timeout` elapses. Returns whether it
    /// is idle.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock()?;
        while inner.state != RequestState::Idle {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .idle
                .wait_timeout(inner, deadline - now)
                .map_err(|_| anyhow!("request gate lock poisoned"))?;
            inner = guard;
        }
        Ok(true)
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// FrameOrchestrator
// ----------------------------------------------------------------------------

/// Everything one submission needs from the current frame.
#[derive(Clone)]
pub struct FrameContext {
    pub frame: Arc<CameraFrame>,
    /// Normalized image -> normalized view coordinates.
    pub display_transform: AffineTransform,
    pub viewport: ViewportSize,
    pub projection: Projection,
}

impl FrameContext {
    fn probe_context(&self) -> ProbeContext {
        ProbeContext {
            display_transform: self.display_transform,
            viewport: self.viewport,
            projection: self.projection,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SubmitOutcome {
    Dispatched { cycle: u64 },
    DroppedBusy,
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub reconciler: ReconcilerSettings,
    pub compositor: CompositorConfig,
    /// Raster value of the target class.
    pub class_index: u8,
    pub ordering: InferenceOrdering,
    pub executor: Executor,
    /// Camera buffers arrive rotated a quarter turn relative to the display.
    /// Swaps the camera aspect only; see `CameraConfig::quarter_turn`.
    pub quarter_turn: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerSettings::default(),
            compositor: CompositorConfig::default(),
            class_index: 7,
            ordering: InferenceOrdering::Sequential,
            executor: Executor::Background,
            quarter_turn: false,
        }
    }
}

/// Counters since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub frames_seen: u64,
    pub dispatched: u64,
    pub dropped_busy: u64,
    pub resolved: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    frames_seen: AtomicU64,
    dispatched: AtomicU64,
    dropped_busy: AtomicU64,
    resolved: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the pipeline state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlaySnapshot {
    pub request_state: RequestState,
    pub target_region: Option<TargetRegion>,
    pub anchor: Option<WorldAnchor>,
    pub depth_value: Option<f32>,
    pub compositor_region: Option<NormalizedRect>,
    pub aspect_correction: f32,
    pub has_mask: bool,
    pub highlighter: HighlighterNode,
}

struct Shared {
    settings: OrchestratorSettings,
    backends: Arc<BackendRegistry>,
    hit_tester: Arc<dyn HitTester>,
    gate: RequestGate,
    reconciler: Mutex<DetectionReconciler>,
    probe: Mutex<DepthProbe>,
    scene: Arc<Mutex<Scene>>,
    mask_node: NodeHandle,
    highlighter_node: NodeHandle,
    counters: Counters,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| anyhow!("{} lock poisoned", what))
}

impl Shared {
    fn segmentation_region(&self) -> Result<NormalizedRect> {
        Ok(lock(&self.reconciler, "reconciler")?
            .current()
            .map(|region| region.rect)
            .unwrap_or(NormalizedRect::FULL))
    }

    /// Apply a detection batch. Returns whether inference succeeded.
    fn handle_detections(
        &self,
        cycle: u64,
        result: Result<Vec<ClassifiedDetection>>,
        ctx: &FrameContext,
    ) -> Result<bool> {
        let (outcome, succeeded) = match result {
            Ok(detections) => {
                let mut reconciler = lock(&self.reconciler, "reconciler")?;
                (reconciler.reconcile(&detections), true)
            }
            Err(err) => {
                log::warn!("object detection failed (cycle {}): {:#}", cycle, err);
                let mut reconciler = lock(&self.reconciler, "reconciler")?;
                (reconciler.on_miss(), false)
            }
        };

        match outcome {
            ReconcileOutcome::Updated(region) => {
                let probed = {
                    let mut probe = lock(&self.probe, "depth probe")?;
                    probe.probe(
                        &region.rect,
                        &ctx.probe_context(),
                        self.hit_tester.as_ref(),
                    )
                };
                let mut scene = lock(&self.scene, "scene")?;
                scene
                    .compositor_mut(self.mask_node)?
                    .set_region(Some(region.rect));
                if let ProbeOutcome::Placed { anchor, depth } = probed {
                    scene.compositor_mut(self.mask_node)?.set_depth_value(depth);
                    scene.highlighter_mut(self.highlighter_node)?.place(&anchor);
                }
            }
            ReconcileOutcome::Retained(_) => {}
            ReconcileOutcome::Cleared => {
                let mut scene = lock(&self.scene, "scene")?;
                scene.compositor_mut(self.mask_node)?.set_region(None);
            }
        }
        Ok(succeeded)
    }

    /// Apply a segmentation result. Returns whether inference succeeded.
    fn handle_segmentation(&self, cycle: u64, result: Result<SegmentationMask>) -> Result<bool> {
        let mask = match result {
            Ok(mask) => mask,
            Err(err) => {
                log::warn!("segmentation failed (cycle {}): {:#}", cycle, err);
                return Ok(false);
            }
        };
        if !mask.coverage().is_within_unit() {
            log::warn!(
                "discarding segmentation mask with coverage {:?} (cycle {})",
                mask.coverage(),
                cycle
            );
            return Ok(false);
        }
        let mut scene = lock(&self.scene, "scene")?;
        scene.compositor_mut(self.mask_node)?.set_mask(Arc::new(mask));
        Ok(true)
    }

    fn finish_part(&self, cycle: u64, handled: Result<bool>) {
        let succeeded = match handled {
            Ok(ok) => ok,
            Err(err) => {
                log::error!("cycle {}: applying inference result failed: {:#}", cycle, err);
                false
            }
        };
        match self.gate.complete_part(cycle, succeeded) {
            Ok(Some(outcome)) => {
                match outcome.status {
                    CycleStatus::Resolved => self.counters.resolved.fetch_add(1, Ordering::Relaxed),
                    CycleStatus::Failed => self.counters.failed.fetch_add(1, Ordering::Relaxed),
                };
                log::debug!("cycle {} finished: {:?}", cycle, outcome.status);
            }
            Ok(None) => {}
            Err(err) => log::error!("cycle {}: {:#}", cycle, err),
        }
    }

    /// Fail `parts` outstanding parts of `cycle` that will never run.
    fn abandon_parts(&self, cycle: u64, parts: u8, worker: &str, reason: &dyn std::fmt::Display) {
        for _ in 0..parts {
            self.finish_part(cycle, Err(anyhow!("{} worker not started: {}", worker, reason)));
        }
    }

    fn run_detection(&self, cycle: u64, ctx: &FrameContext) {
        let result = self.backends.detect_objects(&ctx.frame);
        let handled = self.handle_detections(cycle, result, ctx);
        self.finish_part(cycle, handled);
    }

    fn run_segmentation(&self, cycle: u64, ctx: &FrameContext, region: NormalizedRect) {
        let result = self.backends.segment(&ctx.frame, Some(region));
        let handled = self.handle_segmentation(cycle, result);
        self.finish_part(cycle, handled);
    }

    /// Detection then segmentation with the region this cycle produced.
    fn run_sequential(&self, cycle: u64, ctx: &FrameContext) {
        self.run_detection(cycle, ctx);
        match self.segmentation_region() {
            Ok(region) => self.run_segmentation(cycle, ctx, region),
            Err(err) => self.finish_part(cycle, Err(err)),
        }
    }
}

/// Drives detection, reconciliation, probing, and compositing for a stream
/// of camera frames.
pub struct FrameOrchestrator {
    shared: Arc<Shared>,
}

impl FrameOrchestrator {
    /// Adds the mask quad and highlighter to `scene`; the orchestrator keeps
    /// only their handles.
    pub fn new(
        settings: OrchestratorSettings,
        backends: Arc<BackendRegistry>,
        hit_tester: Arc<dyn HitTester>,
        scene: Arc<Mutex<Scene>>,
    ) -> Result<Self> {
        let (mask_node, highlighter_node) = {
            let mut guard = lock(&scene, "scene")?;
            let mask_node = guard.add(SceneNode::MaskQuad(MaskCompositor::new(
                settings.compositor,
                settings.class_index,
            )));
            let highlighter_node = guard.add(SceneNode::Highlighter(HighlighterNode::new()));
            (mask_node, highlighter_node)
        };
        let reconciler = DetectionReconciler::new(settings.reconciler.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                backends,
                hit_tester,
                gate: RequestGate::new(),
                reconciler: Mutex::new(reconciler),
                probe: Mutex::new(DepthProbe::new()),
                scene,
                mask_node,
                highlighter_node,
                counters: Counters::default(),
            }),
        })
    }

    pub fn mask_node(&self) -> NodeHandle {
        self.shared.mask_node
    }

    pub fn highlighter_node(&self) -> NodeHandle {
        self.shared.highlighter_node
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.shared.settings
    }

    /// Submit one frame. Dropped without side effects on inference state when
    /// a cycle is outstanding; the aspect correction is updated either way.
    pub fn submit_frame(&self, ctx: FrameContext) -> Result<SubmitOutcome> {
        let shared = &self.shared;
        shared.counters.frames_seen.fetch_add(1, Ordering::Relaxed);

        let camera_aspect = ctx.frame.aspect_ratio(shared.settings.quarter_turn);
        let correction = aspect_correction(ctx.viewport.aspect(), camera_aspect);
        lock(&shared.scene, "scene")?
            .compositor_mut(shared.mask_node)?
            .set_aspect_correction(correction);

        let Some(cycle) = shared.gate.try_submit(PARTS_PER_CYCLE)? else {
            shared.counters.dropped_busy.fetch_add(1, Ordering::Relaxed);
            log::debug!("frame {} dropped: request in flight", ctx.frame.sequence);
            return Ok(SubmitOutcome::DroppedBusy);
        };
        shared.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        match shared.settings.ordering {
            InferenceOrdering::Sequential => {
                let worker = Arc::clone(shared);
                self.execute(cycle, PARTS_PER_CYCLE, "overlay-infer", move || {
                    worker.run_sequential(cycle, &ctx)
                })?;
            }
            InferenceOrdering::Parallel => {
                // One frame behind: this cycle's detection has not landed yet.
                let region = shared.segmentation_region()?;
                let detect_worker = Arc::clone(shared);
                let detect_ctx = ctx.clone();
                // The segmentation part is not dispatched yet, so a failed
                // spawn here abandons both.
                self.execute(cycle, PARTS_PER_CYCLE, "overlay-detect", move || {
                    detect_worker.run_detection(cycle, &detect_ctx)
                })?;
                let segment_worker = Arc::clone(shared);
                self.execute(cycle, 1, "overlay-segment", move || {
                    segment_worker.run_segmentation(cycle, &ctx, region)
                })?;
            }
        }

        Ok(SubmitOutcome::Dispatched { cycle })
    }

    /// Run `job` on the configured executor. If a worker thread cannot be
    /// spawned, the `parts` it would have completed are failed so the gate
    /// does not stall.
    fn execute<F>(&self, cycle: u64, parts: u8, name: &str, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.shared.settings.executor {
            Executor::Inline => {
                job();
                Ok(())
            }
            Executor::Background => {
                let spawned = thread::Builder::new().name(name.to_string()).spawn(job);
                if let Err(err) = spawned {
                    self.shared.abandon_parts(cycle, parts, name, &err);
                    return Err(err).with_context(|| format!("spawn {} worker", name));
                }
                Ok(())
            }
        }
    }

    /// Draw every scene pass into `target`.
    pub fn render(&self, target: &mut RenderTarget) -> Result<Vec<DrawStats>> {
        let scene = lock(&self.shared.scene, "scene")?;
        Ok(scene.render(target))
    }

    pub fn request_state(&self) -> Result<RequestState> {
        self.shared.gate.state()
    }

    pub fn last_cycle(&self) -> Result<Option<CycleOutcome>> {
        self.shared.gate.last_outcome()
    }

    pub fn wait_idle(&self, timeout: Duration) -> Result<bool> {
        self.shared.gate.wait_idle(timeout)
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.shared.counters;
        OrchestratorStats {
            frames_seen: c.frames_seen.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            dropped_busy: c.dropped_busy.load(Ordering::Relaxed),
            resolved: c.resolved.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> Result<OverlaySnapshot> {
        let request_state = self.shared.gate.state()?;
        let target_region = lock(&self.shared.reconciler, "reconciler")?.current();
        let (anchor, depth_value) = {
            let probe = lock(&self.shared.probe, "depth probe")?;
            (probe.anchor(), probe.depth_value())
        };
        let scene = lock(&self.shared.scene, "scene")?;
        let compositor = scene.compositor(self.shared.mask_node)?;
        Ok(OverlaySnapshot {
            request_state,
            target_region,
            anchor,
            depth_value,
            compositor_region: compositor.region(),
            aspect_correction: compositor.aspect_correction(),
            has_mask: compositor.mask().is_some(),
            highlighter: scene.highlighter(self.shared.highlighter_node)?.clone(),
        })
    }
}
