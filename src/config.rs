use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

use crate::compositor::{CompositorConfig, DepthMode};
use crate::depth::{ClipPlanes, Projection};
use crate::geometry::ViewportSize;
use crate::ingest::CameraConfig;
use crate::labels::LabelVocabulary;
use crate::orchestrator::{Executor, InferenceOrdering, OrchestratorSettings};
use crate::reconcile::{ReconcilerSettings, TrackingPolicy};

const DEFAULT_TARGET_LABEL: &str = "car";
const DEFAULT_RANK_THRESHOLD: usize = 3;
const DEFAULT_ROI_INSET: f32 = -0.02;
const DEFAULT_CAMERA_URL: &str = "stub://camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_VIEWPORT_WIDTH: f32 = 390.0;
const DEFAULT_VIEWPORT_HEIGHT: f32 = 844.0;
const DEFAULT_Z_NEAR: f64 = 0.001;
const DEFAULT_Z_FAR: f64 = 100.0;
const DEFAULT_OVERLAY_COLOR: [u8; 4] = [255, 255, 255, 255];

const ENV_KEYS: &[&str] = &[
    "OVERLAY_TARGET_LABEL",
    "OVERLAY_RANK_THRESHOLD",
    "OVERLAY_ROI_INSET",
    "OVERLAY_TRACKING_POLICY",
    "OVERLAY_DEPTH_MODE",
    "OVERLAY_ORDERING",
    "OVERLAY_CAMERA_URL",
];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    target: Option<TargetConfigFile>,
    render: Option<RenderConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    camera: Option<CameraConfigFile>,
    viewport: Option<ViewportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TargetConfigFile {
    label: Option<String>,
    rank_threshold: Option<usize>,
    roi_inset: Option<f32>,
    policy: Option<TrackingPolicy>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RenderConfigFile {
    depth_mode: Option<DepthMode>,
    reverse_z: Option<bool>,
    z_near: Option<f64>,
    z_far: Option<f64>,
    overlay_color: Option<[u8; 4]>,
    region_filter: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    ordering: Option<InferenceOrdering>,
    executor: Option<Executor>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    quarter_turn: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ViewportConfigFile {
    width: Option<f32>,
    height: Option<f32>,
}

/// On-disk encoding of a config file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// `.toml` is TOML; anything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub reconciler: ReconcilerSettings,
    /// Raster value of `reconciler.target_label`, resolved during validation.
    pub class_index: u8,
    pub render: RenderSettings,
    pub ordering: InferenceOrdering,
    pub executor: Executor,
    pub camera: CameraConfig,
    pub viewport: ViewportSize,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub depth_mode: DepthMode,
    pub projection: Projection,
    pub overlay_color: [u8; 4],
    pub region_filter: bool,
}

impl OverlayConfig {
    /// Defaults, then the file named by `OVERLAY_CONFIG` (if set), then
    /// `OVERLAY_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = env_value("OVERLAY_CONFIG");
        Self::load_with_file(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file instead of
    /// `OVERLAY_CONFIG`. Environment overrides still apply.
    pub fn load_with_file(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults only. Does not read the environment.
    pub fn from_defaults() -> Result<Self> {
        let mut cfg = Self::from_file(OverlayConfigFile::default())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate a config document without any I/O or environment.
    pub fn from_file_str(raw: &str, format: ConfigFormat) -> Result<Self> {
        let mut cfg = Self::from_file(parse_config(raw, format)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Result<Self> {
        let target = file.target.unwrap_or_default();
        let render = file.render.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let viewport = file.viewport.unwrap_or_default();

        let reconciler = ReconcilerSettings {
            target_label: target
                .label
                .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
            rank_threshold: target.rank_threshold.unwrap_or(DEFAULT_RANK_THRESHOLD),
            roi_inset: target.roi_inset.unwrap_or(DEFAULT_ROI_INSET),
            policy: target.policy.unwrap_or_default(),
        };
        let render = RenderSettings {
            depth_mode: render.depth_mode.unwrap_or_default(),
            projection: Projection {
                planes: ClipPlanes::new(
                    render.z_near.unwrap_or(DEFAULT_Z_NEAR),
                    render.z_far.unwrap_or(DEFAULT_Z_FAR),
                ),
                reverse_z: render.reverse_z.unwrap_or(true),
            },
            overlay_color: render.overlay_color.unwrap_or(DEFAULT_OVERLAY_COLOR),
            region_filter: render.region_filter.unwrap_or(true),
        };
        let camera = CameraConfig {
            url: camera
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            quarter_turn: camera.quarter_turn.unwrap_or(false),
        };
        let viewport = ViewportSize::new(
            viewport.width.unwrap_or(DEFAULT_VIEWPORT_WIDTH),
            viewport.height.unwrap_or(DEFAULT_VIEWPORT_HEIGHT),
        );
        Ok(Self {
            reconciler,
            class_index: 0,
            render,
            ordering: pipeline.ordering.unwrap_or_default(),
            executor: pipeline.executor.unwrap_or_default(),
            camera,
            viewport,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(label) = env_value("OVERLAY_TARGET_LABEL") {
            self.reconciler.target_label = label;
        }
        if let Some(threshold) = env_value("OVERLAY_RANK_THRESHOLD") {
            self.reconciler.rank_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("OVERLAY_RANK_THRESHOLD must be a positive integer"))?;
        }
        if let Some(inset) = env_value("OVERLAY_ROI_INSET") {
            self.reconciler.roi_inset = inset
                .parse()
                .map_err(|_| anyhow!("OVERLAY_ROI_INSET must be a number"))?;
        }
        if let Some(policy) = env_value("OVERLAY_TRACKING_POLICY") {
            self.reconciler.policy = policy.parse()?;
        }
        if let Some(mode) = env_value("OVERLAY_DEPTH_MODE") {
            self.render.depth_mode = mode.parse()?;
        }
        if let Some(ordering) = env_value("OVERLAY_ORDERING") {
            self.ordering = ordering.parse()?;
        }
        if let Some(url) = env_value("OVERLAY_CAMERA_URL") {
            self.camera.url = url;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        validate_target_label(&self.reconciler.target_label)?;
        let vocabulary = LabelVocabulary::segmentation_default();
        self.class_index = vocabulary
            .class_index(&self.reconciler.target_label)
            .ok_or_else(|| {
                anyhow!(
                    "target label '{}' is not in the segmentation vocabulary",
                    self.reconciler.target_label
                )
            })?;

        if self.reconciler.rank_threshold == 0 {
            return Err(anyhow!("rank threshold must be at least 1"));
        }
        let inset = self.reconciler.roi_inset;
        if !inset.is_finite() || inset <= -0.5 || inset >= 0.5 {
            return Err(anyhow!("roi inset must lie in (-0.5, 0.5), got {}", inset));
        }
        if !self.render.projection.planes.is_valid() {
            return Err(anyhow!(
                "clip planes must satisfy 0 < z_near < z_far (got {} / {})",
                self.render.projection.planes.z_near,
                self.render.projection.planes.z_far
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be non-zero"));
        }
        let viewport_ok = |v: f32| v.is_finite() && v > 0.0;
        if !viewport_ok(self.viewport.width) || !viewport_ok(self.viewport.height) {
            return Err(anyhow!("viewport dimensions must be positive"));
        }
        Ok(())
    }

    pub fn compositor_config(&self) -> CompositorConfig {
        CompositorConfig::for_mode(self.render.depth_mode, self.render.projection.reverse_z)
            .with_region_filter(self.render.region_filter)
            .with_color(self.render.overlay_color)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            reconciler: self.reconciler.clone(),
            compositor: self.compositor_config(),
            class_index: self.class_index,
            ordering: self.ordering,
            executor: self.executor,
            quarter_turn: self.camera.quarter_turn,
        }
    }

    /// Names of every environment override `load` honours, plus
    /// `OVERLAY_CONFIG`.
    pub fn env_keys() -> impl Iterator<Item = &'static str> {
        std::iter::once("OVERLAY_CONFIG").chain(ENV_KEYS.iter().copied())
    }
}

/// Target labels are plain class names: a letter, then up to 63 letters,
/// digits, `_`, `-`, or spaces.
pub fn validate_target_label(label: &str) -> Result<()> {
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z][A-Za-z0-9_ -]{0,63}$").expect("static label pattern")
    });
    if !re.is_match(label) {
        return Err(anyhow!(
            "target label must match ^[A-Za-z][A-Za-z0-9_ -]{{0,63}}$, got '{}'",
            label
        ));
    }
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_config(raw: &str, format: ConfigFormat) -> Result<OverlayConfigFile> {
    match format {
        ConfigFormat::Json => {
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid JSON config: {}", e))
        }
        ConfigFormat::Toml => toml::from_str(raw).map_err(|e| anyhow!("invalid TOML config: {}", e)),
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    parse_config(&raw, ConfigFormat::from_path(path))
        .map_err(|e| anyhow!("config file {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_car_class() {
        let cfg = OverlayConfig::from_defaults().unwrap();
        assert_eq!(cfg.reconciler.target_label, "car");
        assert_eq!(cfg.class_index, 7);
        assert_eq!(cfg.reconciler.rank_threshold, 3);
        assert_eq!(cfg.render.depth_mode, DepthMode::Occlusion);
        assert!(cfg.render.projection.reverse_z);
        assert_eq!(cfg.ordering, InferenceOrdering::Sequential);
        assert_eq!(cfg.executor, Executor::Background);
        assert_eq!(cfg.viewport, ViewportSize::new(390.0, 844.0));
    }

    #[test]
    fn toml_document_overrides_sections() {
        let raw = r#"
            [target]
            label = "person"
            policy = "clear"

            [render]
            depth_mode = "mask_only"

            [camera]
            quarter_turn = true
        "#;
        let cfg = OverlayConfig::from_file_str(raw, ConfigFormat::Toml).unwrap();
        assert_eq!(cfg.class_index, 15);
        assert_eq!(cfg.reconciler.policy, TrackingPolicy::Clear);
        assert!(!cfg.compositor_config().uses_depth());
        assert!(cfg.orchestrator_settings().quarter_turn);
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = OverlayConfig::from_file_str(r#"{"target": {"label": "truck"}}"#, ConfigFormat::Json)
            .unwrap_err();
        assert!(err.to_string().contains("not in the segmentation vocabulary"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for raw in [
            r#"{"target": {"rank_threshold": 0}}"#,
            r#"{"target": {"roi_inset": 0.5}}"#,
            r#"{"render": {"z_near": 10.0, "z_far": 1.0}}"#,
            r#"{"camera": {"width": 0}}"#,
            r#"{"viewport": {"height": 0.0}}"#,
            r#"{"target": {"label": "9lives"}}"#,
        ] {
            assert!(
                OverlayConfig::from_file_str(raw, ConfigFormat::Json).is_err(),
                "accepted {}",
                raw
            );
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(OverlayConfig::from_file_str(r#"{"targt": {}}"#, ConfigFormat::Json).is_err());
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/overlay.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("overlay.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("overlay")), ConfigFormat::Json);
    }
}
