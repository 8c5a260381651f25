//! Camera frame sources.
//!
//! Sources are pull-based: the frame loop asks for the latest frame whenever
//! it is ready to submit work. Frames that arrive while inference is busy are
//! dropped by the orchestrator, not queued here.
//!
//! - Synthetic source for `stub://` URLs (tests, demo)
//!
//! Platform capture (device cameras, AR sessions) implements `FrameSource`
//! outside this crate.

pub mod synthetic;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::CameraFrame;

pub use synthetic::SyntheticCameraSource;

/// Configuration for a camera source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Source URL (`stub://name` for the synthetic source).
    pub url: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Buffers arrive rotated a quarter turn relative to the display.
    ///
    /// Only the aspect ratio used for mask correction is swapped. Backends
    /// must already return boxes and masks in display orientation; nothing
    /// here rotates pixels or coordinates.
    pub quarter_turn: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
            quarter_turn: false,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

/// Pull-based camera frame source.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Capture the latest available frame.
    fn next_frame(&mut self) -> Result<CameraFrame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source that serves `config.url`.
pub fn open_source(config: CameraConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        Ok(Box::new(SyntheticCameraSource::new(config)?))
    } else {
        Err(anyhow!(
            "no frame source for '{}'; platform capture must supply its own FrameSource",
            config.url
        ))
    }
}
