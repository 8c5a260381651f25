//! Synthetic camera source.
//!
//! Serves `stub://` URLs with a dark scene and a bright rectangle that drifts
//! horizontally across it, bouncing off the frame edges. The rectangle is what
//! `SyntheticBackend` detects and segments.

use anyhow::{anyhow, Result};

use super::{CameraConfig, FrameSource, SourceStats};
use crate::frame::{CameraFrame, RGB_CHANNELS};

const BACKGROUND_LEVEL: u8 = 24;
const OBJECT_LEVEL: u8 = 250;

pub struct SyntheticCameraSource {
    config: CameraConfig,
    frame_count: u64,
    connected: bool,
    object_x: i64,
    velocity: i64,
}

impl SyntheticCameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if !config.url.starts_with("stub://") {
            return Err(anyhow!("synthetic source only serves stub:// URLs"));
        }
        if config.width < 4 || config.height < 4 {
            return Err(anyhow!("synthetic frames must be at least 4x4"));
        }
        let velocity = i64::from((config.width / 64).max(1));
        Ok(Self {
            config,
            frame_count: 0,
            connected: false,
            object_x: 0,
            velocity,
        })
    }

    /// Object box in pixels: a quarter of the frame in each dimension,
    /// vertically centered.
    fn object_rect(&self) -> (u32, u32, u32, u32) {
        let w = (self.config.width / 4).max(1);
        let h = (self.config.height / 4).max(1);
        let y = (self.config.height - h) / 2;
        (self.object_x as u32, y, w, h)
    }

    fn advance_object(&mut self) {
        let max_x = i64::from(self.config.width - (self.config.width / 4).max(1));
        let next = self.object_x + self.velocity;
        if next < 0 || next > max_x {
            self.velocity = -self.velocity;
        }
        self.object_x = (self.object_x + self.velocity).clamp(0, max_x);
    }

    fn render(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![BACKGROUND_LEVEL; width * height * RGB_CHANNELS];
        let (ox, oy, ow, oh) = self.object_rect();
        for y in oy..oy + oh {
            let row = y as usize * width;
            for x in ox..(ox + ow).min(self.config.width) {
                let offset = (row + x as usize) * RGB_CHANNELS;
                pixels[offset..offset + RGB_CHANNELS].fill(OBJECT_LEVEL);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticCameraSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticCameraSource: connected to {}", self.config.url);
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CameraFrame> {
        if !self.connected {
            return Err(anyhow!("source {} is not connected", self.config.url));
        }
        self.frame_count += 1;
        if self.frame_count > 1 {
            self.advance_object();
        }
        CameraFrame::new(
            self.render(),
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32) -> CameraConfig {
        CameraConfig {
            url: "stub://test".to_string(),
            width,
            height,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn requires_connect_before_frames() {
        let mut source = SyntheticCameraSource::new(config(16, 16)).unwrap();
        assert!(source.next_frame().is_err());
        source.connect().unwrap();
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.width, 16);
    }

    #[test]
    fn object_drifts_and_stays_in_frame() {
        let mut source = SyntheticCameraSource::new(config(16, 8)).unwrap();
        source.connect().unwrap();
        let first = source.next_frame().unwrap();
        assert_eq!(first.pixel(0, 3), Some([OBJECT_LEVEL; 3]));
        let second = source.next_frame().unwrap();
        assert_eq!(second.pixel(0, 3), Some([BACKGROUND_LEVEL; 3]));
        for _ in 0..100 {
            let frame = source.next_frame().unwrap();
            let (ox, _, ow, _) = source.object_rect();
            assert!(ox + ow <= frame.width);
        }
        assert_eq!(source.stats().frames_captured, 102);
    }

    #[test]
    fn rejects_non_stub_urls() {
        let mut cfg = config(16, 16);
        cfg.url = "rtsp://camera".to_string();
        assert!(SyntheticCameraSource::new(cfg).is_err());
    }
}
