//! Camera frame container.
//!
//! - `CameraFrame`: RGB pixels plus dimensions and a capture sequence number.
//!   Frames are handed to inference behind an `Arc` and never mutated.
//!
//! Pixel bytes are only reachable through `pixels()`; nothing in the core
//! logs or persists them.

use anyhow::{anyhow, Result};

/// Bytes per pixel for the packed RGB layout frames use.
pub const RGB_CHANNELS: usize = 3;

/// One captured camera frame.
pub struct CameraFrame {
    /// Packed RGB24, row-major, top-left origin.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonic capture counter assigned by the source.
    pub sequence: u64,
}

// No Clone: frames are shared through Arc, not duplicated.

impl CameraFrame {
    /// Wraps packed RGB bytes. The length must be `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Width over height of the buffer as delivered. With `quarter_turn`
    /// the buffer is presented rotated, so the dimensions swap.
    pub fn aspect_ratio(&self, quarter_turn: bool) -> f32 {
        if quarter_turn {
            self.height as f32 / self.width as f32
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl std::fmt::Debug for CameraFrame {
    // Pixel bytes stay out of debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}
