//! Decoded frames and clip metadata.
//!
//! - `Frame`: one RGB24 image with its index in the (possibly decimated) stream.
//! - `ClipInfo`: width, height and frame rate of a clip.

use anyhow::{anyhow, Result};

/// One decoded RGB24 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    index: usize,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap packed RGB24 pixels. The buffer length must be `width * height * 3`.
    pub fn new(index: usize, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            pixels,
        })
    }

    /// Solid-color frame.
    pub fn filled(index: usize, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            index,
            width,
            height,
            pixels,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// RGB triple at `(x, y)`, `None` outside the frame.
    pub fn rgb(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    /// Luma plane scaled to `0.0..=1.0` (BT.601 weights), row-major.
    pub fn luma(&self) -> Vec<f32> {
        self.pixels
            .chunks_exact(3)
            .map(|px| {
                (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32) / 255.0
            })
            .collect()
    }
}

/// Clip-level metadata exposed by a clip source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    /// Decoded frame count when the container reports one.
    pub frame_count: Option<usize>,
}
