//! In-memory clips for tests and the `stub://` demo.

use anyhow::{anyhow, Result};

use super::{ClipReader, ClipSource};
use crate::frame::{ClipInfo, Frame};
use crate::geometry::{Point, Region};

pub const BACKGROUND_RGB: [u8; 3] = [40, 40, 40];
pub const OBJECT_RGB: [u8; 3] = [220, 220, 220];

const DEFAULT_FPS: f32 = 30.0;

/// Straight-line motion of a solid square, one step per frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquareMotion {
    pub size: u32,
    pub start: (i32, i32),
    pub step: (i32, i32),
}

impl SquareMotion {
    /// Top-left corner at `frame_index`. May lie outside the frame.
    pub fn position(&self, frame_index: usize) -> (i32, i32) {
        let i = frame_index as i32;
        (
            self.start.0 + self.step.0 * i,
            self.start.1 + self.step.1 * i,
        )
    }

    /// Visible outline of the square at `frame_index`, clipped to the frame.
    pub fn region_at(&self, frame_index: usize, width: u32, height: u32) -> Option<Region> {
        let (x, y) = self.position(frame_index);
        let size = self.size as i32;
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + size).min(width as i32);
        let y1 = (y + size).min(height as i32);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        let (x0, y0, x1, y1) = (x0 as f32, y0 as f32, x1 as f32, y1 as f32);
        Some(Region::new(vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]))
    }
}

/// Clip whose frames live in memory.
pub struct SyntheticClip {
    name: String,
    info: ClipInfo,
    frames: Vec<Frame>,
    motion: Option<SquareMotion>,
}

impl SyntheticClip {
    /// Build from explicit frames. All frames must share one size.
    pub fn new(name: impl Into<String>, fps: f32, frames: Vec<Frame>) -> Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| anyhow!("synthetic clip needs at least one frame"))?;
        let (width, height) = (first.width(), first.height());
        if let Some(bad) = frames
            .iter()
            .find(|f| f.width() != width || f.height() != height)
        {
            return Err(anyhow!(
                "frame {} is {}x{}, expected {}x{}",
                bad.index(),
                bad.width(),
                bad.height(),
                width,
                height
            ));
        }
        let frames: Vec<Frame> = frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| f.with_index(i))
            .collect();
        Ok(Self {
            name: name.into(),
            info: ClipInfo {
                width,
                height,
                fps,
                frame_count: Some(frames.len()),
            },
            frames,
            motion: None,
        })
    }

    /// `count` frames of plain background.
    pub fn blank(name: impl Into<String>, width: u32, height: u32, count: usize) -> Self {
        let frames = (0..count)
            .map(|i| Frame::filled(i, width, height, BACKGROUND_RGB))
            .collect::<Vec<_>>();
        Self {
            name: name.into(),
            info: ClipInfo {
                width,
                height,
                fps: DEFAULT_FPS,
                frame_count: Some(count),
            },
            frames,
            motion: None,
        }
    }

    /// Bright square on a dark background following `motion`.
    pub fn moving_square(
        name: impl Into<String>,
        width: u32,
        height: u32,
        count: usize,
        motion: SquareMotion,
    ) -> Self {
        let mut clip = Self::blank(name, width, height, count);
        for (i, frame) in clip.frames.iter_mut().enumerate() {
            paint_square(frame, motion.position(i), motion.size);
        }
        clip.motion = Some(motion);
        clip
    }

    /// A box dropping straight down and out through the bottom edge.
    pub fn demo(name: impl Into<String>) -> Self {
        Self::moving_square(
            name,
            160,
            240,
            24,
            SquareMotion {
                size: 24,
                start: (68, 20),
                step: (0, 10),
            },
        )
    }

    /// Outline of the painted square at `frame_index`, if any.
    pub fn object_region(&self, frame_index: usize) -> Option<Region> {
        self.motion?
            .region_at(frame_index, self.info.width, self.info.height)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

impl ClipSource for SyntheticClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> ClipInfo {
        self.info
    }

    fn open(&self) -> Result<Box<dyn ClipReader + '_>> {
        log::debug!("SyntheticClip: opened {}", self.name);
        Ok(Box::new(SyntheticReader {
            frames: &self.frames,
            cursor: 0,
        }))
    }
}

struct SyntheticReader<'c> {
    frames: &'c [Frame],
    cursor: usize,
}

impl ClipReader for SyntheticReader<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.frames.get(self.cursor).cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }
}

fn paint_square(frame: &mut Frame, (x, y): (i32, i32), size: u32) {
    let (width, height) = (frame.width() as i32, frame.height() as i32);
    let stride = width as usize * 3;
    let pixels = frame.pixels_mut();
    for row in y.max(0)..(y + size as i32).min(height) {
        for col in x.max(0)..(x + size as i32).min(width) {
            let idx = row as usize * stride + col as usize * 3;
            pixels[idx..idx + 3].copy_from_slice(&OBJECT_RGB);
        }
    }
}
