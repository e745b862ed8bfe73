//! Optional tracking overlay: tinted mask plus box outline, one image per
//! tracked frame.
//!
//! - `MemorySinkFactory`: frames kept in memory (tests)
//! - `FrameDirSinkFactory`: one JPEG per frame (feature: visualize)
//! - `VideoSinkFactory`: `track_<clip>.mp4` at clip fps (feature: ingest-file-ffmpeg)
//!
//! Rendering re-reads the clip with its own reader and never feeds anything
//! back into tracking. A failing sink is logged once and then ignored.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::clip::{open_decimated, ClipReader, ClipSource};
use crate::frame::{ClipInfo, Frame};
use crate::geometry::BoundingBox;
use crate::track::Mask;

pub const MASK_TINT_RGB: [u8; 3] = [255, 0, 0];
pub const MASK_ALPHA: f32 = 0.2;
pub const BOX_RGB: [u8; 3] = [0, 255, 0];
pub const BOX_THICKNESS: u32 = 2;

/// Destination for rendered frames of one clip.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates a sink per clip.
pub trait SinkFactory: Send + Sync {
    fn create(&self, clip_name: &str, info: &ClipInfo) -> Result<Box<dyn FrameSink>>;
}

pub struct Visualizer<'c> {
    reader: Box<dyn ClipReader + 'c>,
    sink: Box<dyn FrameSink>,
    failed: bool,
    written: usize,
}

impl<'c> Visualizer<'c> {
    /// `frame_skip` must match the tracker's so frame indices line up.
    pub fn new(clip: &'c dyn ClipSource, frame_skip: usize, sink: Box<dyn FrameSink>) -> Result<Self> {
        Ok(Self {
            reader: open_decimated(clip, frame_skip)?,
            sink,
            failed: false,
            written: 0,
        })
    }

    /// Render frame `frame_index` with the tracked mask and box, if any.
    pub fn observe(&mut self, frame_index: usize, overlay: Option<(&Mask, &BoundingBox)>) {
        if self.failed {
            return;
        }
        if let Err(e) = self.render(frame_index, overlay) {
            log::warn!("visualization disabled at frame {}: {:#}", frame_index, e);
            self.failed = true;
        }
    }

    fn render(&mut self, frame_index: usize, overlay: Option<(&Mask, &BoundingBox)>) -> Result<()> {
        let mut frame = loop {
            let frame = self
                .reader
                .next_frame()?
                .ok_or_else(|| anyhow!("clip ended before frame {}", frame_index))?;
            if frame.index() >= frame_index {
                break frame;
            }
        };
        if let Some((mask, bbox)) = overlay {
            overlay_mask(&mut frame, mask, MASK_TINT_RGB, MASK_ALPHA);
            draw_box(&mut frame, bbox, BOX_RGB, BOX_THICKNESS);
        }
        self.sink.write_frame(&frame)?;
        self.written += 1;
        Ok(())
    }

    /// Flush the sink and return the number of frames written.
    pub fn finish(mut self) -> usize {
        if !self.failed {
            if let Err(e) = self.sink.finish() {
                log::warn!("visualization sink failed to finish: {:#}", e);
            }
        }
        self.written
    }
}

/// Add `alpha * color` to every masked pixel, saturating.
pub fn overlay_mask(frame: &mut Frame, mask: &Mask, color: [u8; 3], alpha: f32) {
    let width = frame.width();
    let height = frame.height().min(mask.height());
    let cols = width.min(mask.width());
    let pixels = frame.pixels_mut();
    for y in 0..height {
        for x in 0..cols {
            if !mask.get(x, y) {
                continue;
            }
            let idx = ((y * width + x) * 3) as usize;
            for c in 0..3 {
                let tinted = pixels[idx + c] as f32 + alpha * color[c] as f32;
                pixels[idx + c] = tinted.min(255.0) as u8;
            }
        }
    }
}

/// Outline `bbox` with a `thickness` pixel border, clipped to the frame.
pub fn draw_box(frame: &mut Frame, bbox: &BoundingBox, color: [u8; 3], thickness: u32) {
    let (width, height) = (frame.width() as i64, frame.height() as i64);
    let (x0, y0, x1, y1) = bbox.corners();
    let (x0, y0) = (x0.round() as i64, y0.round() as i64);
    let (x1, y1) = (x1.round() as i64, y1.round() as i64);
    let t = thickness.max(1) as i64;
    let pixels = frame.pixels_mut();
    let mut paint = |x: i64, y: i64| {
        if x >= 0 && y >= 0 && x < width && y < height {
            let idx = ((y * width + x) * 3) as usize;
            pixels[idx..idx + 3].copy_from_slice(&color);
        }
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_edge = y < y0 + t || y > y1 - t || x < x0 + t || x > x1 - t;
            if on_edge {
                paint(x, y);
            }
        }
    }
}

/// Keeps rendered frames in memory.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far, across all sinks.
    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn create(&self, _clip_name: &str, _info: &ClipInfo) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(MemorySink {
            frames: self.frames.clone(),
        }))
    }
}

pub struct MemorySink {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| anyhow!("memory sink poisoned"))?
            .push(frame.clone());
        Ok(())
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
mod video;

#[cfg(feature = "visualize")]
pub use dir::{FrameDirSink, FrameDirSinkFactory};
#[cfg(feature = "ingest-file-ffmpeg")]
pub use video::{VideoSink, VideoSinkFactory};

#[cfg(feature = "visualize")]
mod dir {
    use std::fs;
    use std::path::PathBuf;

    use anyhow::{anyhow, Context, Result};

    use super::{FrameSink, SinkFactory};
    use crate::frame::{ClipInfo, Frame};

    /// Writes `<output_dir>/track_<clip>/NNNNNN.jpg`.
    pub struct FrameDirSinkFactory {
        output_dir: PathBuf,
    }

    impl FrameDirSinkFactory {
        pub fn new(output_dir: impl Into<PathBuf>) -> Self {
            Self {
                output_dir: output_dir.into(),
            }
        }
    }

    impl SinkFactory for FrameDirSinkFactory {
        fn create(&self, clip_name: &str, _info: &ClipInfo) -> Result<Box<dyn FrameSink>> {
            let dir = self.output_dir.join(format!("track_{}", clip_name));
            fs::create_dir_all(&dir)
                .with_context(|| format!("create visualization dir {}", dir.display()))?;
            log::info!("writing tracking visualization to {}", dir.display());
            Ok(Box::new(FrameDirSink { dir, next: 0 }))
        }
    }

    pub struct FrameDirSink {
        dir: PathBuf,
        next: usize,
    }

    impl FrameSink for FrameDirSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            let image =
                image::RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
                    .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
            let path = self.dir.join(format!("{:06}.jpg", self.next));
            image
                .save(&path)
                .with_context(|| format!("write {}", path.display()))?;
            self.next += 1;
            Ok(())
        }
    }
}
