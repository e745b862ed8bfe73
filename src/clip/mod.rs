//! Clip sources.
//!
//! A clip is read more than once per request (seed search, tracking and the
//! optional visualization pass), so sources hand out independent readers that
//! each start at the first frame:
//! - `SyntheticClip`: in-memory frames (`stub://` paths, tests)
//! - `FileClip`: local video files (feature: ingest-file-ffmpeg)
//!
//! Readers own their decoder state; dropping a reader closes it.

mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;

use anyhow::Result;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{ClipInfo, Frame};

pub use file::{is_supported_clip_path, FileClip, SUPPORTED_EXTENSIONS};
pub use synthetic::{SquareMotion, SyntheticClip};

/// A decodable clip that can be read from the start any number of times.
pub trait ClipSource: Send + Sync {
    /// Short name used for log lines and visualization output.
    fn name(&self) -> &str;

    fn info(&self) -> ClipInfo;

    /// Open a fresh reader positioned at frame 0.
    fn open(&self) -> Result<Box<dyn ClipReader + '_>>;
}

/// Sequential frame cursor over one clip.
pub trait ClipReader {
    /// Next decoded frame, `None` once the clip is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Open a reader that yields every `frame_skip`-th frame.
///
/// Frames are re-indexed so indices stay dense in the decimated stream.
/// A factor of 0 or 1 yields every frame.
pub fn open_decimated<'c>(
    clip: &'c dyn ClipSource,
    frame_skip: usize,
) -> Result<Box<dyn ClipReader + 'c>> {
    let reader = clip.open()?;
    if frame_skip <= 1 {
        return Ok(reader);
    }
    Ok(Box::new(Decimated {
        inner: reader,
        step: frame_skip,
        source_index: 0,
        emitted: 0,
    }))
}

/// Frame count seen by a reader opened with `open_decimated`.
pub fn decimated_frame_count(frame_count: usize, frame_skip: usize) -> usize {
    if frame_skip <= 1 {
        frame_count
    } else {
        frame_count.div_ceil(frame_skip)
    }
}

/// Open a clip by path.
///
/// `stub://<name>` opens the synthetic demo clip; anything else must be a
/// local video file with a supported extension.
pub fn open_clip(path: &str) -> PipelineResult<Box<dyn ClipSource>> {
    if let Some(name) = path.strip_prefix("stub://") {
        let name = if name.is_empty() { "demo" } else { name };
        return Ok(Box::new(SyntheticClip::demo(name)));
    }
    if path.contains("://") {
        return Err(PipelineError::UnsupportedFormat(format!(
            "only local clip paths are supported, got '{}'",
            path
        )));
    }
    Ok(Box::new(FileClip::open(path)?))
}

struct Decimated<'c> {
    inner: Box<dyn ClipReader + 'c>,
    step: usize,
    source_index: usize,
    emitted: usize,
}

impl ClipReader for Decimated<'_> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(frame) = self.inner.next_frame()? {
            let keep = self.source_index % self.step == 0;
            self.source_index += 1;
            if keep {
                let frame = frame.with_index(self.emitted);
                self.emitted += 1;
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(reader: &mut dyn ClipReader) -> Vec<usize> {
        let mut out = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            out.push(frame.index());
        }
        out
    }

    #[test]
    fn readers_restart_from_first_frame() {
        let clip = SyntheticClip::blank("blank", 8, 8, 4);
        let mut first = clip.open().unwrap();
        first.next_frame().unwrap();
        first.next_frame().unwrap();
        let mut second = clip.open().unwrap();
        assert_eq!(second.next_frame().unwrap().unwrap().index(), 0);
    }

    #[test]
    fn decimation_keeps_every_kth_frame_and_reindexes() {
        let clip = SyntheticClip::moving_square(
            "square",
            32,
            32,
            7,
            SquareMotion {
                size: 4,
                start: (0, 0),
                step: (1, 1),
            },
        );
        let mut reader = open_decimated(&clip, 3).unwrap();
        let mut positions = Vec::new();
        let mut seen = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            seen.push(frame.index());
            // top-left pixel of the square identifies the source frame
            let source = (0..32u32)
                .find(|&d| frame.rgb(d, d) == Some(synthetic::OBJECT_RGB))
                .unwrap();
            positions.push(source);
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(positions, vec![0, 3, 6]);
        assert_eq!(decimated_frame_count(7, 3), 3);
    }

    #[test]
    fn skip_of_one_is_identity() {
        let clip = SyntheticClip::blank("blank", 4, 4, 3);
        let mut reader = open_decimated(&clip, 1).unwrap();
        assert_eq!(indices(reader.as_mut()), vec![0, 1, 2]);
        assert_eq!(decimated_frame_count(3, 0), 3);
    }

    #[test]
    fn open_clip_rejects_remote_urls() {
        let err = open_clip("http://example.com/clip.mp4").err().unwrap();
        assert_eq!(err.code(), "unsupported_format");
    }

    #[test]
    fn open_clip_stub_scheme_yields_demo() {
        let clip = open_clip("stub://shelf").unwrap();
        assert_eq!(clip.name(), "shelf");
        assert!(clip.info().frame_count.unwrap() > 0);
    }
}
