//! Local video file clips.
//!
//! Only local paths with a known container extension are accepted. Decoding
//! needs the ingest-file-ffmpeg feature; without it opening a file fails with
//! `ClipUnreadable`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use super::{ClipReader, ClipSource};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::ClipInfo;

/// Container extensions accepted for uploaded clips.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// Local video file clip.
pub struct FileClip {
    path: PathBuf,
    name: String,
    info: ClipInfo,
}

impl FileClip {
    pub fn open<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        if !is_supported_clip_path(path) {
            return Err(PipelineError::UnsupportedFormat(format!(
                "{} (expected one of: {})",
                path.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
        if !path.is_file() {
            return Err(PipelineError::clip(format!(
                "{} does not exist or is not a file",
                path.display()
            )));
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());

        let info = probe(path)?;
        log::info!(
            "FileClip: {} is {}x{} @ {:.2} fps ({} frames)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(Self {
            path: path.to_path_buf(),
            name,
            info,
        })
    }
}

impl ClipSource for FileClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> ClipInfo {
        self.info
    }

    fn open(&self) -> Result<Box<dyn ClipReader + '_>> {
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Box::new(super::file_ffmpeg::FfmpegClipReader::open(
                &self.path,
            )?))
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow::anyhow!(
                "file decoding requires the ingest-file-ffmpeg feature"
            ))
        }
    }
}

/// True when `path` ends in one of `SUPPORTED_EXTENSIONS` (any case).
pub fn is_supported_clip_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn probe(path: &Path) -> PipelineResult<ClipInfo> {
    super::file_ffmpeg::probe(path).map_err(|e| PipelineError::clip(format!("{:#}", e)))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn probe(_path: &Path) -> PipelineResult<ClipInfo> {
    Err(PipelineError::clip(
        "file decoding requires the ingest-file-ffmpeg feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(is_supported_clip_path("shelf.mp4"));
        assert!(is_supported_clip_path("/tmp/upload.MOV"));
        assert!(is_supported_clip_path("a/b/c.avi"));
        assert!(!is_supported_clip_path("frames.mkv"));
        assert!(!is_supported_clip_path("noext"));
    }

    #[test]
    fn unsupported_extension_is_rejected_before_io() {
        let err = FileClip::open("/definitely/missing.webm").err().unwrap();
        assert_eq!(err.code(), "unsupported_format");
    }

    #[test]
    fn missing_file_is_unreadable() {
        let err = FileClip::open("/definitely/missing.mp4").err().unwrap();
        assert_eq!(err.code(), "clip_unreadable");
    }
}
