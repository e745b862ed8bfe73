//! Structured failures for pipeline stages.
//!
//! Every stage returns `PipelineResult`. Startup code (config, model loading)
//! stays on `anyhow` and never produces these.

use std::time::Duration;

/// A terminal failure of one inference request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no object region found in the first {frames_scanned} frames")]
    SeedNotFound { frames_scanned: usize },

    #[error("tracker initialization failed: {0}")]
    TrackerInitFailure(String),

    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("feature sequence is empty")]
    EmptyFeatureSequence,

    #[error("localizer unavailable: {0}")]
    LocalizerUnavailable(String),

    #[error("unsupported clip format: {0}")]
    UnsupportedFormat(String),

    #[error("clip unreadable: {0}")]
    ClipUnreadable(String),

    #[error("sequence model inference failed: {0}")]
    Inference(String),

    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn tracker_init(msg: impl Into<String>) -> Self {
        Self::TrackerInitFailure(msg.into())
    }

    pub fn localizer(msg: impl Into<String>) -> Self {
        Self::LocalizerUnavailable(msg.into())
    }

    pub fn clip(msg: impl Into<String>) -> Self {
        Self::ClipUnreadable(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SeedNotFound { .. } => "seed_not_found",
            Self::TrackerInitFailure(_) => "tracker_init_failure",
            Self::InvalidDimensions { .. } => "invalid_dimensions",
            Self::EmptyFeatureSequence => "empty_feature_sequence",
            Self::LocalizerUnavailable(_) => "localizer_unavailable",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::ClipUnreadable(_) => "clip_unreadable",
            Self::Inference(_) => "inference_failure",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            PipelineError::SeedNotFound { frames_scanned: 5 },
            PipelineError::tracker_init("x"),
            PipelineError::InvalidDimensions {
                width: 0,
                height: 10,
            },
            PipelineError::EmptyFeatureSequence,
            PipelineError::localizer("x"),
            PipelineError::UnsupportedFormat("x".into()),
            PipelineError::clip("x"),
            PipelineError::inference("x"),
            PipelineError::DeadlineExceeded {
                elapsed: Duration::from_millis(1),
            },
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn seed_not_found_message_names_frame_budget() {
        let err = PipelineError::SeedNotFound { frames_scanned: 5 };
        assert_eq!(
            err.to_string(),
            "no object region found in the first 5 frames"
        );
    }
}
