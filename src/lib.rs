//! Grab-motion classification for short clips.
//!
//! A clip goes through five stages:
//!
//! 1. **Seed**: a `Localizer` finds the object in one of the first frames.
//! 2. **Track**: a `VideoPredictor` propagates a mask for that object through
//!    the clip; each non-empty mask is reduced to a box.
//! 3. **Features**: nine motion features per tracked frame.
//! 4. **Rule verdict**: `grab` when the object moves down and reaches the
//!    bottom edge, `invalid` otherwise.
//! 5. **Learned verdict**: a temporal CNN over the feature sequence, mapped
//!    through the configured label table.
//!
//! Both verdicts are always computed; a failure anywhere fails the request.
//!
//! # Module Structure
//!
//! - `clip`: clip sources (synthetic `stub://` clips, local video files)
//! - `localize`, `seed`: seed box search
//! - `track`: predictor capability, mask -> box reduction, template tracker
//! - `features`, `rules`, `classify`: per-frame features and both verdicts
//! - `pipeline`: orchestration, deadlines, timings, result document
//! - `visualize`: optional overlay rendering of the tracked object

pub mod classify;
pub mod clip;
pub mod config;
pub mod error;
pub mod features;
pub mod frame;
pub mod geometry;
pub mod localize;
pub mod pipeline;
pub mod rules;
pub mod seed;
pub mod track;
pub mod visualize;

pub use classify::{LabelTable, Prediction, SequenceClassifier, SequenceModel, UNKNOWN_LABEL};
pub use clip::{ClipReader, ClipSource};
pub use error::{PipelineError, PipelineResult};
pub use features::{extract, FeatureVector, FEATURE_WIDTH};
pub use frame::{ClipInfo, Frame};
pub use geometry::{BoundingBox, Point, Region};
pub use localize::Localizer;
pub use pipeline::{Deadline, InferenceReport, InferenceResult, Pipeline, PipelineSettings, StageTimings};
pub use rules::{classify_rule, motion_signals, MotionSignals, RuleVerdict};
pub use seed::{find_seed, Seed};
pub use track::{track, Mask, TrackOptions, Tracked, TrackerState, VideoPredictor};
