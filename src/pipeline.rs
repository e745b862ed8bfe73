//! Request orchestration: seed -> track -> features -> rule and learned
//! verdicts.
//!
//! One `infer` call runs its stages in sequence on the calling thread. The
//! only state shared between calls is the read-only classifier, localizer and
//! predictor handed to `Pipeline::new`; tracker state lives and dies inside
//! the call.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::classify::{Prediction, SequenceClassifier};
use crate::clip::{decimated_frame_count, open_decimated, ClipSource};
use crate::error::{PipelineError, PipelineResult};
use crate::features::extract;
use crate::geometry::BoundingBox;
use crate::localize::Localizer;
use crate::rules::{
    motion_signals, verdict_for, MotionSignals, RuleVerdict, DEFAULT_OUT_OF_FRAME_THRESHOLD,
};
use crate::seed::{find_seed, Seed, DEFAULT_SEED_FRAMES};
use crate::track::{track, TrackOptions, VideoPredictor};
use crate::visualize::{SinkFactory, Visualizer};

/// Wall-clock budget for one request.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> PipelineResult<()> {
        let elapsed = self.elapsed();
        if elapsed >= self.limit {
            return Err(PipelineError::DeadlineExceeded { elapsed });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub seed_max_frames: usize,
    /// Keep every n-th decoded frame; 1 keeps all.
    pub frame_skip: usize,
    pub rule_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            seed_max_frames: DEFAULT_SEED_FRAMES,
            frame_skip: 1,
            rule_threshold: DEFAULT_OUT_OF_FRAME_THRESHOLD,
        }
    }
}

/// Elapsed time per stage, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub seed_ms: f64,
    pub tracking_ms: f64,
    pub features_ms: f64,
    pub rule_ms: f64,
    pub learned_ms: f64,
    pub total_ms: f64,
}

/// Both verdicts for one clip.
#[derive(Clone, Debug)]
pub struct InferenceResult {
    seed: Seed,
    boxes: Vec<BoundingBox>,
    signals: Option<MotionSignals>,
    rule_verdict: RuleVerdict,
    prediction: Prediction,
    timings: StageTimings,
}

impl InferenceResult {
    pub fn rule_verdict(&self) -> RuleVerdict {
        self.rule_verdict
    }

    pub fn learned_verdict(&self) -> &str {
        &self.prediction.label
    }

    pub fn learned_index(&self) -> usize {
        self.prediction.index
    }

    pub fn prediction(&self) -> &Prediction {
        &self.prediction
    }

    /// `None` when fewer than two boxes were tracked.
    pub fn signals(&self) -> Option<MotionSignals> {
        self.signals
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    pub fn frames_tracked(&self) -> usize {
        self.boxes.len()
    }

    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }
}

pub struct Pipeline {
    localizer: Arc<dyn Localizer>,
    predictor: Arc<dyn VideoPredictor>,
    classifier: Arc<SequenceClassifier>,
    settings: PipelineSettings,
    sink_factory: Option<Arc<dyn SinkFactory>>,
}

impl Pipeline {
    pub fn new(
        localizer: Arc<dyn Localizer>,
        predictor: Arc<dyn VideoPredictor>,
        classifier: Arc<SequenceClassifier>,
    ) -> Self {
        Self {
            localizer,
            predictor,
            classifier,
            settings: PipelineSettings::default(),
            sink_factory: None,
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Render every tracked frame into sinks from `factory`.
    pub fn with_visualization(mut self, factory: Arc<dyn SinkFactory>) -> Self {
        self.sink_factory = Some(factory);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn infer(&self, clip: &dyn ClipSource) -> PipelineResult<InferenceResult> {
        self.run(clip, None)
    }

    /// Like `infer`, but gives up with `DeadlineExceeded` once `timeout` has
    /// passed. The check runs between stages, before every seed localizer call
    /// and between tracked frames. A stage that fails after the deadline
    /// passed reports `DeadlineExceeded`.
    pub fn infer_within(
        &self,
        clip: &dyn ClipSource,
        timeout: Duration,
    ) -> PipelineResult<InferenceResult> {
        self.run(clip, Some(Deadline::after(timeout)))
    }

    fn run(
        &self,
        clip: &dyn ClipSource,
        deadline: Option<Deadline>,
    ) -> PipelineResult<InferenceResult> {
        let check = || deadline.as_ref().map_or(Ok(()), Deadline::check);
        let total = Instant::now();
        let info = clip.info();
        let frame_skip = self.settings.frame_skip.max(1);
        let frames = info
            .frame_count
            .map(|n| decimated_frame_count(n, frame_skip).to_string())
            .unwrap_or_else(|| "?".to_string());
        log::info!(
            "inference on {} ({}x{} @ {:.1} fps, {} frames after skip {})",
            clip.name(),
            info.width,
            info.height,
            info.fps,
            frames,
            frame_skip
        );
        check()?;

        let started = Instant::now();
        let seed = {
            let mut reader = open_decimated(clip, frame_skip)
                .map_err(|e| PipelineError::clip(format!("open {}: {:#}", clip.name(), e)))?;
            find_seed(
                reader.as_mut(),
                self.localizer.as_ref(),
                self.settings.seed_max_frames,
                deadline.as_ref(),
            )
            .map_err(|e| match check() {
                Err(expired) => expired,
                Ok(()) => e,
            })?
        };
        let seed_ms = millis(started);
        check()?;

        let started = Instant::now();
        let mut visualizer = self.visualizer(clip, frame_skip);
        let options = TrackOptions {
            frame_skip,
            deadline,
        };
        let tracked = track(
            self.predictor.as_ref(),
            clip,
            &seed.bbox,
            &options,
            visualizer.as_mut(),
        );
        if let Some(vis) = visualizer {
            log::info!("visualization: {} frames written", vis.finish());
        }
        let tracked = tracked?;
        let tracking_ms = millis(started);
        check()?;

        let started = Instant::now();
        let features = extract(&tracked.boxes, info.width, info.height)?;
        let features_ms = millis(started);

        let started = Instant::now();
        let signals = motion_signals(&tracked.boxes, info.height, self.settings.rule_threshold);
        let rule_verdict = verdict_for(signals);
        let rule_ms = millis(started);

        let started = Instant::now();
        let prediction = self.classifier.classify(&features)?;
        let learned_ms = millis(started);

        let timings = StageTimings {
            seed_ms,
            tracking_ms,
            features_ms,
            rule_ms,
            learned_ms,
            total_ms: millis(total),
        };
        log::info!(
            "{}: rule={} learned={} boxes={} seed={:.1}ms tracking={:.1}ms features={:.1}ms rule={:.1}ms learned={:.1}ms total={:.1}ms",
            clip.name(),
            rule_verdict,
            prediction.label,
            tracked.boxes.len(),
            timings.seed_ms,
            timings.tracking_ms,
            timings.features_ms,
            timings.rule_ms,
            timings.learned_ms,
            timings.total_ms
        );

        Ok(InferenceResult {
            seed,
            boxes: tracked.boxes,
            signals,
            rule_verdict,
            prediction,
            timings,
        })
    }

    fn visualizer<'c>(&self, clip: &'c dyn ClipSource, frame_skip: usize) -> Option<Visualizer<'c>> {
        let factory = self.sink_factory.as_ref()?;
        let created = factory
            .create(clip.name(), &clip.info())
            .and_then(|sink| Visualizer::new(clip, frame_skip, sink));
        match created {
            Ok(vis) => Some(vis),
            Err(e) => {
                log::warn!("visualization unavailable for {}: {:#}", clip.name(), e);
                None
            }
        }
    }
}

fn millis(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Identity of the processed clip, reported next to the verdicts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClipMetadata {
    pub filename: String,
    pub file_size_kb: f64,
    pub video_id: String,
}

impl ClipMetadata {
    /// Describe the clip at `path` under a fresh random id. Size is 0 when the
    /// path is not a readable file.
    pub fn for_path(path: &str) -> Self {
        let filename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self {
            filename,
            file_size_kb: (bytes as f64 / 1024.0 * 100.0).round() / 100.0,
            video_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The produced result document.
#[derive(Clone, Debug, Serialize)]
pub struct InferenceReport {
    pub model_inference: String,
    pub logic_inference: RuleVerdict,
    pub timings: StageTimings,
    pub metadata: ClipMetadata,
}

impl InferenceReport {
    pub fn new(result: &InferenceResult, metadata: ClipMetadata) -> Self {
        Self {
            model_inference: result.learned_verdict().to_string(),
            logic_inference: result.rule_verdict(),
            timings: *result.timings(),
            metadata,
        }
    }
}
