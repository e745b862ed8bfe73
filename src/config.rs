use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ClassifierBackend;
use crate::pipeline::PipelineSettings;
use crate::rules::DEFAULT_OUT_OF_FRAME_THRESHOLD;
use crate::seed::DEFAULT_SEED_FRAMES;
use crate::track::template::{DEFAULT_MAX_MISMATCH, DEFAULT_SEARCH_RADIUS, MAX_SEARCH_RADIUS};

const DEFAULT_CLASSIFIER_WEIGHTS: &str = "weights/cnn1d_model.json";
const DEFAULT_CLASS_MAP: &str = "weights/cls_map.json";
const DEFAULT_LOCALIZER_PROMPT: &str = "box";
const DEFAULT_LOCALIZER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FRAME_SKIP: usize = 1;
const DEFAULT_VISUALIZATION_DIR: &str = "tracking_results";

#[derive(Debug, Deserialize, Default)]
struct GrabConfigFile {
    classifier: Option<ClassifierConfigFile>,
    tracker: Option<TrackerConfigFile>,
    seed: Option<SeedConfigFile>,
    localizer: Option<LocalizerConfigFile>,
    preprocess: Option<PreprocessConfigFile>,
    visualization: Option<VisualizationConfigFile>,
    rules: Option<RulesConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    weights_path: Option<PathBuf>,
    class_map_path: Option<PathBuf>,
    backend: Option<ClassifierBackend>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    search_radius: Option<u32>,
    max_mismatch: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SeedConfigFile {
    max_frames: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LocalizerConfigFile {
    url: Option<String>,
    prompt: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PreprocessConfigFile {
    frame_skip: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct VisualizationConfigFile {
    enabled: Option<bool>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct RulesConfigFile {
    out_of_frame_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct GrabConfig {
    pub classifier: ClassifierSettings,
    pub tracker: TrackerSettings,
    pub seed_max_frames: usize,
    pub localizer: LocalizerSettings,
    pub frame_skip: usize,
    pub visualization: VisualizationSettings,
    pub rule_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub weights_path: PathBuf,
    pub class_map_path: PathBuf,
    pub backend: ClassifierBackend,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub search_radius: u32,
    pub max_mismatch: f32,
}

#[derive(Debug, Clone)]
pub struct LocalizerSettings {
    /// Remote detection endpoint. Unset means no remote localizer.
    pub url: Option<String>,
    pub prompt: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct VisualizationSettings {
    pub enabled: bool,
    pub output_dir: PathBuf,
}

impl GrabConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GRAB_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GrabConfigFile) -> Self {
        let classifier = file.classifier.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let localizer = file.localizer.unwrap_or_default();
        let visualization = file.visualization.unwrap_or_default();
        Self {
            classifier: ClassifierSettings {
                weights_path: classifier
                    .weights_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASSIFIER_WEIGHTS)),
                class_map_path: classifier
                    .class_map_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASS_MAP)),
                backend: classifier.backend.unwrap_or_default(),
            },
            tracker: TrackerSettings {
                search_radius: tracker.search_radius.unwrap_or(DEFAULT_SEARCH_RADIUS),
                max_mismatch: tracker.max_mismatch.unwrap_or(DEFAULT_MAX_MISMATCH),
            },
            seed_max_frames: file
                .seed
                .and_then(|seed| seed.max_frames)
                .unwrap_or(DEFAULT_SEED_FRAMES),
            localizer: LocalizerSettings {
                url: localizer.url.filter(|url| !url.trim().is_empty()),
                prompt: localizer
                    .prompt
                    .unwrap_or_else(|| DEFAULT_LOCALIZER_PROMPT.to_string()),
                timeout: Duration::from_secs(
                    localizer
                        .timeout_secs
                        .unwrap_or(DEFAULT_LOCALIZER_TIMEOUT_SECS),
                ),
            },
            frame_skip: file
                .preprocess
                .and_then(|pre| pre.frame_skip)
                .unwrap_or(DEFAULT_FRAME_SKIP),
            visualization: VisualizationSettings {
                enabled: visualization.enabled.unwrap_or(false),
                output_dir: visualization
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_VISUALIZATION_DIR)),
            },
            rule_threshold: file
                .rules
                .and_then(|rules| rules.out_of_frame_threshold)
                .unwrap_or(DEFAULT_OUT_OF_FRAME_THRESHOLD),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_nonempty("GRAB_CLASSIFIER_WEIGHTS") {
            self.classifier.weights_path = PathBuf::from(path);
        }
        if let Some(path) = env_nonempty("GRAB_CLASS_MAP") {
            self.classifier.class_map_path = PathBuf::from(path);
        }
        if let Some(backend) = env_nonempty("GRAB_CLASSIFIER_BACKEND") {
            self.classifier.backend = backend
                .parse()
                .map_err(|e| anyhow!("GRAB_CLASSIFIER_BACKEND: {}", e))?;
        }
        if let Some(frames) = env_nonempty("GRAB_SEED_MAX_FRAMES") {
            self.seed_max_frames = frames
                .trim()
                .parse()
                .map_err(|_| anyhow!("GRAB_SEED_MAX_FRAMES must be a positive integer"))?;
        }
        if let Some(url) = env_nonempty("GRAB_LOCALIZER_URL") {
            self.localizer.url = Some(url);
        }
        if let Some(prompt) = env_nonempty("GRAB_LOCALIZER_PROMPT") {
            self.localizer.prompt = prompt;
        }
        if let Some(skip) = env_nonempty("GRAB_FRAME_SKIP") {
            self.frame_skip = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("GRAB_FRAME_SKIP must be a positive integer"))?;
        }
        if let Some(enabled) = env_nonempty("GRAB_SAVE_VISUALIZATION") {
            self.visualization.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("GRAB_SAVE_VISUALIZATION must be a boolean"))?;
        }
        if let Some(dir) = env_nonempty("GRAB_VISUALIZATION_DIR") {
            self.visualization.output_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.seed_max_frames == 0 {
            return Err(anyhow!("seed.max_frames must be at least 1"));
        }
        if self.frame_skip == 0 {
            return Err(anyhow!("preprocess.frame_skip must be at least 1"));
        }
        if !(self.rule_threshold > 0.0 && self.rule_threshold <= 1.0) {
            return Err(anyhow!(
                "rules.out_of_frame_threshold must be in (0, 1], got {}",
                self.rule_threshold
            ));
        }
        if self.tracker.search_radius > MAX_SEARCH_RADIUS {
            return Err(anyhow!(
                "tracker.search_radius must be at most {}, got {}",
                MAX_SEARCH_RADIUS,
                self.tracker.search_radius
            ));
        }
        if !(self.tracker.max_mismatch > 0.0 && self.tracker.max_mismatch <= 1.0) {
            return Err(anyhow!(
                "tracker.max_mismatch must be in (0, 1], got {}",
                self.tracker.max_mismatch
            ));
        }
        if self.localizer.timeout.as_secs() == 0 {
            return Err(anyhow!("localizer.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            seed_max_frames: self.seed_max_frames,
            frame_skip: self.frame_skip,
            rule_threshold: self.rule_threshold,
        }
    }
}

fn read_config_file(path: &Path) -> Result<GrabConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bools_accept_common_spellings() {
        for v in ["1", "true", "YES", " True "] {
            assert_eq!(parse_bool(v), Some(true), "{}", v);
        }
        for v in ["0", "false", "No"] {
            assert_eq!(parse_bool(v), Some(false), "{}", v);
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = GrabConfig::from_file(GrabConfigFile::default());
        assert_eq!(
            cfg.classifier.weights_path,
            PathBuf::from(DEFAULT_CLASSIFIER_WEIGHTS)
        );
        assert_eq!(cfg.classifier.backend, ClassifierBackend::Native);
        assert_eq!(cfg.seed_max_frames, 5);
        assert_eq!(cfg.frame_skip, 1);
        assert_eq!(cfg.rule_threshold, 0.9);
        assert!(cfg.localizer.url.is_none());
        assert!(!cfg.visualization.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut cfg = GrabConfig::from_file(GrabConfigFile::default());
        cfg.rule_threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.rule_threshold = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_search_radius_is_rejected() {
        let mut cfg = GrabConfig::from_file(GrabConfigFile::default());
        cfg.tracker.search_radius = MAX_SEARCH_RADIUS;
        assert!(cfg.validate().is_ok());
        cfg.tracker.search_radius = MAX_SEARCH_RADIUS + 1;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tracker.search_radius"));
    }
}
