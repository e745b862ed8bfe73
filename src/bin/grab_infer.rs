//! grab_infer - run the grab-motion pipeline on one clip.
//!
//! Prints the result document on stdout:
//! `{"model_inference", "logic_inference", "timings", "metadata"}`.
//! A failed request prints `{"error": {"code", "message"}}` and exits 1.
//!
//! `stub://<name>` runs the built-in synthetic clip with an in-process
//! localizer, so the whole pipeline can be exercised without video files or
//! a detection service.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use grab_motion::classify::load_classifier;
use grab_motion::clip::{open_clip, SyntheticClip};
use grab_motion::config::GrabConfig;
use grab_motion::localize::{Localizer, StubLocalizer};
use grab_motion::pipeline::{ClipMetadata, InferenceReport, Pipeline};
use grab_motion::track::TemplatePredictor;
use grab_motion::PipelineError;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "grab_infer",
    about = "Classify the tracked motion in a clip as grab or not"
)]
struct Args {
    /// Clip path (.mp4, .avi, .mov) or stub://<name>
    #[arg(value_name = "CLIP")]
    clip: String,

    /// JSON config file (overrides GRAB_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Abort the request after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Write the tracking overlay clip (same as GRAB_SAVE_VISUALIZATION=1)
    #[arg(long)]
    visualize: bool,

    /// Single-line JSON output
    #[arg(long)]
    compact: bool,

    /// UI mode for stderr progress (auto|plain|pretty|quiet)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal());

    if let Some(path) = &args.config {
        std::env::set_var("GRAB_CONFIG", path);
    }
    let stage = ui.stage("Load config");
    let mut cfg = GrabConfig::load()?;
    if args.visualize {
        cfg.visualization.enabled = true;
    }
    stage.done();

    let stage = ui.stage("Load classifier");
    let classifier = Arc::new(load_classifier(&cfg.classifier)?);
    stage.done_with(format!(
        "{} classes, {} labels",
        classifier.num_classes(),
        classifier.labels().len()
    ));

    let localizer = build_localizer(&cfg, &args.clip)?;
    let predictor = Arc::new(TemplatePredictor::new(
        cfg.tracker.search_radius,
        cfg.tracker.max_mismatch,
    ));
    let mut pipeline = Pipeline::new(localizer, predictor, classifier)
        .with_settings(cfg.pipeline_settings());
    if cfg.visualization.enabled {
        pipeline = with_visualization(pipeline, &cfg);
    }

    let stage = ui.stage("Run inference");
    let outcome = open_clip(&args.clip).and_then(|clip| match args.timeout_secs {
        Some(secs) => pipeline.infer_within(clip.as_ref(), Duration::from_secs(secs)),
        None => pipeline.infer(clip.as_ref()),
    });
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            drop(stage);
            print_error(&e, args.compact)?;
            std::process::exit(1);
        }
    };
    stage.done_with(format!(
        "rule={} learned={}",
        result.rule_verdict(),
        result.learned_verdict()
    ));

    let report = InferenceReport::new(&result, ClipMetadata::for_path(&args.clip));
    print_json(&serde_json::to_value(&report)?, args.compact)?;
    Ok(())
}

fn build_localizer(cfg: &GrabConfig, clip: &str) -> Result<Arc<dyn Localizer>> {
    if let Some(url) = &cfg.localizer.url {
        return remote_localizer(cfg, url);
    }
    if clip.starts_with("stub://") {
        let region = SyntheticClip::demo("demo")
            .object_region(0)
            .ok_or_else(|| anyhow!("demo clip has no object on its first frame"))?;
        log::info!("using in-process localizer for {}", clip);
        return Ok(Arc::new(StubLocalizer::fixed(vec![region])));
    }
    Err(anyhow!(
        "no localizer configured; set GRAB_LOCALIZER_URL or localizer.url"
    ))
}

#[cfg(feature = "localizer-remote")]
fn remote_localizer(cfg: &GrabConfig, url: &str) -> Result<Arc<dyn Localizer>> {
    use grab_motion::localize::remote::{RemoteLocalizer, RemoteLocalizerConfig};

    let localizer = RemoteLocalizer::new(RemoteLocalizerConfig {
        url: url.to_string(),
        prompt: cfg.localizer.prompt.clone(),
        timeout: cfg.localizer.timeout,
    })?;
    log::info!("localizer: {} (prompt '{}')", url, cfg.localizer.prompt);
    Ok(Arc::new(localizer))
}

#[cfg(not(feature = "localizer-remote"))]
fn remote_localizer(_cfg: &GrabConfig, url: &str) -> Result<Arc<dyn Localizer>> {
    Err(anyhow!(
        "localizer url {} configured but grab_infer was built without the localizer-remote feature",
        url
    ))
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn with_visualization(pipeline: Pipeline, cfg: &GrabConfig) -> Pipeline {
    use grab_motion::visualize::VideoSinkFactory;

    pipeline.with_visualization(Arc::new(VideoSinkFactory::new(
        cfg.visualization.output_dir.clone(),
    )))
}

#[cfg(all(feature = "visualize", not(feature = "ingest-file-ffmpeg")))]
fn with_visualization(pipeline: Pipeline, cfg: &GrabConfig) -> Pipeline {
    use grab_motion::visualize::FrameDirSinkFactory;

    pipeline.with_visualization(Arc::new(FrameDirSinkFactory::new(
        cfg.visualization.output_dir.clone(),
    )))
}

#[cfg(not(any(feature = "visualize", feature = "ingest-file-ffmpeg")))]
fn with_visualization(pipeline: Pipeline, _cfg: &GrabConfig) -> Pipeline {
    log::warn!(
        "visualization requested but grab_infer was built without the ingest-file-ffmpeg or visualize feature"
    );
    pipeline
}

fn print_error(error: &PipelineError, compact: bool) -> Result<()> {
    let body = serde_json::json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
        }
    });
    print_json(&body, compact)
}

fn print_json(value: &serde_json::Value, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", text);
    Ok(())
}
