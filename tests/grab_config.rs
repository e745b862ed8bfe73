use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use grab_motion::classify::ClassifierBackend;
use grab_motion::config::GrabConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GRAB_CONFIG",
        "GRAB_CLASSIFIER_WEIGHTS",
        "GRAB_CLASS_MAP",
        "GRAB_CLASSIFIER_BACKEND",
        "GRAB_SEED_MAX_FRAMES",
        "GRAB_LOCALIZER_URL",
        "GRAB_LOCALIZER_PROMPT",
        "GRAB_FRAME_SKIP",
        "GRAB_SAVE_VISUALIZATION",
        "GRAB_VISUALIZATION_DIR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "classifier": {
                "weights_path": "/models/cnn.json",
                "class_map_path": "/models/labels.json"
            },
            "tracker": { "search_radius": 40, "max_mismatch": 0.1 },
            "seed": { "max_frames": 8 },
            "localizer": {
                "url": "http://detector:8600/detect",
                "prompt": "carton",
                "timeout_secs": 5
            },
            "preprocess": { "frame_skip": 2 },
            "visualization": { "enabled": false, "output_dir": "/tmp/vis" },
            "rules": { "out_of_frame_threshold": 0.85 }
        }"#,
    );

    std::env::set_var("GRAB_CONFIG", file.path());
    std::env::set_var("GRAB_LOCALIZER_PROMPT", "box");
    std::env::set_var("GRAB_FRAME_SKIP", "3");
    std::env::set_var("GRAB_SAVE_VISUALIZATION", "yes");

    let cfg = GrabConfig::load().expect("load config");

    assert_eq!(cfg.classifier.weights_path, PathBuf::from("/models/cnn.json"));
    assert_eq!(
        cfg.classifier.class_map_path,
        PathBuf::from("/models/labels.json")
    );
    assert_eq!(cfg.classifier.backend, ClassifierBackend::Native);
    assert_eq!(cfg.tracker.search_radius, 40);
    assert_eq!(cfg.tracker.max_mismatch, 0.1);
    assert_eq!(cfg.seed_max_frames, 8);
    assert_eq!(
        cfg.localizer.url.as_deref(),
        Some("http://detector:8600/detect")
    );
    assert_eq!(cfg.localizer.prompt, "box");
    assert_eq!(cfg.localizer.timeout.as_secs(), 5);
    assert_eq!(cfg.frame_skip, 3);
    assert!(cfg.visualization.enabled);
    assert_eq!(cfg.visualization.output_dir, PathBuf::from("/tmp/vis"));
    assert_eq!(cfg.rule_threshold, 0.85);

    let settings = cfg.pipeline_settings();
    assert_eq!(settings.frame_skip, 3);
    assert_eq!(settings.seed_max_frames, 8);

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = GrabConfig::load().expect("load config");
    assert_eq!(
        cfg.classifier.weights_path,
        PathBuf::from("weights/cnn1d_model.json")
    );
    assert_eq!(
        cfg.classifier.class_map_path,
        PathBuf::from("weights/cls_map.json")
    );
    assert_eq!(cfg.seed_max_frames, 5);
    assert_eq!(cfg.frame_skip, 1);
    assert_eq!(cfg.localizer.prompt, "box");
    assert!(cfg.localizer.url.is_none());
    assert!(!cfg.visualization.enabled);
    assert_eq!(
        cfg.visualization.output_dir,
        PathBuf::from("tracking_results")
    );

    clear_env();
}

#[test]
fn env_selects_backend_and_paths() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GRAB_CLASSIFIER_BACKEND", "tract");
    std::env::set_var("GRAB_CLASSIFIER_WEIGHTS", "/models/cnn.onnx");
    std::env::set_var("GRAB_CLASS_MAP", "/models/cls.json");
    std::env::set_var("GRAB_LOCALIZER_URL", "https://detector.local/detect");
    std::env::set_var("GRAB_SEED_MAX_FRAMES", "12");

    let cfg = GrabConfig::load().expect("load config");
    assert_eq!(cfg.classifier.backend, ClassifierBackend::Tract);
    assert_eq!(cfg.classifier.weights_path, PathBuf::from("/models/cnn.onnx"));
    assert_eq!(cfg.classifier.class_map_path, PathBuf::from("/models/cls.json"));
    assert_eq!(
        cfg.localizer.url.as_deref(),
        Some("https://detector.local/detect")
    );
    assert_eq!(cfg.seed_max_frames, 12);

    clear_env();
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("GRAB_FRAME_SKIP", "fast"),
        ("GRAB_FRAME_SKIP", "0"),
        ("GRAB_SEED_MAX_FRAMES", "-1"),
        ("GRAB_SEED_MAX_FRAMES", "0"),
        ("GRAB_SAVE_VISUALIZATION", "sometimes"),
        ("GRAB_CLASSIFIER_BACKEND", "torch"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        let err = GrabConfig::load().expect_err(value);
        assert!(
            err.to_string().contains(key) || err.to_string().contains("at least 1"),
            "{}={}: {}",
            key,
            value,
            err
        );
    }

    clear_env();
}

#[test]
fn invalid_file_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "rules": { "out_of_frame_threshold": 1.5 } }"#);
    std::env::set_var("GRAB_CONFIG", file.path());
    assert!(GrabConfig::load().is_err());

    let file = write_config(r#"{ "classifier": { "backend": "onnxruntime" } }"#);
    std::env::set_var("GRAB_CONFIG", file.path());
    assert!(GrabConfig::load().is_err());

    let file = write_config("not json");
    std::env::set_var("GRAB_CONFIG", file.path());
    assert!(GrabConfig::load().is_err());

    clear_env();
}
