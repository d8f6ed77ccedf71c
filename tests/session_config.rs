use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use detection_session::SessionConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETECT_CONFIG",
        "DETECT_MODEL_PATH",
        "DETECT_LABELS_PATH",
        "DETECT_LOG_PATH",
        "DETECT_CONFIDENCE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "confidence": 0.55,
        "model": {
            "path": "weights/hands.onnx",
            "labels_path": "weights/hands.names",
            "input_size": 416,
            "iou_threshold": 0.5,
            "max_detections": 50
        },
        "log": { "path": "runs/log.csv" },
        "annotation": { "border_width": 3, "font_size": 20.0 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("DETECT_CONFIG", file.path());
    std::env::set_var("DETECT_LOG_PATH", "override/detections.csv");
    std::env::set_var("DETECT_CONFIDENCE", "0.7");

    let cfg = SessionConfig::load().expect("load config");

    assert_eq!(cfg.model_path, PathBuf::from("weights/hands.onnx"));
    assert_eq!(cfg.labels_path, Some(PathBuf::from("weights/hands.names")));
    assert_eq!(cfg.log_path, PathBuf::from("override/detections.csv"));
    assert_eq!(cfg.confidence, 0.7);
    assert_eq!(cfg.yolo.input_size, 416);
    assert_eq!(cfg.yolo.iou_threshold, 0.5);
    assert_eq!(cfg.yolo.max_detections, 50);
    assert_eq!(cfg.annotation.border_width, 3);
    assert_eq!(cfg.annotation.font_size, 20.0);
    assert!(cfg.annotation.font_path.is_none());

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
confidence = 0.3

[model]
path = "weights/best.onnx"
iou_threshold = 0.6

[log]
path = "detections/detection_log.csv"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("DETECT_CONFIG", file.path());
    std::env::set_var("DETECT_MODEL_PATH", "models/other.onnx");

    let cfg = SessionConfig::load().expect("load config");
    assert_eq!(cfg.model_path, PathBuf::from("models/other.onnx"));
    assert_eq!(cfg.confidence, 0.3);
    assert_eq!(cfg.yolo.iou_threshold, 0.6);
    assert_eq!(cfg.yolo.input_size, 640);
    assert_eq!(
        cfg.log_path,
        PathBuf::from("detections/detection_log.csv")
    );

    clear_env();
}

#[test]
fn rejects_bad_confidence_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECT_CONFIDENCE", "high");
    assert!(SessionConfig::load().is_err());

    std::env::set_var("DETECT_CONFIDENCE", "0.1");
    let err = SessionConfig::load().unwrap_err();
    assert!(err.to_string().contains("confidence"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DETECT_CONFIG", "/nonexistent/detect.json");
    assert!(SessionConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_caption_font_fails_config_load() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "annotation": { "font_path": "/nonexistent/caption.ttf" } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    std::env::set_var("DETECT_CONFIG", file.path());

    let err = SessionConfig::load().unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("font_path"), "{msg}");
    assert!(!msg.contains("model"), "{msg}");

    clear_env();
}
