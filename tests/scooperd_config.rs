use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use scooper_watch::config::ScooperConfig;
use scooper_watch::AckPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SCOOPER_CONFIG",
        "SCOOPER_BROKER_ADDR",
        "RABBITMQ_HOST",
        "SCOOPER_FRAME_TOPIC",
        "SCOOPER_MODEL_PATH",
        "SCOOPER_DETECTOR_BACKEND",
        "SCOOPER_VIOLATION_LABEL",
        "SCOOPER_OUTPUT_DIR",
        "SCOOPER_ACK_POLICY",
        "SCOOPER_RECONNECT_SECS",
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
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = ScooperConfig::load().expect("load config");
    assert_eq!(cfg.broker.addr, "127.0.0.1:1883");
    assert_eq!(cfg.broker.topic, "frames");
    assert_eq!(cfg.roi.x, 132);
    assert_eq!(cfg.roi.split_x(), 198);
    assert_eq!(cfg.detector.model_path, PathBuf::from("model/best.onnx"));
    assert_eq!(cfg.output.latest_frame_path, PathBuf::from("data/latest.jpg"));
    assert_eq!(cfg.output.count_path, PathBuf::from("data/violations.txt"));
    assert_eq!(cfg.ack_policy, AckPolicy::OnReceipt);
    assert_eq!(cfg.reconnect_backoff, Duration::from_secs(2));
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        r#"{
            "broker": {
                "addr": "mqtt://broker.kitchen:1883",
                "topic": "station-1/frames",
                "username": "scooper",
                "password": "secret"
            },
            "roi": {"x": 100, "y": 120, "width": 200, "height": 300, "split_ratio": 0.5},
            "detector": {
                "backend": "stub",
                "class_names": ["use-hand", "use-scooper", "pizza"],
                "iou_threshold": 0.5
            },
            "output": {"dir": "/var/lib/scooper"},
            "consumer": {"ack_policy": "after_processing", "reconnect_secs": 7}
        }"#,
    );

    std::env::set_var("SCOOPER_CONFIG", file.path());
    std::env::set_var("SCOOPER_FRAME_TOPIC", "station-2/frames");
    std::env::set_var("SCOOPER_VIOLATION_LABEL", "bare-hand");
    std::env::set_var("SCOOPER_RECONNECT_SECS", "5");

    let cfg = ScooperConfig::load().expect("load config");

    assert_eq!(cfg.broker.addr, "mqtt://broker.kitchen:1883");
    assert_eq!(cfg.broker.topic, "station-2/frames");
    assert_eq!(cfg.broker.username.as_deref(), Some("scooper"));
    assert_eq!(cfg.roi.split_x(), 200);
    assert_eq!(cfg.detector.class_names.len(), 3);
    assert_eq!(cfg.detector.iou_threshold, 0.5);
    assert_eq!(cfg.detector.violation_label, "bare-hand");
    assert_eq!(
        cfg.output.log_path,
        PathBuf::from("/var/lib/scooper/violations_log.csv")
    );
    assert_eq!(cfg.ack_policy, AckPolicy::AfterProcessing);
    assert_eq!(cfg.reconnect_backoff, Duration::from_secs(5));

    clear_env();
}

#[test]
fn rabbitmq_host_is_a_bare_host() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("RABBITMQ_HOST", "rabbitmq");
    let cfg = ScooperConfig::load().expect("load config");
    assert_eq!(cfg.broker.addr, "rabbitmq:1883");

    std::env::set_var("SCOOPER_BROKER_ADDR", "mqtts://queue:8883");
    let cfg = ScooperConfig::load().expect("load config");
    assert_eq!(cfg.broker.addr, "mqtts://queue:8883");

    clear_env();
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("SCOOPER_RECONNECT_SECS", "soon");
    assert!(ScooperConfig::load().is_err());
    std::env::set_var("SCOOPER_RECONNECT_SECS", "0");
    assert!(ScooperConfig::load().is_err());
    clear_env();

    std::env::set_var("SCOOPER_ACK_POLICY", "whenever");
    assert!(ScooperConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_or_malformed_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("SCOOPER_CONFIG", "/nonexistent/scooper.json");
    let err = ScooperConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    let file = write_config("{ not json");
    std::env::set_var("SCOOPER_CONFIG", file.path());
    let err = ScooperConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
