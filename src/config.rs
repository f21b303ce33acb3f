use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::DEFAULT_VIOLATION_LABEL;
use crate::consumer::{AckPolicy, DEFAULT_RECONNECT_BACKOFF};
use crate::detect::yolo::{
    YoloParams, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_DETECTIONS,
};
use crate::geometry::{Roi, RoiConfigFile};
use crate::live::{LATEST_FRAME_FILE, VIOLATION_COUNT_FILE};

const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_BROKER_PORT: u16 = 1883;
const DEFAULT_FRAME_TOPIC: &str = "frames";
const DEFAULT_CLIENT_ID: &str = "scooperd";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_MODEL_PATH: &str = "model/best.onnx";
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CLASS_NAMES: [&str; 2] = ["use-hand", "use-scooper"];
const DEFAULT_OUTPUT_DIR: &str = "data";
const VIOLATIONS_SUBDIR: &str = "violations";
const VIOLATION_LOG_FILE: &str = "violations_log.csv";

#[derive(Debug, Deserialize, Default)]
struct ScooperConfigFile {
    broker: Option<BrokerConfigFile>,
    roi: Option<RoiConfigFile>,
    detector: Option<DetectorConfigFile>,
    output: Option<OutputConfigFile>,
    consumer: Option<ConsumerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BrokerConfigFile {
    addr: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
    keep_alive_secs: Option<u64>,
    max_payload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    class_names: Option<Vec<String>>,
    violation_label: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ConsumerConfigFile {
    ack_policy: Option<String>,
    reconnect_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ScooperConfig {
    pub broker: BrokerSettings,
    pub roi: Roi,
    pub detector: DetectorSettings,
    pub output: OutputSettings,
    pub ack_policy: AckPolicy,
    pub reconnect_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub addr: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
    pub keep_alive_secs: u64,
    pub max_payload_bytes: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_BROKER_ADDR.to_string(),
            topic: DEFAULT_FRAME_TOPIC.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            use_tls: false,
            tls_ca_path: None,
            tls_client_cert_path: None,
            tls_client_key_path: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub class_names: Vec<String>,
    pub violation_label: String,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            violation_label: DEFAULT_VIOLATION_LABEL.to_string(),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

impl DetectorSettings {
    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        }
    }
}

/// Output locations, all derived from one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub violations_dir: PathBuf,
    pub log_path: PathBuf,
    pub latest_frame_path: PathBuf,
    pub count_path: PathBuf,
}

impl OutputSettings {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            violations_dir: dir.join(VIOLATIONS_SUBDIR),
            log_path: dir.join(VIOLATION_LOG_FILE),
            latest_frame_path: dir.join(LATEST_FRAME_FILE),
            count_path: dir.join(VIOLATION_COUNT_FILE),
            dir,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self::in_dir(DEFAULT_OUTPUT_DIR)
    }
}

impl ScooperConfig {
    /// Load from the file named by `SCOOPER_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCOOPER_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file path.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScooperConfigFile) -> Result<Self> {
        let defaults = BrokerSettings::default();
        let broker = match file.broker {
            Some(b) => BrokerSettings {
                addr: b.addr.unwrap_or(defaults.addr),
                topic: b.topic.unwrap_or(defaults.topic),
                client_id: b.client_id.unwrap_or(defaults.client_id),
                username: b.username,
                password: b.password,
                use_tls: b.use_tls.unwrap_or(false),
                tls_ca_path: b.tls_ca_path,
                tls_client_cert_path: b.tls_client_cert_path,
                tls_client_key_path: b.tls_client_key_path,
                keep_alive_secs: b.keep_alive_secs.unwrap_or(defaults.keep_alive_secs),
                max_payload_bytes: b.max_payload_bytes.unwrap_or(defaults.max_payload_bytes),
            },
            None => defaults,
        };

        let roi = Roi::from_file(&file.roi.unwrap_or_default())?;

        let defaults = DetectorSettings::default();
        let detector = match file.detector {
            Some(d) => DetectorSettings {
                backend: d.backend.unwrap_or(defaults.backend),
                model_path: d.model_path.unwrap_or(defaults.model_path),
                class_names: d.class_names.unwrap_or(defaults.class_names),
                violation_label: d.violation_label.unwrap_or(defaults.violation_label),
                input_width: d.input_width.unwrap_or(defaults.input_width),
                input_height: d.input_height.unwrap_or(defaults.input_height),
                confidence_threshold: d
                    .confidence_threshold
                    .unwrap_or(defaults.confidence_threshold),
                iou_threshold: d.iou_threshold.unwrap_or(defaults.iou_threshold),
                max_detections: d.max_detections.unwrap_or(defaults.max_detections),
            },
            None => defaults,
        };

        let output = file
            .output
            .and_then(|o| o.dir)
            .map(OutputSettings::in_dir)
            .unwrap_or_default();

        let consumer = file.consumer.unwrap_or_default();
        let ack_policy = match consumer.ack_policy {
            Some(raw) => raw.parse()?,
            None => AckPolicy::default(),
        };
        let reconnect_backoff = consumer
            .reconnect_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECONNECT_BACKOFF);

        Ok(Self {
            broker,
            roi,
            detector,
            output,
            ack_policy,
            reconnect_backoff,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("RABBITMQ_HOST") {
            if !host.trim().is_empty() {
                self.broker.addr = format!("{}:{}", host.trim(), DEFAULT_BROKER_PORT);
            }
        }
        if let Ok(addr) = std::env::var("SCOOPER_BROKER_ADDR") {
            if !addr.trim().is_empty() {
                self.broker.addr = addr.trim().to_string();
            }
        }
        if let Ok(topic) = std::env::var("SCOOPER_FRAME_TOPIC") {
            if !topic.trim().is_empty() {
                self.broker.topic = topic.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("SCOOPER_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("SCOOPER_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(label) = std::env::var("SCOOPER_VIOLATION_LABEL") {
            if !label.trim().is_empty() {
                self.detector.violation_label = label.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("SCOOPER_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output = OutputSettings::in_dir(dir);
            }
        }
        if let Ok(policy) = std::env::var("SCOOPER_ACK_POLICY") {
            if !policy.trim().is_empty() {
                self.ack_policy = policy.parse()?;
            }
        }
        if let Ok(secs) = std::env::var("SCOOPER_RECONNECT_SECS") {
            let seconds: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("SCOOPER_RECONNECT_SECS must be an integer number of seconds")
            })?;
            self.reconnect_backoff = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.broker.topic.contains(['#', '+']) {
            return Err(anyhow!(
                "frame topic must not contain wildcards: {}",
                self.broker.topic
            ));
        }
        if self.broker.username.is_none() && self.broker.password.is_some() {
            return Err(anyhow!("broker password provided without username"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        let d = &self.detector;
        if !(0.0..=1.0).contains(&d.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1] (got {})",
                d.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&d.iou_threshold) {
            return Err(anyhow!(
                "iou_threshold must be within [0, 1] (got {})",
                d.iou_threshold
            ));
        }
        if d.violation_label.is_empty() {
            return Err(anyhow!("violation label must not be empty"));
        }
        // The stub reports whatever labels it is given; a model only its class names.
        if d.backend.eq_ignore_ascii_case("tract") && !d.class_names.contains(&d.violation_label) {
            return Err(anyhow!(
                "violation label '{}' is not one of the model class names {:?}",
                d.violation_label,
                d.class_names
            ));
        }
        if self.reconnect_backoff.is_zero() {
            return Err(anyhow!("reconnect backoff must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ScooperConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<ScooperConfig> {
        let file: ScooperConfigFile = serde_json::from_str(raw)?;
        let mut cfg = ScooperConfig::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn empty_file_gives_reference_defaults() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg.broker.addr, "127.0.0.1:1883");
        assert_eq!(cfg.broker.topic, "frames");
        assert_eq!(cfg.roi, Roi::default());
        assert_eq!(cfg.detector.backend, "stub");
        assert_eq!(cfg.detector.violation_label, "use-hand");
        assert_eq!(cfg.detector.input_width, 640);
        assert_eq!(cfg.output.log_path, PathBuf::from("data/violations_log.csv"));
        assert_eq!(cfg.output.violations_dir, PathBuf::from("data/violations"));
        assert_eq!(cfg.ack_policy, AckPolicy::OnReceipt);
        assert_eq!(cfg.reconnect_backoff, Duration::from_secs(2));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse(
            r#"{
                "roi": {"x": 10, "split_ratio": 0.5},
                "detector": {"backend": "tract", "confidence_threshold": 0.4},
                "consumer": {"ack_policy": "after_processing"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.roi.x, 10);
        assert_eq!(cfg.roi.width, 127);
        assert_eq!(cfg.roi.split_x(), 10 + 63);
        assert_eq!(cfg.detector.backend, "tract");
        assert_eq!(cfg.detector.yolo_params().confidence_threshold, 0.4);
        assert_eq!(cfg.detector.iou_threshold, 0.45);
        assert_eq!(cfg.ack_policy, AckPolicy::AfterProcessing);
    }

    #[test]
    fn invalid_roi_is_rejected() {
        assert!(parse(r#"{"roi": {"split_ratio": 1.0}}"#).is_err());
        assert!(parse(r#"{"roi": {"width": 0}}"#).is_err());
    }

    #[test]
    fn wildcard_topic_is_rejected() {
        assert!(parse(r#"{"broker": {"topic": "frames/#"}}"#).is_err());
    }

    #[test]
    fn model_must_know_the_violation_label() {
        let err = parse(
            r#"{"detector": {"backend": "tract", "violation_label": "bare-hand"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bare-hand"));
        let cfg = parse(
            r#"{"detector": {
                "backend": "tract",
                "violation_label": "bare-hand",
                "class_names": ["bare-hand", "use-scooper"]
            }}"#,
        )
        .unwrap();
        assert_eq!(cfg.detector.violation_label, "bare-hand");
        // The stub has no class list to check against.
        assert!(parse(r#"{"detector": {"violation_label": "bare-hand"}}"#).is_ok());
    }

    #[test]
    fn unknown_ack_policy_is_rejected() {
        assert!(parse(r#"{"consumer": {"ack_policy": "never"}}"#).is_err());
    }
}
