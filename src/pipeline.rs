//! Per-frame processing sequence.
//!
//! decode -> resize -> detect -> classify -> publish (always) -> record each
//! violation. Decode and detection failures abort the frame; publish and
//! persistence failures are logged and the rest of the frame still runs.

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::classify::ViolationClassifier;
use crate::detect::DetectorBackend;
use crate::frame::Frame;
use crate::live::LiveStatePublisher;
use crate::record::{ViolationRecord, ViolationRecorder, ViolationStore};

/// Frame-scoped failure. The frame is dropped and the loop continues.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame decode failed: {0:#}")]
    Decode(anyhow::Error),
    #[error("detection failed: {0:#}")]
    Detect(anyhow::Error),
}

/// Result of one successfully processed frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameOutcome {
    pub detections: usize,
    pub violation_count: usize,
    pub recorded: Vec<ViolationRecord>,
    pub persistence_failures: usize,
    pub publish_failures: usize,
}

pub struct FramePipeline<D, S> {
    detector: D,
    classifier: ViolationClassifier,
    recorder: ViolationRecorder<S>,
    publishers: Vec<Box<dyn LiveStatePublisher>>,
    input_width: u32,
    input_height: u32,
}

impl<D: DetectorBackend, S: ViolationStore> FramePipeline<D, S> {
    pub fn new(
        detector: D,
        classifier: ViolationClassifier,
        recorder: ViolationRecorder<S>,
        input_width: u32,
        input_height: u32,
    ) -> Self {
        Self {
            detector,
            classifier,
            recorder,
            publishers: Vec::new(),
            input_width,
            input_height,
        }
    }

    pub fn with_publisher<P: LiveStatePublisher + 'static>(mut self, publisher: P) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn recorder(&self) -> &ViolationRecorder<S> {
        &self.recorder
    }

    pub fn classifier(&self) -> &ViolationClassifier {
        &self.classifier
    }

    /// Process one raw queue message.
    pub fn process_message(
        &mut self,
        body: &[u8],
        received_at: DateTime<Local>,
    ) -> Result<FrameOutcome, FrameError> {
        let frame = Frame::decode(body, received_at, self.input_width, self.input_height)
            .map_err(FrameError::Decode)?;
        self.process_frame(&frame)
    }

    /// Process a frame already at detector resolution.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome, FrameError> {
        let detections = self
            .detector
            .detect(frame.image())
            .map_err(FrameError::Detect)?;

        let classification = self.classifier.classify(frame, &detections);

        let mut outcome = FrameOutcome {
            detections: detections.len(),
            violation_count: classification.violation_count,
            ..FrameOutcome::default()
        };

        for publisher in &mut self.publishers {
            let published =
                publisher.publish(&classification.annotated, classification.violation_count);
            if let Err(e) = published {
                outcome.publish_failures += 1;
                log::warn!("live state publish failed: {:#}", e);
            }
        }

        for violation in &classification.violations {
            match self.recorder.record(violation, &classification.annotated) {
                Ok(record) => {
                    log::info!(
                        "violation recorded: label={} bbox={} conf={:.2} frame={}",
                        record.label,
                        record.bbox,
                        violation.confidence,
                        record.frame_path
                    );
                    outcome.recorded.push(record);
                }
                Err(e) => {
                    outcome.persistence_failures += 1;
                    log::error!(
                        "failed to record violation bbox={}: {:#}",
                        violation.bbox,
                        e
                    );
                }
            }
        }

        Ok(outcome)
    }
}
