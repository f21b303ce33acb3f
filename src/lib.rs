//! Scooper Watch
//!
//! Detects hygiene violations at a food-preparation station: a hand touching
//! ingredients inside a restricted zone without the scooper.
//!
//! # Architecture
//!
//! One frame at a time flows through:
//!
//! 1. **Queue**: base64 JPEG frames arrive on the `frames` topic (`transport`).
//! 2. **Decode**: payload to an RGB frame at detector resolution (`frame`).
//! 3. **Detect**: labelled boxes from a pluggable backend (`detect`).
//! 4. **Classify**: ROI split-line test per box, overlay rendering (`classify`).
//! 5. **Publish**: latest annotated frame and per-frame count (`live`).
//! 6. **Record**: snapshot plus CSV row per violation (`record`).
//!
//! `consumer` drives the loop, reconnecting forever until shut down.
//!
//! # Module Structure
//!
//! - `geometry`: ROI and split line
//! - `annotate`: drawing primitives for the overlay
//! - `pipeline`: the per-frame sequence and its failure rules
//! - `config`: JSON file plus environment configuration

pub mod annotate;
pub mod classify;
pub mod config;
pub mod consumer;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod live;
pub mod pipeline;
pub mod record;
pub mod transport;

pub use classify::{Classification, Violation, ViolationClassifier, DEFAULT_VIOLATION_LABEL};
pub use config::{BrokerSettings, DetectorSettings, OutputSettings, ScooperConfig};
pub use consumer::{
    AckPolicy, Backoff, Clock, ConsumerState, ConsumerStats, FixedBackoff, FrameConsumer,
    FrameDelivery, FrameQueue, ShutdownSignal, SystemClock,
};
pub use detect::{build_backend, BoundingBox, Detection, DetectorBackend, StubBackend};
pub use frame::{Frame, FramePayload};
pub use geometry::{Roi, SplitLine};
pub use live::{FileLiveState, LiveSnapshot, LiveStatePublisher, SharedLiveState};
pub use pipeline::{FrameError, FrameOutcome, FramePipeline};
pub use record::{
    FilesystemViolationStore, InMemoryViolationStore, ViolationRecord, ViolationRecorder,
    ViolationStore,
};
