//! Detection adapter.
//!
//! A backend turns one fixed-size RGB frame into a list of labelled boxes.
//! Failures are whole-frame: a backend never returns partial results.

mod backend;
pub mod backends;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::{build_backend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection};
pub use yolo::YoloParams;
