pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;

/// Build the backend named in the detector settings.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => {
            log::warn!("detector backend 'stub' selected: frames will produce no detections");
            Ok(Box::new(StubBackend::new()))
        }
        "tract" => build_tract(settings),
        other => Err(anyhow!(
            "unknown detector backend '{}': expected 'stub' or 'tract'",
            other
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let backend = TractBackend::new(
        &settings.model_path,
        settings.input_width,
        settings.input_height,
        settings.class_names.clone(),
    )?
    .with_params(settings.yolo_params());
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' requires the 'backend-tract' feature.\n\
         Recompile with: cargo build --features backend-tract"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stub_backend() {
        let settings = DetectorSettings::default();
        let backend = build_backend(&settings).unwrap();
        assert_eq!(backend.name(), "stub");
    }

    #[test]
    fn rejects_unknown_backend() {
        let settings = DetectorSettings {
            backend: "opencv".to_string(),
            ..DetectorSettings::default()
        };
        let err = build_backend(&settings).err().unwrap();
        assert!(err.to_string().contains("unknown detector backend"));
    }

    #[test]
    #[cfg(not(feature = "backend-tract"))]
    fn tract_requires_feature() {
        let settings = DetectorSettings {
            backend: "tract".to_string(),
            ..DetectorSettings::default()
        };
        let err = build_backend(&settings).err().unwrap();
        assert!(err.to_string().contains("backend-tract"));
    }
}
