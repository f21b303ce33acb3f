//! Live state: the most recent annotated frame and its violation count.
//!
//! Single slot, overwritten on every processed frame, no history.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};

pub const LATEST_FRAME_FILE: &str = "latest.jpg";
pub const VIOLATION_COUNT_FILE: &str = "violations.txt";

pub trait LiveStatePublisher: Send {
    /// Overwrite the live state with this frame's results.
    fn publish(&mut self, annotated: &RgbImage, violation_count: usize) -> Result<()>;
}

impl<P: LiveStatePublisher + ?Sized> LiveStatePublisher for Box<P> {
    fn publish(&mut self, annotated: &RgbImage, violation_count: usize) -> Result<()> {
        (**self).publish(annotated, violation_count)
    }
}

/// File-backed live state polled by an out-of-process display.
///
/// Writes are plain overwrites: a reader polling concurrently may observe a
/// partially written file and should retry on its next poll.
#[derive(Clone, Debug)]
pub struct FileLiveState {
    frame_path: PathBuf,
    count_path: PathBuf,
}

/// What a display sees when polling `FileLiveState`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveReading {
    pub violation_count: usize,
    pub width: u32,
    pub height: u32,
}

impl FileLiveState {
    pub fn new(frame_path: impl Into<PathBuf>, count_path: impl Into<PathBuf>) -> Self {
        Self {
            frame_path: frame_path.into(),
            count_path: count_path.into(),
        }
    }

    /// `latest.jpg` and `violations.txt` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(LATEST_FRAME_FILE), dir.join(VIOLATION_COUNT_FILE))
    }

    pub fn frame_path(&self) -> &Path {
        &self.frame_path
    }

    pub fn count_path(&self) -> &Path {
        &self.count_path
    }

    /// Read back both artifacts. Missing files mean "no data yet".
    pub fn read(&self) -> Result<Option<LiveReading>> {
        if !self.frame_path.exists() || !self.count_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.count_path)
            .with_context(|| format!("failed to read {}", self.count_path.display()))?;
        let violation_count = raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid violation count {:?}: {}", raw, e))?;
        let (width, height) = image::image_dimensions(&self.frame_path)
            .with_context(|| format!("failed to read {}", self.frame_path.display()))?;
        Ok(Some(LiveReading {
            violation_count,
            width,
            height,
        }))
    }
}

impl LiveStatePublisher for FileLiveState {
    fn publish(&mut self, annotated: &RgbImage, violation_count: usize) -> Result<()> {
        annotated
            .save_with_format(&self.frame_path, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", self.frame_path.display()))?;
        std::fs::write(&self.count_path, violation_count.to_string())
            .with_context(|| format!("failed to write {}", self.count_path.display()))?;
        Ok(())
    }
}

/// Snapshot held by `SharedLiveState`.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveSnapshot {
    pub annotated: RgbImage,
    pub violation_count: usize,
    /// Starts at 1 and increases by one per publish.
    pub sequence: u64,
}

/// In-process single-slot overwrite channel.
///
/// Each publish swaps in a new `Arc<LiveSnapshot>`; readers holding an older
/// snapshot keep a consistent view.
#[derive(Clone, Default)]
pub struct SharedLiveState {
    slot: Arc<RwLock<Option<Arc<LiveSnapshot>>>>,
}

impl SharedLiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<LiveSnapshot>> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LiveStatePublisher for SharedLiveState {
    fn publish(&mut self, annotated: &RgbImage, violation_count: usize) -> Result<()> {
        let mut guard = self
            .slot
            .write()
            .map_err(|_| anyhow!("live state lock poisoned"))?;
        let sequence = guard.as_ref().map_or(0, |prev| prev.sequence) + 1;
        *guard = Some(Arc::new(LiveSnapshot {
            annotated: annotated.clone(),
            violation_count,
            sequence,
        }));
        Ok(())
    }
}
