use anyhow::Result;
use image::RgbImage;

use crate::detect::options::DetectorOptions;
use crate::detect::result::{Detection, DetectorError};

/// Detector backend trait.
///
/// A backend wraps one loaded detection model. It is built for a fixed
/// threshold and result limit, so `detect` only returns detections that
/// already satisfy both.
///
/// Backends must be `Send`: in live-stream mode the backend moves onto the
/// worker thread that owns it until the helper is cleared.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an upright RGB image.
    ///
    /// `timestamp_ms` is monotonic within one video or stream and may be
    /// used by backends that track state across frames.
    fn detect(&mut self, image: &RgbImage, timestamp_ms: u64) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds backends from options.
///
/// Rejections carry a [`DetectorError`] so the caller can tell GPU delegate
/// failures apart from everything else.
pub trait DetectorFactory: Send + Sync {
    fn create(&self, options: &DetectorOptions) -> Result<Box<dyn DetectorBackend>, DetectorError>;
}
