//! Video frame sources for batch detection.
//!
//! Batch video detection samples a file at fixed timestamps rather than
//! decoding every frame, so sources expose random access by time:
//! - `InMemoryVideo`: pre-decoded frames (tests, synthetic demos)
//! - `FfmpegVideoSource`: local files (feature: video-ffmpeg)
//!
//! Sources only read local data. Decoded frames are handed to the detector
//! and dropped; nothing is written back to disk.

use anyhow::Result;
use image::RgbImage;

#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;
mod memory;

#[cfg(feature = "video-ffmpeg")]
pub use self::ffmpeg::FfmpegVideoSource;
pub use memory::InMemoryVideo;

/// Random-access view of a video.
pub trait VideoSource {
    /// Total length, or `None` when the container does not report one.
    fn duration_ms(&mut self) -> Result<Option<u64>>;

    /// Decode the frame closest to `timestamp_ms`.
    ///
    /// `Ok(None)` means no frame could be produced for that time.
    fn frame_at(&mut self, timestamp_ms: u64) -> Result<Option<RgbImage>>;
}
