use anyhow::Result;
use image::RgbImage;

use super::VideoSource;

/// Pre-decoded frames addressed by timestamp.
#[derive(Clone, Debug, Default)]
pub struct InMemoryVideo {
    frames: Vec<(u64, RgbImage)>,
    duration_ms: Option<u64>,
}

impl InMemoryVideo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a video with one frame every `interval_ms`, produced by `make`.
    pub fn generate(
        frame_count: u64,
        interval_ms: u64,
        mut make: impl FnMut(u64) -> RgbImage,
    ) -> Self {
        let mut video = Self::new();
        for i in 0..frame_count {
            let ts = i * interval_ms;
            video.push(ts, make(i));
        }
        video
    }

    /// Add a frame. Duration grows to cover the latest timestamp unless it
    /// was set explicitly.
    pub fn push(&mut self, timestamp_ms: u64, frame: RgbImage) {
        self.frames.push((timestamp_ms, frame));
        self.frames.sort_by_key(|(ts, _)| *ts);
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl VideoSource for InMemoryVideo {
    fn duration_ms(&mut self) -> Result<Option<u64>> {
        if self.duration_ms.is_some() {
            return Ok(self.duration_ms);
        }
        Ok(self.frames.last().map(|(ts, _)| *ts))
    }

    fn frame_at(&mut self, timestamp_ms: u64) -> Result<Option<RgbImage>> {
        Ok(self
            .frames
            .iter()
            .min_by_key(|(ts, _)| ts.abs_diff(timestamp_ms))
            .map(|(_, frame)| frame.clone()))
    }
}
