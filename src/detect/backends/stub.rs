use anyhow::Result;
use image::RgbImage;
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectorBackend, DetectorFactory};
use crate::detect::options::{Delegate, DetectorOptions};
use crate::detect::result::{BoundingBox, Category, Detection, DetectorError};

const STUB_LABELS: [&str; 6] = ["person", "bicycle", "car", "dog", "cat", "cup"];
const CANDIDATES: usize = 5;

/// Stub backend for tests and demos.
///
/// Detections are derived from a hash of the pixels, so the same image always
/// yields the same boxes while different images yield different ones.
pub struct StubBackend {
    threshold: f32,
    max_results: u32,
}

impl StubBackend {
    pub fn new(threshold: f32, max_results: u32) -> Self {
        Self {
            threshold,
            max_results,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        let options = DetectorOptions::default();
        Self::new(options.threshold, options.max_results)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage, _timestamp_ms: u64) -> Result<Vec<Detection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let hash: [u8; 32] = Sha256::digest(image.as_raw()).into();
        let unit = |byte: u8| byte as f32 / 255.0;

        let mut detections: Vec<Detection> = hash
            .chunks_exact(6)
            .take(CANDIDATES)
            .map(|b| {
                let score = unit(b[0]);
                let box_width = (0.1 + unit(b[3]) * 0.4) * width as f32;
                let box_height = (0.1 + unit(b[4]) * 0.4) * height as f32;
                let index = b[5] as usize % STUB_LABELS.len();
                Detection {
                    bounding_box: BoundingBox {
                        left: unit(b[1]) * 0.5 * width as f32,
                        top: unit(b[2]) * 0.5 * height as f32,
                        width: box_width,
                        height: box_height,
                    },
                    categories: vec![Category {
                        index: index as u32,
                        label: STUB_LABELS[index].to_string(),
                        score,
                    }],
                }
            })
            .filter(|d| d.categories[0].score >= self.threshold)
            .collect();

        detections.sort_by(|a, b| b.categories[0].score.total_cmp(&a.categories[0].score));
        detections.truncate(self.max_results as usize);
        Ok(detections)
    }
}

/// Builds [`StubBackend`]s. GPU availability is configurable so delegate
/// fallbacks can be exercised without hardware.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubFactory {
    pub gpu_available: bool,
}

impl StubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gpu(mut self) -> Self {
        self.gpu_available = true;
        self
    }
}

impl DetectorFactory for StubFactory {
    fn create(&self, options: &DetectorOptions) -> Result<Box<dyn DetectorBackend>, DetectorError> {
        if options.delegate == Delegate::Gpu && !self.gpu_available {
            return Err(DetectorError::gpu("GPU delegate is not available on this device"));
        }
        Ok(Box::new(StubBackend::new(options.threshold, options.max_results)))
    }
}
