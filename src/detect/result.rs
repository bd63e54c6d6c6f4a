use std::fmt;

use serde::Serialize;

/// Axis-aligned box in input-image pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Category {
    pub index: u32,
    pub label: String,
    pub score: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Ordered by descending score.
    pub categories: Vec<Category>,
}

impl Detection {
    pub fn top_category(&self) -> Option<&Category> {
        self.categories.first()
    }

    /// Text shown next to the box, e.g. `"person 0.87"`.
    pub fn label(&self) -> String {
        match self.top_category() {
            Some(category) => format!("{} {:.2}", category.label, category.score),
            None => "unknown".to_string(),
        }
    }
}

/// Detections for a single frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FrameDetections {
    pub timestamp_ms: u64,
    pub detections: Vec<Detection>,
}

/// Output of one detection pass: one entry per processed frame, the latency
/// shown to the user, and the dimensions boxes are expressed in.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultBundle {
    pub results: Vec<FrameDetections>,
    pub inference_time_ms: u64,
    pub input_image_height: u32,
    pub input_image_width: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DetectorErrorCode {
    Other,
    Gpu,
}

/// Error delivered on the detector listener channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorError {
    pub code: DetectorErrorCode,
    pub message: String,
}

impl DetectorError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            code: DetectorErrorCode::Other,
            message: message.into(),
        }
    }

    pub fn gpu(message: impl Into<String>) -> Self {
        Self {
            code: DetectorErrorCode::Gpu,
            message: message.into(),
        }
    }
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            DetectorErrorCode::Other => write!(f, "{}", self.message),
            DetectorErrorCode::Gpu => write!(f, "gpu: {}", self.message),
        }
    }
}

impl std::error::Error for DetectorError {}

/// What the listener receives: either a finished bundle or an error.
pub type DetectorEvent = Result<ResultBundle, DetectorError>;
