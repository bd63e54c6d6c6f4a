mod backend;
pub mod backends;
mod helper;
mod options;
mod result;

pub use backend::{DetectorBackend, DetectorFactory};
pub use backends::{AssetDetectorFactory, StubBackend, StubFactory};
pub use helper::ObjectDetectionHelper;
pub use options::{
    Delegate, DetectorOptions, ModelVariant, RunningMode, MAX_RESULTS_DEFAULT, MAX_RESULTS_MAX,
    MAX_RESULTS_MIN, THRESHOLD_DEFAULT, THRESHOLD_MAX, THRESHOLD_MIN,
};
pub use result::{
    BoundingBox, Category, Detection, DetectorError, DetectorErrorCode, DetectorEvent,
    FrameDetections, ResultBundle,
};
