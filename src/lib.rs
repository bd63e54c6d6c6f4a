//! On-device AI demo runtime.
//!
//! Two independent features share this crate:
//!
//! - Object detection: [`detect::ObjectDetectionHelper`] adapts detector
//!   configuration to a backend for still images, sampled video and live
//!   camera frames. [`overlay`] maps the resulting boxes onto a letterboxed
//!   preview.
//! - Chat: [`chat::ChatSession`] streams replies from a local language model
//!   into a [`chat::SharedTranscript`] using Gemma turn markers.
//!
//! # Module Structure
//!
//! - `frame`: camera frames and conversion to upright RGB
//! - `video`: timestamped frame sources for video detection
//! - `config`: file and environment configuration for the binaries
//! - `ui`: terminal progress for the binaries

pub mod chat;
pub mod config;
pub mod detect;
pub mod frame;
pub mod overlay;
pub mod ui;
pub mod video;

pub use chat::{ChatSession, InferenceModel, SharedTranscript};
pub use config::AppConfig;
pub use detect::{DetectorOptions, ObjectDetectionHelper, ResultBundle};
pub use frame::CameraFrame;
pub use overlay::{fitted_box_size, OverlayMapper, Size};
