//! Mapping detection boxes onto a display area.
//!
//! The camera preview is letterboxed into the display: it keeps the frame's
//! aspect ratio and fills either the full width or the full height. Boxes
//! reported in frame pixels are scaled by the same uniform factor so they line
//! up with the preview.

use serde::Serialize;

use crate::detect::{BoundingBox, Detection, ResultBundle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    fn aspect_ratio(&self) -> f32 {
        self.width / self.height
    }
}

/// Largest size with `box_size`'s aspect ratio that fits in `container`.
///
/// A box relatively wider than the container takes the container's width;
/// otherwise it takes the container's height.
pub fn fitted_box_size(container: Size, box_size: Size) -> Size {
    if container.is_empty() || box_size.is_empty() {
        return Size::ZERO;
    }
    if box_size.aspect_ratio() > container.aspect_ratio() {
        Size::new(
            container.width,
            container.width / box_size.width * box_size.height,
        )
    } else {
        Size::new(
            container.height / box_size.height * box_size.width,
            container.height,
        )
    }
}

/// A box in display coordinates, relative to the fitted preview's origin.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
}

/// Keeps the frame-to-display scale current as frame dimensions change.
///
/// The first results of a session often report a different size than the
/// camera was asked for; feed every bundle's dimensions through
/// [`update_frame_size`](Self::update_frame_size).
#[derive(Clone, Debug)]
pub struct OverlayMapper {
    container: Size,
    frame: Size,
    fitted: Size,
    scale: f32,
}

impl OverlayMapper {
    pub fn new(container: Size, frame_width: u32, frame_height: u32) -> Self {
        let mut mapper = Self {
            container,
            frame: Size::ZERO,
            fitted: Size::ZERO,
            scale: 0.0,
        };
        mapper.update_frame_size(frame_width, frame_height);
        mapper
    }

    /// Returns true when the dimensions changed and the scale was recomputed.
    pub fn update_frame_size(&mut self, width: u32, height: u32) -> bool {
        let frame = Size::new(width as f32, height as f32);
        if frame == self.frame {
            return false;
        }
        self.frame = frame;
        self.recompute();
        true
    }

    pub fn set_container(&mut self, container: Size) {
        if container != self.container {
            self.container = container;
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        self.fitted = fitted_box_size(self.container, self.frame);
        self.scale = if self.frame.is_empty() {
            0.0
        } else {
            self.fitted.width / self.frame.width
        };
        log::debug!(
            "overlay fitted {}x{} frame into {}x{} (scale {:.3})",
            self.frame.width,
            self.frame.height,
            self.fitted.width,
            self.fitted.height,
            self.scale
        );
    }

    /// Size of the letterboxed preview inside the container.
    pub fn preview_size(&self) -> Size {
        self.fitted
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn map_box(&self, bounding_box: &BoundingBox) -> (f32, f32, f32, f32) {
        (
            bounding_box.left * self.scale,
            bounding_box.top * self.scale,
            bounding_box.width * self.scale,
            bounding_box.height * self.scale,
        )
    }

    pub fn map_detection(&self, detection: &Detection) -> OverlayRect {
        let (left, top, width, height) = self.map_box(&detection.bounding_box);
        OverlayRect {
            left,
            top,
            width,
            height,
            label: detection.label(),
        }
    }

    /// Update to the bundle's dimensions and map its most recent frame.
    pub fn map_bundle(&mut self, bundle: &ResultBundle) -> Vec<OverlayRect> {
        self.update_frame_size(bundle.input_image_width, bundle.input_image_height);
        bundle
            .results
            .last()
            .map(|frame| {
                frame
                    .detections
                    .iter()
                    .map(|d| self.map_detection(d))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Category, FrameDetections};

    #[test]
    fn wide_box_fills_width() {
        let fitted = fitted_box_size(Size::new(100.0, 100.0), Size::new(4.0, 3.0));
        assert_eq!(fitted, Size::new(100.0, 75.0));
    }

    #[test]
    fn tall_box_fills_height() {
        let fitted = fitted_box_size(Size::new(100.0, 100.0), Size::new(3.0, 4.0));
        assert_eq!(fitted, Size::new(75.0, 100.0));
    }

    #[test]
    fn empty_sizes_fit_to_zero() {
        assert_eq!(fitted_box_size(Size::new(100.0, 0.0), Size::new(3.0, 4.0)), Size::ZERO);
        assert_eq!(fitted_box_size(Size::new(100.0, 100.0), Size::ZERO), Size::ZERO);
    }

    #[test]
    fn boxes_scale_uniformly() {
        let mapper = OverlayMapper::new(Size::new(320.0, 480.0), 640, 480);
        assert_eq!(mapper.preview_size(), Size::new(320.0, 240.0));

        let (left, top, width, height) = mapper.map_box(&BoundingBox {
            left: 100.0,
            top: 50.0,
            width: 200.0,
            height: 100.0,
        });
        assert_eq!((left, top, width, height), (50.0, 25.0, 100.0, 50.0));
    }

    #[test]
    fn reported_dimensions_replace_requested_ones() {
        // Camera asked for 640x480 but the rotated frame is 480x640.
        let mut mapper = OverlayMapper::new(Size::new(300.0, 400.0), 640, 480);
        let bundle = ResultBundle {
            results: vec![FrameDetections {
                timestamp_ms: 0,
                detections: vec![Detection {
                    bounding_box: BoundingBox {
                        left: 48.0,
                        top: 64.0,
                        width: 96.0,
                        height: 128.0,
                    },
                    categories: vec![Category {
                        index: 0,
                        label: "person".to_string(),
                        score: 0.9,
                    }],
                }],
            }],
            inference_time_ms: 12,
            input_image_height: 640,
            input_image_width: 480,
        };

        let rects = mapper.map_bundle(&bundle);
        assert_eq!(mapper.preview_size(), Size::new(300.0, 400.0));
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].left, 30.0);
        assert_eq!(rects[0].top, 40.0);
        assert_eq!(rects[0].width, 60.0);
        assert_eq!(rects[0].height, 80.0);
        assert_eq!(rects[0].label, "person 0.90");

        assert!(!mapper.update_frame_size(480, 640));
    }
}
