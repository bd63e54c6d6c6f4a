#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::options::DetectorOptions;
use crate::detect::result::{BoundingBox, Category, Detection};

/// Tract-based backend for EfficientDet-Lite ONNX exports.
///
/// The model takes a `1 x S x S x 3` u8 tensor and produces, in order,
/// normalized `[ymin, xmin, ymax, xmax]` boxes, class indices and scores.
/// Category names come from an optional `<model>.labels` file with one label
/// per line.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    threshold: f32,
    max_results: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, options: &DetectorOptions) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_size = options.model.input_size();
        let edge = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(u8::datum_type(), tvec!(1, edge, edge, 3)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = load_labels(&model_path.with_extension("labels"))?;
        log::info!(
            "tract detector loaded {} ({}x{} input, {} labels)",
            model_path.display(),
            input_size,
            input_size,
            labels.len()
        );

        Ok(Self {
            model,
            input_size,
            threshold: options.threshold,
            max_results: options.max_results,
            labels,
        })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized = imageops::resize(image, self.input_size, self.input_size, FilterType::Triangle);
        let edge = self.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, edge, edge, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c]
        })
        .into_tensor()
    }

    fn decode(&self, outputs: &[TValue], width: u32, height: u32) -> Result<Vec<Detection>> {
        if outputs.len() < 3 {
            return Err(anyhow!("expected boxes, classes and scores outputs, got {}", outputs.len()));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("box output tensor was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("class output tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("score output tensor was not f32")?;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        if boxes.len() < scores.len() * 4 || classes.len() < scores.len() {
            return Err(anyhow!("detector outputs disagree on candidate count"));
        }

        let (w, h) = (width as f32, height as f32);
        let mut detections: Vec<Detection> = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| score.is_finite() && **score >= self.threshold)
            .map(|(i, &score)| {
                let b = &boxes[i * 4..i * 4 + 4];
                let (ymin, xmin) = (b[0].clamp(0.0, 1.0), b[1].clamp(0.0, 1.0));
                let (ymax, xmax) = (b[2].clamp(0.0, 1.0), b[3].clamp(0.0, 1.0));
                let index = classes[i].max(0.0) as u32;
                Detection {
                    bounding_box: BoundingBox {
                        left: xmin * w,
                        top: ymin * h,
                        width: (xmax - xmin).max(0.0) * w,
                        height: (ymax - ymin).max(0.0) * h,
                    },
                    categories: vec![Category {
                        index,
                        label: self.label_for(index),
                        score,
                    }],
                }
            })
            .collect();

        detections.sort_by(|a, b| b.categories[0].score.total_cmp(&a.categories[0].score));
        detections.truncate(self.max_results as usize);
        Ok(detections)
    }

    fn label_for(&self, index: u32) -> String {
        self.labels
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage, _timestamp_ms: u64) -> Result<Vec<Detection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let (width, height) = image.dimensions();
        self.decode(&outputs, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank, 0).map(|_| ())
    }
}

fn load_labels(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels from {}", path.display()))?;
    Ok(raw.lines().map(|line| line.trim().to_string()).collect())
}
