use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const THRESHOLD_MIN: f32 = 0.0;
pub const THRESHOLD_MAX: f32 = 0.8;
pub const THRESHOLD_DEFAULT: f32 = 0.5;
pub const MAX_RESULTS_MIN: u32 = 1;
pub const MAX_RESULTS_MAX: u32 = 5;
pub const MAX_RESULTS_DEFAULT: u32 = 3;

/// Hardware the detector runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

impl FromStr for Delegate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Delegate::Cpu),
            "gpu" => Ok(Delegate::Gpu),
            other => Err(anyhow!("unknown delegate '{}' (expected cpu or gpu)", other)),
        }
    }
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Cpu => f.write_str("CPU"),
            Delegate::Gpu => f.write_str("GPU"),
        }
    }
}

/// Bundled detector variants, smallest first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    #[default]
    Lite0,
    Lite1,
    Lite2,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 3] = [ModelVariant::Lite0, ModelVariant::Lite1, ModelVariant::Lite2];

    pub fn asset_name(self) -> &'static str {
        match self {
            ModelVariant::Lite0 => "efficientdet_lite0.onnx",
            ModelVariant::Lite1 => "efficientdet_lite1.onnx",
            ModelVariant::Lite2 => "efficientdet_lite2.onnx",
        }
    }

    /// Square input edge the exported network expects.
    pub fn input_size(self) -> u32 {
        match self {
            ModelVariant::Lite0 => 320,
            ModelVariant::Lite1 => 384,
            ModelVariant::Lite2 => 448,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ModelVariant::Lite0 => "EfficientDet Lite0",
            ModelVariant::Lite1 => "EfficientDet Lite1",
            ModelVariant::Lite2 => "EfficientDet Lite2",
        }
    }
}

impl FromStr for ModelVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lite0" | "0" => Ok(ModelVariant::Lite0),
            "lite1" | "1" => Ok(ModelVariant::Lite1),
            "lite2" | "2" => Ok(ModelVariant::Lite2),
            other => Err(anyhow!("unknown model '{}' (expected lite0, lite1 or lite2)", other)),
        }
    }
}

/// Which call sequence the detector is built for. Fixed per helper instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunningMode {
    #[default]
    Image,
    Video,
    LiveStream,
}

/// Detector configuration as edited by the options screen.
///
/// Adjustments never leave the allowed range: stepping past a bound leaves
/// the value unchanged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorOptions {
    pub threshold: f32,
    pub max_results: u32,
    pub delegate: Delegate,
    pub model: ModelVariant,
    pub running_mode: RunningMode,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            threshold: THRESHOLD_DEFAULT,
            max_results: MAX_RESULTS_DEFAULT,
            delegate: Delegate::Cpu,
            model: ModelVariant::Lite0,
            running_mode: RunningMode::Image,
        }
    }
}

impl DetectorOptions {
    pub fn with_running_mode(mut self, running_mode: RunningMode) -> Self {
        self.running_mode = running_mode;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX);
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(MAX_RESULTS_MIN, MAX_RESULTS_MAX);
        self
    }

    pub fn with_delegate(mut self, delegate: Delegate) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_model(mut self, model: ModelVariant) -> Self {
        self.model = model;
        self
    }

    // Stepping works in whole tenths so repeated clicks do not drift.
    fn threshold_tenths(&self) -> i32 {
        (self.threshold * 10.0).round() as i32
    }

    pub fn increment_threshold(&mut self) {
        let next = (self.threshold_tenths() + 1) as f32 / 10.0;
        self.threshold = next.min(THRESHOLD_MAX);
    }

    pub fn decrement_threshold(&mut self) {
        let next = (self.threshold_tenths() - 1) as f32 / 10.0;
        self.threshold = next.max(THRESHOLD_MIN);
    }

    pub fn increment_max_results(&mut self) {
        self.max_results = (self.max_results + 1).min(MAX_RESULTS_MAX);
    }

    pub fn decrement_max_results(&mut self) {
        self.max_results = self.max_results.saturating_sub(1).max(MAX_RESULTS_MIN);
    }

    pub fn validate(&self) -> Result<()> {
        if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&self.threshold) {
            return Err(anyhow!(
                "threshold {} outside [{}, {}]",
                self.threshold,
                THRESHOLD_MIN,
                THRESHOLD_MAX
            ));
        }
        if !(MAX_RESULTS_MIN..=MAX_RESULTS_MAX).contains(&self.max_results) {
            return Err(anyhow!(
                "max results {} outside [{}, {}]",
                self.max_results,
                MAX_RESULTS_MIN,
                MAX_RESULTS_MAX
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_steps_stay_in_range() {
        let mut options = DetectorOptions::default().with_threshold(0.0);
        options.decrement_threshold();
        assert_eq!(options.threshold, 0.0);

        for _ in 0..20 {
            options.increment_threshold();
        }
        assert_eq!(options.threshold, 0.8);

        options.increment_threshold();
        assert_eq!(options.threshold, 0.8);

        options.decrement_threshold();
        assert!((options.threshold - 0.7).abs() < 1e-6);
    }

    #[test]
    fn every_threshold_step_is_valid() {
        let mut options = DetectorOptions::default().with_threshold(0.0);
        for expected_tenths in 1..=8 {
            options.increment_threshold();
            assert!((options.threshold * 10.0 - expected_tenths as f32).abs() < 1e-4);
            options.validate().unwrap();
        }
        for _ in 0..10 {
            options.decrement_threshold();
            options.validate().unwrap();
        }
        assert_eq!(options.threshold, 0.0);
    }

    #[test]
    fn max_results_steps_stay_in_range() {
        let mut options = DetectorOptions::default().with_max_results(1);
        options.decrement_max_results();
        assert_eq!(options.max_results, 1);

        for _ in 0..10 {
            options.increment_max_results();
        }
        assert_eq!(options.max_results, 5);
        options.increment_max_results();
        assert_eq!(options.max_results, 5);
    }

    #[test]
    fn builders_clamp_out_of_range_values() {
        let options = DetectorOptions::default().with_threshold(1.5).with_max_results(0);
        assert_eq!(options.threshold, 0.8);
        assert_eq!(options.max_results, 1);
    }

    #[test]
    fn parses_delegate_and_model_names() {
        assert_eq!("GPU".parse::<Delegate>().unwrap(), Delegate::Gpu);
        assert_eq!("lite2".parse::<ModelVariant>().unwrap(), ModelVariant::Lite2);
        assert!("tpu".parse::<Delegate>().is_err());
        assert!("lite7".parse::<ModelVariant>().is_err());
    }
}
