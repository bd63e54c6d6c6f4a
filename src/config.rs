use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chat::GenerationConfig;
use crate::detect::{
    Delegate, DetectorOptions, ModelVariant, RunningMode, MAX_RESULTS_DEFAULT, MAX_RESULTS_MAX,
    MAX_RESULTS_MIN, THRESHOLD_DEFAULT, THRESHOLD_MAX, THRESHOLD_MIN,
};

const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_VIDEO_INTERVAL_MS: u64 = 300;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    detection: Option<DetectionConfigFile>,
    chat: Option<ChatConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    models_dir: Option<PathBuf>,
    threshold: Option<f32>,
    max_results: Option<u32>,
    delegate: Option<Delegate>,
    model: Option<ModelVariant>,
    video_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatConfigFile {
    model_path: Option<PathBuf>,
    temperature: Option<f32>,
    top_k: Option<u32>,
    max_tokens: Option<u32>,
    random_seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub detection: DetectionSettings,
    pub chat: GenerationConfig,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub models_dir: PathBuf,
    pub threshold: f32,
    pub max_results: u32,
    pub delegate: Delegate,
    pub model: ModelVariant,
    pub video_interval_ms: u64,
}

impl DetectionSettings {
    /// Detector options for `running_mode` with these settings.
    pub fn detector_options(&self, running_mode: RunningMode) -> DetectorOptions {
        DetectorOptions {
            threshold: self.threshold,
            max_results: self.max_results,
            delegate: self.delegate,
            model: self.model,
            running_mode,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ONDEVICE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            models_dir: detection
                .models_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODELS_DIR)),
            threshold: detection.threshold.unwrap_or(THRESHOLD_DEFAULT),
            max_results: detection.max_results.unwrap_or(MAX_RESULTS_DEFAULT),
            delegate: detection.delegate.unwrap_or_default(),
            model: detection.model.unwrap_or_default(),
            video_interval_ms: detection
                .video_interval_ms
                .unwrap_or(DEFAULT_VIDEO_INTERVAL_MS),
        };

        let defaults = GenerationConfig::default();
        let chat = file.chat.unwrap_or_default();
        let chat = GenerationConfig {
            model_path: chat.model_path.unwrap_or(defaults.model_path),
            temperature: chat.temperature.unwrap_or(defaults.temperature),
            top_k: chat.top_k.unwrap_or(defaults.top_k),
            max_tokens: chat.max_tokens.unwrap_or(defaults.max_tokens),
            random_seed: chat.random_seed.or(defaults.random_seed),
        };

        Self { detection, chat }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = non_empty_env("ONDEVICE_MODELS_DIR") {
            self.detection.models_dir = PathBuf::from(dir);
        }
        if let Some(delegate) = non_empty_env("ONDEVICE_DELEGATE") {
            self.detection.delegate = delegate
                .parse()
                .context("ONDEVICE_DELEGATE must be cpu or gpu")?;
        }
        if let Some(model) = non_empty_env("ONDEVICE_MODEL") {
            self.detection.model = model
                .parse()
                .context("ONDEVICE_MODEL must be lite0, lite1 or lite2")?;
        }
        if let Some(threshold) = non_empty_env("ONDEVICE_THRESHOLD") {
            self.detection.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("ONDEVICE_THRESHOLD must be a number"))?;
        }
        if let Some(max_results) = non_empty_env("ONDEVICE_MAX_RESULTS") {
            self.detection.max_results = max_results
                .parse()
                .map_err(|_| anyhow!("ONDEVICE_MAX_RESULTS must be an integer"))?;
        }
        if let Some(interval) = non_empty_env("ONDEVICE_VIDEO_INTERVAL_MS") {
            self.detection.video_interval_ms = interval.parse().map_err(|_| {
                anyhow!("ONDEVICE_VIDEO_INTERVAL_MS must be an integer number of milliseconds")
            })?;
        }
        if let Some(path) = non_empty_env("ONDEVICE_LLM_MODEL_PATH") {
            self.chat.model_path = PathBuf::from(path);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&detection.threshold) {
            return Err(anyhow!(
                "threshold must be within [{}, {}]",
                THRESHOLD_MIN,
                THRESHOLD_MAX
            ));
        }
        if !(MAX_RESULTS_MIN..=MAX_RESULTS_MAX).contains(&detection.max_results) {
            return Err(anyhow!(
                "max_results must be within [{}, {}]",
                MAX_RESULTS_MIN,
                MAX_RESULTS_MAX
            ));
        }
        if detection.video_interval_ms == 0 {
            return Err(anyhow!("video_interval_ms must be greater than zero"));
        }
        self.chat.validate()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = AppConfig::from_file(AppConfigFile::default());
        assert_eq!(cfg.detection.threshold, THRESHOLD_DEFAULT);
        assert_eq!(cfg.detection.max_results, MAX_RESULTS_DEFAULT);
        assert_eq!(cfg.detection.delegate, Delegate::Cpu);
        assert_eq!(cfg.detection.model, ModelVariant::Lite0);
        assert_eq!(cfg.chat, GenerationConfig::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut cfg = AppConfig::from_file(AppConfigFile::default());
        cfg.detection.threshold = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn detector_options_carry_settings() {
        let mut cfg = AppConfig::from_file(AppConfigFile::default());
        cfg.detection.max_results = 5;
        cfg.detection.delegate = Delegate::Gpu;
        let options = cfg.detection.detector_options(RunningMode::Video);
        assert_eq!(options.max_results, 5);
        assert_eq!(options.delegate, Delegate::Gpu);
        assert_eq!(options.running_mode, RunningMode::Video);
    }

    #[test]
    fn toml_files_are_parsed_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ondevice.toml");
        std::fs::write(
            &path,
            "[detection]\nmodel = \"lite2\"\nthreshold = 0.3\n\n[chat]\ntop_k = 10\n",
        )
        .unwrap();
        let cfg = AppConfig::from_file(read_config_file(&path).unwrap());
        assert_eq!(cfg.detection.model, ModelVariant::Lite2);
        assert_eq!(cfg.detection.threshold, 0.3);
        assert_eq!(cfg.chat.top_k, 10);
    }
}
