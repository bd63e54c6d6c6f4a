use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::chat::message::Author;

pub const DEFAULT_MODEL_PATH: &str = "/data/local/tmp/llm/gemma-2b-it-gpu-int4.bin";
pub const DEFAULT_TEMPERATURE: f32 = 0.75;
pub const DEFAULT_TOP_K: u32 = 30;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Sampling settings handed to the generator once, at construction.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model_path: PathBuf,
    pub temperature: f32,
    pub top_k: u32,
    pub max_tokens: u32,
    pub random_seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            temperature: DEFAULT_TEMPERATURE,
            top_k: DEFAULT_TOP_K,
            max_tokens: DEFAULT_MAX_TOKENS,
            random_seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature.is_finite() && self.temperature >= 0.0) {
            return Err(anyhow!("temperature must be a non-negative number"));
        }
        if self.top_k == 0 {
            return Err(anyhow!("top_k must be greater than zero"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be greater than zero"));
        }
        Ok(())
    }
}

/// One item of a streamed response.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    Chunk { text: String, done: bool },
    Failed(String),
}

pub type ChunkSender = Sender<GenerationEvent>;

/// External text generator.
///
/// `generate_async` must return promptly and deliver the response on
/// `sink` from its own execution context, in order, ending with a chunk whose
/// `done` is true or with a `Failed` event.
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate_async(&self, prompt: &str, sink: ChunkSender) -> Result<()>;
}

/// Owned handle to the local language model.
///
/// Construction checks for the weight file and builds the generator once;
/// [`close`](Self::close) releases it. Share it with `Arc` rather than
/// creating more than one.
pub struct InferenceModel {
    config: GenerationConfig,
    generator: Box<dyn TextGenerator>,
}

impl std::fmt::Debug for InferenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceModel")
            .field("config", &self.config)
            .field("generator", &self.generator.name())
            .finish()
    }
}

impl InferenceModel {
    /// Open the model at `config.model_path`; `build` creates the generator
    /// from the config.
    pub fn open<G, F>(config: GenerationConfig, build: F) -> Result<Self>
    where
        G: TextGenerator + 'static,
        F: FnOnce(&GenerationConfig) -> Result<G>,
    {
        if !model_exists(&config.model_path) {
            return Err(anyhow!(
                "model does not exist at {}",
                config.model_path.display()
            ));
        }
        config.validate()?;

        let generator = build(&config)?;
        log::info!(
            "language model ready: {} via {} (temperature={} top_k={} max_tokens={})",
            config.model_path.display(),
            generator.name(),
            config.temperature,
            config.top_k,
            config.max_tokens
        );
        Ok(Self {
            config,
            generator: Box::new(generator),
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Start generating a reply to `prompt`. The model turn opening is
    /// appended before the prompt is submitted.
    pub fn generate_response_async(&self, prompt: &str) -> Result<Receiver<GenerationEvent>> {
        let prompt = format!("{}{}", prompt, Author::Model.turn_opening());
        let (tx, rx) = mpsc::channel();
        self.generator.generate_async(&prompt, tx)?;
        Ok(rx)
    }

    pub fn close(self) {
        log::info!("language model closed: {}", self.config.model_path.display());
    }
}

fn model_exists(path: &Path) -> bool {
    path.is_file()
}
