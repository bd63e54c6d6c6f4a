//! Chat transcript and the session that streams model replies into it.

mod generator;
mod inference;
mod message;
mod session;
mod transcript;

pub use generator::ScriptedGenerator;
pub use inference::{
    ChunkSender, GenerationConfig, GenerationEvent, InferenceModel, TextGenerator,
    DEFAULT_MAX_TOKENS, DEFAULT_MODEL_PATH, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
};
pub use message::{Author, ChatMessage, DisplayMessage, MessageId, END_TURN, START_TURN};
pub use session::ChatSession;
pub use transcript::{SharedTranscript, Transcript, PROMPT_WINDOW};
