use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use crate::chat::inference::{GenerationEvent, InferenceModel};
use crate::chat::message::{Author, MessageId};
use crate::chat::transcript::SharedTranscript;

/// Drives one conversation against a shared [`InferenceModel`].
///
/// A turn adds the user's message, reserves a loading placeholder for the
/// reply, disables input and streams the model's chunks into the
/// placeholder. Input is enabled again when the stream finishes or fails.
#[derive(Clone, Debug)]
pub struct ChatSession {
    transcript: SharedTranscript,
    input_enabled: Arc<AtomicBool>,
    model: Arc<InferenceModel>,
}

impl ChatSession {
    pub fn new(model: Arc<InferenceModel>) -> Self {
        Self::with_transcript(model, SharedTranscript::new())
    }

    pub fn with_transcript(model: Arc<InferenceModel>, transcript: SharedTranscript) -> Self {
        Self {
            transcript,
            input_enabled: Arc::new(AtomicBool::new(true)),
            model,
        }
    }

    pub fn transcript(&self) -> &SharedTranscript {
        &self.transcript
    }

    pub fn is_input_enabled(&self) -> bool {
        self.input_enabled.load(Ordering::SeqCst)
    }

    /// Run a turn on a background thread.
    ///
    /// Fails without touching the transcript while another turn is in flight.
    pub fn send_message(&self, text: impl Into<String>) -> Result<JoinHandle<()>> {
        self.claim_input()?;
        let session = self.clone();
        let text = text.into();
        std::thread::Builder::new()
            .name("chat-turn".to_string())
            .spawn(move || session.drive_turn(&text))
            .map_err(|e| {
                self.input_enabled.store(true, Ordering::SeqCst);
                anyhow!("failed to start chat turn: {}", e)
            })
    }

    /// Run a turn on the calling thread, returning once the reply is sealed.
    pub fn run_turn(&self, text: &str) -> Result<()> {
        self.claim_input()?;
        self.drive_turn(text);
        Ok(())
    }

    // Input doubles as the turn lock: only the caller that flips it off may
    // add a loading placeholder.
    fn claim_input(&self) -> Result<()> {
        self.input_enabled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| anyhow!("a reply is still being generated"))
    }

    fn drive_turn(&self, text: &str) {
        self.transcript.add_user_message(text);
        let placeholder = self.transcript.create_loading_message();

        if let Err(e) = self.stream_reply(&placeholder) {
            log::error!("chat turn failed: {:#}", e);
            self.transcript.with(|t| {
                t.seal(&placeholder);
                t.add_message(&format!("{:#}", e), Author::Model);
            });
        }
        self.input_enabled.store(true, Ordering::SeqCst);
    }

    fn stream_reply(&self, placeholder: &MessageId) -> Result<()> {
        let prompt = self.transcript.prompt_context();
        let chunks = self.model.generate_response_async(&prompt)?;

        for event in chunks {
            match event {
                GenerationEvent::Chunk { text, done } => {
                    self.transcript.append_chunk(placeholder, &text, done);
                    if done {
                        return Ok(());
                    }
                }
                GenerationEvent::Failed(message) => {
                    return Err(anyhow!("generation failed: {}", message));
                }
            }
        }
        Err(anyhow!("generation stream closed before the reply finished"))
    }
}
