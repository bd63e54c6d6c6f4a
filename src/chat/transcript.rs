use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::chat::message::{Author, ChatMessage, DisplayMessage, MessageId, END_TURN};

/// Number of most recent raw messages sent to the model as context.
pub const PROMPT_WINDOW: usize = 4;

/// Ordered chat history. Insertion order is conversation order.
///
/// Messages are only ever appended or updated in place by id. At most one
/// message is loading at a time: the response currently streaming in.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sealed message; returns its id.
    pub fn add_message(&mut self, text: &str, author: Author) -> MessageId {
        let raw = format!("{}{}{}", author.turn_opening(), text, END_TURN);
        let message = ChatMessage::new(raw, author);
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    pub fn add_user_message(&mut self, text: &str) -> MessageId {
        self.add_message(text, Author::User)
    }

    /// Reserve a model-authored slot for a streaming response.
    pub fn create_loading_message(&mut self) -> MessageId {
        let message = ChatMessage::loading(Author::Model);
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Append a streamed fragment to a loading message.
    ///
    /// Unknown ids and messages that are already sealed are ignored; returns
    /// whether the fragment was applied.
    pub fn append_chunk(&mut self, id: &str, fragment: &str, done: bool) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) if message.is_loading => {
                message.push_chunk(fragment, done);
                true
            }
            Some(_) => {
                log::debug!("chunk for sealed message {} ignored", id);
                false
            }
            None => {
                log::debug!("chunk for unknown message {} ignored", id);
                false
            }
        }
    }

    /// Clear the loading flag without adding text.
    pub fn seal(&mut self, id: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.is_loading = false;
                true
            }
            None => false,
        }
    }

    /// Messages for display: newest first, turn markers removed.
    pub fn read_transcript(&self) -> Vec<DisplayMessage> {
        self.messages.iter().rev().map(ChatMessage::to_display).collect()
    }

    /// Conversation context for the model: the last [`PROMPT_WINDOW`] raw
    /// messages joined by newlines.
    pub fn prompt_context(&self) -> String {
        let start = self.messages.len().saturating_sub(PROMPT_WINDOW);
        self.messages[start..]
            .iter()
            .map(|m| m.raw_message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn loading_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_loading).count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Transcript shared between the generation thread and readers.
///
/// Every operation holds the lock for its whole duration, so readers never
/// observe a partially applied update.
#[derive(Clone, Debug, Default)]
pub struct SharedTranscript {
    inner: Arc<Mutex<Transcript>>,
}

impl SharedTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Transcript> {
        // A panic mid-update cannot leave a message half-written: every
        // mutation is a single push or string append.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut Transcript) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn add_message(&self, text: &str, author: Author) -> MessageId {
        self.lock().add_message(text, author)
    }

    pub fn add_user_message(&self, text: &str) -> MessageId {
        self.lock().add_user_message(text)
    }

    pub fn create_loading_message(&self) -> MessageId {
        self.lock().create_loading_message()
    }

    pub fn append_chunk(&self, id: &str, fragment: &str, done: bool) -> bool {
        self.lock().append_chunk(id, fragment, done)
    }

    pub fn seal(&self, id: &str) -> bool {
        self.lock().seal(id)
    }

    pub fn read_transcript(&self) -> Vec<DisplayMessage> {
        self.lock().read_transcript()
    }

    pub fn prompt_context(&self) -> String {
        self.lock().prompt_context()
    }

    pub fn snapshot(&self) -> Transcript {
        self.lock().clone()
    }
}
