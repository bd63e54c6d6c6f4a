use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Opens a conversational turn; followed by the author and a newline.
pub const START_TURN: &str = "<start_of_turn>";
/// Closes a conversational turn.
pub const END_TURN: &str = "<end_of_turn>";

pub type MessageId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Model,
}

impl Author {
    pub fn as_str(self) -> &'static str {
        match self {
            Author::User => "user",
            Author::Model => "model",
        }
    }

    /// Marker that starts a turn by this author, e.g. `<start_of_turn>model\n`.
    pub fn turn_opening(self) -> String {
        format!("{}{}\n", START_TURN, self.as_str())
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript entry. `raw_message` keeps the turn markers that are sent
/// to the model; [`display_text`](Self::display_text) removes them.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub raw_message: String,
    pub author: Author,
    pub is_loading: bool,
    chunks_received: usize,
}

impl ChatMessage {
    pub fn new(raw_message: impl Into<String>, author: Author) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            raw_message: raw_message.into(),
            author,
            is_loading: false,
            chunks_received: 0,
        }
    }

    /// Empty placeholder for a response that is about to stream in.
    pub fn loading(author: Author) -> Self {
        Self {
            is_loading: true,
            ..Self::new(String::new(), author)
        }
    }

    pub fn is_from_user(&self) -> bool {
        self.author == Author::User
    }

    pub fn display_text(&self) -> String {
        self.raw_message
            .replace(&self.author.turn_opening(), "")
            .replace(END_TURN, "")
    }

    /// Apply one streamed fragment. The first fragment opens the turn;
    /// the final one closes it and clears the loading flag.
    pub(crate) fn push_chunk(&mut self, fragment: &str, done: bool) {
        if self.chunks_received == 0 {
            self.raw_message.push_str(&self.author.turn_opening());
        }
        self.chunks_received += 1;
        self.raw_message.push_str(fragment);
        if done {
            self.raw_message.push_str(END_TURN);
            self.is_loading = false;
        }
    }

    pub(crate) fn to_display(&self) -> DisplayMessage {
        DisplayMessage {
            id: self.id.clone(),
            text: self.display_text(),
            author: self.author,
            is_loading: self.is_loading,
        }
    }
}

/// Transcript entry as shown in the chat list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DisplayMessage {
    pub id: MessageId,
    pub text: String,
    pub author: Author,
    pub is_loading: bool,
}
