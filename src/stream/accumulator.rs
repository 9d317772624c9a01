//! Folds classified deltas into the visible assistant message.

use tracing::debug;

use super::reassembler::DeltaChunk;
use crate::errors::ChatError;
use crate::models::message::ChatMessage;

/// What `on_chunk` did to the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorUpdate {
    /// Nothing to show yet (or the terminal chunk).
    Skipped,
    /// The assistant message was appended; the loading state can end.
    Created,
    /// The existing assistant message now holds the latest text.
    Updated,
}

/// Sink for one assistant turn, appending to a session's message list.
pub struct MessageAccumulator<'a> {
    messages: &'a mut Vec<ChatMessage>,
    /// Position of this turn's assistant message, once created.
    index: Option<usize>,
    /// Text of every chunk applied so far, markers included.
    text: String,
}

impl<'a> MessageAccumulator<'a> {
    pub fn new(messages: &'a mut Vec<ChatMessage>) -> Self {
        Self {
            messages,
            index: None,
            text: String::new(),
        }
    }

    /// Apply one chunk. The message content is replaced with the text of
    /// every chunk applied up to and including this one.
    pub fn on_chunk(&mut self, chunk: &DeltaChunk) -> AccumulatorUpdate {
        if chunk.is_terminal() {
            return AccumulatorUpdate::Skipped;
        }
        self.text.push_str(&chunk.text);

        match self.index {
            Some(idx) => {
                let content = &mut self.messages[idx].content;
                content.clear();
                content.push_str(&self.text);
                AccumulatorUpdate::Updated
            }
            None if !chunk.text.trim().is_empty() => {
                self.messages.push(ChatMessage::assistant(self.text.as_str()));
                self.index = Some(self.messages.len() - 1);
                debug!("assistant message created on first non-empty delta");
                AccumulatorUpdate::Created
            }
            None => AccumulatorUpdate::Skipped,
        }
    }

    /// Text applied so far, whether or not the message exists yet.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the assistant message exists yet.
    pub fn header_received(&self) -> bool {
        self.index.is_some()
    }

    pub fn message(&self) -> Option<&ChatMessage> {
        self.index.map(|idx| &self.messages[idx])
    }

    /// Append a complete assistant message obtained some other way (the
    /// non-streaming fallback). Ignored if the turn already has one.
    pub fn adopt(&mut self, content: &str) -> AccumulatorUpdate {
        if self.index.is_some() {
            return AccumulatorUpdate::Skipped;
        }
        self.messages.push(ChatMessage::assistant(content));
        self.index = Some(self.messages.len() - 1);
        AccumulatorUpdate::Created
    }

    /// End of the turn. A stream that never produced visible text is an
    /// empty response.
    pub fn on_stream_end(&self) -> Result<&ChatMessage, ChatError> {
        self.message().ok_or(ChatError::EmptyResponse)
    }
}
