//! One chat session: history, request shaping, and the streaming read loop.
//!
//! The read loop pulls one body chunk at a time, feeds it to a
//! [`StreamReassembler`] and drains every resulting delta into a
//! [`MessageAccumulator`] before awaiting the next chunk.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::client::upstream::UpstreamClient;
use crate::config::Config;
use crate::errors::ChatError;
use crate::models::completion::{
    clamp_max_tokens, select_model, ChatCompletionRequest, ChatCompletionResponse, ModelInfo,
    ModelList,
};
use crate::models::message::ChatMessage;
use crate::stream::accumulator::{AccumulatorUpdate, MessageAccumulator};
use crate::stream::reassembler::{DeltaChunk, StreamReassembler};

pub const NO_RESPONSE_TEXT: &str = "No response from the assistant";

/// Progress report handed to the caller while a turn runs.
#[derive(Debug)]
pub enum TurnEvent<'a> {
    /// A delta was decoded and applied.
    Delta {
        chunk: &'a DeltaChunk,
        update: AccumulatorUpdate,
        message: Option<&'a ChatMessage>,
    },
    /// The assistant message came from parsing the body as one JSON document.
    Fallback { message: &'a ChatMessage },
}

/// Where the assistant message of a turn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Stream,
    /// The body failed part way; the message holds what arrived before.
    StreamTruncated,
    JsonFallback,
    NonStreaming,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: ChatMessage,
    pub source: ResponseSource,
    /// Frames that produced a delta.
    pub frames: u32,
    /// Frames dropped as unparseable.
    pub dropped_frames: u32,
}

pub struct ChatSession {
    client: UpstreamClient,
    config: Config,
    model: String,
    max_tokens: u32,
    system_message: Option<String>,
    stream: bool,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(config: Config) -> Result<Self, ChatError> {
        let client = UpstreamClient::from_config(&config)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: Config, client: UpstreamClient) -> Self {
        Self {
            client,
            model: config.default_model.clone(),
            max_tokens: config.max_tokens,
            system_message: config.system_message.clone(),
            stream: true,
            messages: Vec::new(),
            config,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.max_tokens = clamp_max_tokens(max_tokens);
    }

    pub fn set_system_message(&mut self, system_message: Option<String>) {
        self.system_message = system_message;
    }

    pub fn set_streaming(&mut self, stream: bool) {
        self.stream = stream;
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        let list: ModelList = self.client.get_json(&self.config.endpoint("models")).await?;
        Ok(list.data)
    }

    /// Settle on a model the server actually lists. Listing failures keep
    /// the current choice.
    pub async fn resolve_model(&mut self) -> &str {
        match self.list_models().await {
            Ok(models) => {
                let chosen = select_model(&models, &self.model, &self.config.default_model);
                if chosen != self.model {
                    info!(requested = %self.model, chosen = %chosen, "model not listed, switching");
                }
                self.model = chosen;
            }
            Err(e) => warn!("could not list models, keeping '{}': {}", self.model, e),
        }
        &self.model
    }

    /// Run one turn: append the user message, send the history, and fold
    /// the response into an assistant message.
    pub async fn send<F>(&mut self, content: &str, observer: F) -> Result<TurnOutcome, ChatError>
    where
        F: FnMut(TurnEvent<'_>),
    {
        self.messages.push(ChatMessage::user(content));

        let request = ChatCompletionRequest::from_history(
            self.model.clone(),
            &self.messages,
            self.system_message.as_deref(),
            self.max_tokens,
            self.stream,
        );
        let url = self.config.endpoint("chat/completions");
        info!(
            model = %request.model,
            messages = request.messages.len(),
            stream = self.stream,
            "sending chat completion"
        );

        let response = self.client.post_json(&url, &request, self.stream).await?;

        if !self.stream {
            let body = response
                .bytes()
                .await
                .map_err(|e| ChatError::Transport(e.to_string()))?;
            return read_whole(&body, &mut self.messages);
        }

        drive_stream(response.bytes_stream(), &mut self.messages, observer).await
    }
}

/// The streaming read loop. Generic over the byte source so it can be
/// driven without a socket.
pub async fn drive_stream<S, E, F>(
    body: S,
    messages: &mut Vec<ChatMessage>,
    mut observer: F,
) -> Result<TurnOutcome, ChatError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    F: FnMut(TurnEvent<'_>),
{
    futures::pin_mut!(body);

    let mut reassembler = StreamReassembler::new();
    let mut accumulator = MessageAccumulator::new(messages);
    // Kept for the non-streaming fallback until the message exists
    let mut raw: Vec<u8> = Vec::new();
    let mut transport_error: Option<String> = None;

    while let Some(next) = body.next().await {
        match next {
            Ok(bytes) => {
                if !accumulator.header_received() {
                    raw.extend_from_slice(&bytes);
                }
                for chunk in reassembler.feed(&bytes) {
                    let update = accumulator.on_chunk(&chunk);
                    observer(TurnEvent::Delta {
                        chunk: &chunk,
                        update,
                        message: accumulator.message(),
                    });
                }
                if accumulator.header_received() && !raw.is_empty() {
                    raw = Vec::new();
                }
                if reassembler.is_done() {
                    break;
                }
            }
            Err(e) => {
                warn!("Error reading stream: {}", e);
                transport_error = Some(e.to_string());
                break;
            }
        }
    }

    for chunk in reassembler.finish() {
        let update = accumulator.on_chunk(&chunk);
        observer(TurnEvent::Delta {
            chunk: &chunk,
            update,
            message: accumulator.message(),
        });
    }

    let source = match (transport_error, accumulator.header_received()) {
        (None, true) => ResponseSource::Stream,
        (Some(err), true) => {
            warn!("stream interrupted ({}); keeping partial message", err);
            ResponseSource::StreamTruncated
        }
        (err, false) => match parse_completion_content(&raw) {
            Some(content) => {
                info!("no streamed content; using body as a non-streamed completion");
                accumulator.adopt(&content);
                if let Some(message) = accumulator.message() {
                    observer(TurnEvent::Fallback { message });
                }
                ResponseSource::JsonFallback
            }
            None => {
                return Err(match err {
                    Some(e) => ChatError::InvalidResponse(e),
                    None => ChatError::EmptyResponse,
                })
            }
        },
    };

    let message = accumulator.on_stream_end()?.clone();
    debug!(
        frames = reassembler.frame_count(),
        dropped = reassembler.dropped_frames(),
        len = message.content.len(),
        "turn complete"
    );

    Ok(TurnOutcome {
        message,
        source,
        frames: reassembler.frame_count(),
        dropped_frames: reassembler.dropped_frames(),
    })
}

/// Handle a `stream: false` response body.
fn read_whole(body: &[u8], messages: &mut Vec<ChatMessage>) -> Result<TurnOutcome, ChatError> {
    let response: ChatCompletionResponse = serde_json::from_slice(body)?;
    let content = response.content().unwrap_or(NO_RESPONSE_TEXT);

    let message = ChatMessage::assistant(content);
    messages.push(message.clone());

    Ok(TurnOutcome {
        message,
        source: ResponseSource::NonStreaming,
        frames: 0,
        dropped_frames: 0,
    })
}

/// Content of a complete `{ choices: [ { message: { content } } ] }` body.
fn parse_completion_content(raw: &[u8]) -> Option<String> {
    let response: ChatCompletionResponse = serde_json::from_slice(raw).ok()?;
    response.content().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Role;
    use crate::stream::reassembler::DeltaMode;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn body(parts: Vec<Result<&'static str, &'static str>>) -> impl Stream<Item = Result<Bytes, String>> {
        futures::stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| Bytes::from_static(s.as_bytes())).map_err(str::to_string))
                .collect::<Vec<_>>(),
        )
    }

    fn leak(s: String) -> &'static str {
        Box::leak(s.into_boxed_str())
    }

    #[tokio::test]
    async fn test_streamed_turn() {
        let input = leak([frame("<think>"), frame("hm"), frame("</think>"), frame("Hi")].concat() + "data: [DONE]\n\n");
        let (a, b) = input.split_at(17);

        let mut messages = vec![ChatMessage::user("hello")];
        let mut modes = Vec::new();
        let outcome = drive_stream(body(vec![Ok(a), Ok(b)]), &mut messages, |ev| {
            if let TurnEvent::Delta { chunk, .. } = ev {
                modes.push(chunk.mode);
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.source, ResponseSource::Stream);
        assert_eq!(outcome.message.content, "<think>hm</think>Hi");
        assert_eq!(outcome.frames, 4);
        assert_eq!(
            modes,
            vec![
                DeltaMode::ThinkingStart,
                DeltaMode::ThinkingChunk,
                DeltaMode::ThinkingEnd,
                DeltaMode::AnswerChunk,
                DeltaMode::Empty,
            ]
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_observer_sees_full_text_on_every_update() {
        let input = leak([frame("a"), frame("b"), frame("c")].concat());
        let mut seen = Vec::new();
        let mut messages = Vec::new();
        drive_stream(body(vec![Ok(input)]), &mut messages, |ev| {
            if let TurnEvent::Delta {
                message: Some(m), ..
            } = ev
            {
                seen.push(m.content.clone());
            }
        })
        .await
        .unwrap();

        // The message is created once content exists and then follows the
        // reconstruction; the terminal chunk reports the final state again.
        assert_eq!(seen, vec!["a", "ab", "abc", "abc"]);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_partial_message() {
        let first = leak(frame("partial"));
        let mut messages = Vec::new();
        let outcome = drive_stream(body(vec![Ok(first), Err("connection reset")]), &mut messages, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.source, ResponseSource::StreamTruncated);
        assert_eq!(outcome.message.content, "partial");
    }

    #[tokio::test]
    async fn test_transport_error_without_content_fails() {
        let mut messages = Vec::new();
        let err = drive_stream(body(vec![Ok("data: {\"cho"), Err("reset")]), &mut messages, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::InvalidResponse(ref e) if e == "reset"));
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_json_body_falls_back_to_non_streamed_content() {
        let json = r#"{"choices":[{"message":{"content":"whole answer"}}]}"#;
        let mut messages = Vec::new();
        let mut fallback_seen = false;
        let outcome = drive_stream(body(vec![Ok(json)]), &mut messages, |ev| {
            if matches!(ev, TurnEvent::Fallback { .. }) {
                fallback_seen = true;
            }
        })
        .await
        .unwrap();

        assert!(fallback_seen);
        assert_eq!(outcome.source, ResponseSource::JsonFallback);
        assert_eq!(messages[0].content, "whole answer");
    }

    #[tokio::test]
    async fn test_done_only_is_empty_response() {
        let mut messages = Vec::new();
        let err = drive_stream(body(vec![Ok("data: [DONE]\n\n")]), &mut messages, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyResponse));
        assert!(messages.is_empty());
    }

    #[test]
    fn test_read_whole_defaults_when_content_missing() {
        let mut messages = Vec::new();
        let outcome = read_whole(br#"{"choices":[]}"#, &mut messages).unwrap();
        assert_eq!(outcome.message.content, NO_RESPONSE_TEXT);
        assert_eq!(outcome.source, ResponseSource::NonStreaming);

        assert!(read_whole(b"not json", &mut messages).is_err());
    }
}
