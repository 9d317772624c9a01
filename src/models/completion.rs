//! Wire types for the OpenAI-compatible `/chat/completions` and `/models`
//! endpoints.

use serde::{Deserialize, Serialize};

use crate::models::message::{ChatMessage, Role};
use crate::stream::thinking::strip_think_tags;

pub const MIN_MAX_TOKENS: u32 = 1;
pub const MAX_MAX_TOKENS: u32 = 32768;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

pub fn clamp_max_tokens(max_tokens: u32) -> u32 {
    max_tokens.clamp(MIN_MAX_TOKENS, MAX_MAX_TOKENS)
}

// ── Request ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Build a request from session history.
    ///
    /// Reasoning segments are removed from earlier assistant turns and a
    /// non-blank system message is prepended.
    pub fn from_history(
        model: impl Into<String>,
        history: &[ChatMessage],
        system_message: Option<&str>,
        max_tokens: u32,
        stream: bool,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 1);

        if let Some(system) = system_message.map(str::trim).filter(|s| !s.is_empty()) {
            messages.push(ApiMessage {
                role: Role::System,
                content: system.to_string(),
            });
        }

        messages.extend(history.iter().map(|m| ApiMessage {
            role: m.role,
            content: match m.role {
                Role::Assistant => strip_think_tags(&m.content),
                _ => m.content.clone(),
            },
        }));

        Self {
            model: model.into(),
            messages,
            max_tokens: clamp_max_tokens(max_tokens),
            stream,
        }
    }
}

// ── Non-streaming Response ──────────────────────────────────────

/// `{ choices: [ { message: { content } } ] }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// First choice's message content, if present and non-empty.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .filter(|c| !c.is_empty())
    }
}

// ── Models ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ModelInfo {
    /// Falls back to the id when the server sends no name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(self.id.as_str())
    }
}

/// Pick the model to use: the requested one if listed, else the default if
/// listed, else the first listed, else the requested id unchanged.
pub fn select_model(models: &[ModelInfo], requested: &str, default: &str) -> String {
    let listed = |id: &str| models.iter().any(|m| m.id == id);

    if listed(requested) {
        requested.to_string()
    } else if listed(default) {
        default.to_string()
    } else if let Some(first) = models.first() {
        first.id.clone()
    } else {
        requested.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clamp_max_tokens() {
        assert_eq!(clamp_max_tokens(0), 1);
        assert_eq!(clamp_max_tokens(4096), 4096);
        assert_eq!(clamp_max_tokens(100_000), 32768);
    }

    #[test]
    fn test_request_strips_thinking_from_assistant_history() {
        let history = vec![
            ChatMessage::user("what is 2+2? <think>keep me</think>"),
            ChatMessage::assistant("<think>\nadding\n</think>4"),
            ChatMessage::user("and 3+3?"),
        ];
        let req = ChatCompletionRequest::from_history("m", &history, None, 4096, true);

        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].content, "what is 2+2? <think>keep me</think>");
        assert_eq!(req.messages[1].content, "4");
        assert!(req.stream);
    }

    #[test]
    fn test_request_prepends_trimmed_system_message() {
        let history = vec![ChatMessage::user("hi")];
        let req = ChatCompletionRequest::from_history("m", &history, Some("  be brief  "), 0, false);

        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].content, "be brief");
        assert_eq!(req.max_tokens, 1);

        let req = ChatCompletionRequest::from_history("m", &history, Some("   "), 10, false);
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_request_serialization() {
        let req = ChatCompletionRequest::from_history("local-model", &[ChatMessage::user("hi")], None, 64, true);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "local-model",
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 64,
                "stream": true
            })
        );
    }

    #[test]
    fn test_response_content() {
        let resp: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}]}))
                .unwrap();
        assert_eq!(resp.content(), Some("hello"));

        let resp: ChatCompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(resp.content(), None);

        let resp: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": [{"message": {"content": ""}}]})).unwrap();
        assert_eq!(resp.content(), None);
    }

    #[test]
    fn test_model_display_name_falls_back_to_id() {
        let list: ModelList = serde_json::from_value(json!({
            "data": [{"id": "a", "name": "Model A"}, {"id": "b"}]
        }))
        .unwrap();
        assert_eq!(list.data[0].display_name(), "Model A");
        assert_eq!(list.data[1].display_name(), "b");
    }

    #[test]
    fn test_select_model_priority() {
        let models = vec![
            ModelInfo { id: "x".into(), name: None },
            ModelInfo { id: "local-model".into(), name: None },
        ];
        assert_eq!(select_model(&models, "x", "local-model"), "x");
        assert_eq!(select_model(&models, "missing", "local-model"), "local-model");
        assert_eq!(select_model(&models[..1], "missing", "local-model"), "x");
        assert_eq!(select_model(&[], "missing", "local-model"), "missing");
    }
}
