use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The request never got a response (connect failure, retries exhausted).
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// Reading the response body failed part way through.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty response received from API")]
    EmptyResponse,

    #[error("failed to process response: {0}")]
    InvalidResponse(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ChatError::Upstream(_) | ChatError::UpstreamStatus { .. } => {
                "Failed to send message. Please try again."
            }
            ChatError::EmptyResponse => "Empty response received from API",
            ChatError::Transport(_) | ChatError::InvalidResponse(_) | ChatError::Json(_) => {
                "Failed to parse stream or JSON response"
            }
        }
    }
}

impl From<reqwest_middleware::Error> for ChatError {
    fn from(e: reqwest_middleware::Error) -> Self {
        ChatError::Upstream(e.to_string())
    }
}
