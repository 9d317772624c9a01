use serde::Deserialize;

use crate::models::completion::{clamp_max_tokens, DEFAULT_MAX_TOKENS};

pub const DEFAULT_API_URL: &str = "http://localhost:1234/v1";
pub const DEFAULT_MODEL: &str = "local-model";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible API, without trailing slash.
    pub api_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    /// Already clamped to the accepted range.
    pub max_tokens: u32,
    pub system_message: Option<String>,
    /// Total timeout per HTTP request, streaming included.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            api_key: None,
            default_model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system_message: None,
            timeout_secs: 300,
        }
    }
}

impl Config {
    /// Value for the `Authorization` header. A bare key gets a `Bearer`
    /// scheme; a value that already names a scheme is sent as-is.
    pub fn authorization(&self) -> Option<String> {
        let key = self.api_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        if key.contains(' ') {
            Some(key.to_string())
        } else {
            Some(format!("Bearer {key}"))
        }
    }

    /// Join an endpoint path onto the API base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let api_key = std::env::var("LM_STUDIO_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());

    if api_key.is_none() {
        let env_mode = std::env::var("LMCHAT_ENV").unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!("LM_STUDIO_API_KEY is required when LMCHAT_ENV=production");
        }
        tracing::debug!("LM_STUDIO_API_KEY is not set; requests go out without Authorization");
    }

    Ok(Config {
        api_url: std::env::var("LM_STUDIO_API_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.into()),
        api_key,
        default_model: std::env::var("LMCHAT_DEFAULT_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.into()),
        max_tokens: std::env::var("LMCHAT_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(clamp_max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        system_message: std::env::var("LMCHAT_SYSTEM_MESSAGE")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        timeout_secs: std::env::var("LMCHAT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_header() {
        let mut cfg = Config::default();
        assert_eq!(cfg.authorization(), None);

        cfg.api_key = Some("sk-local".into());
        assert_eq!(cfg.authorization().as_deref(), Some("Bearer sk-local"));

        cfg.api_key = Some("Basic dXNlcjpwYXNz".into());
        assert_eq!(cfg.authorization().as_deref(), Some("Basic dXNlcjpwYXNz"));

        cfg.api_key = Some("   ".into());
        assert_eq!(cfg.authorization(), None);
    }

    #[test]
    fn test_endpoint_joining() {
        let mut cfg = Config::default();
        assert_eq!(cfg.endpoint("/chat/completions"), "http://localhost:1234/v1/chat/completions");

        cfg.api_url = "https://api.example.com/v1/".into();
        assert_eq!(cfg.endpoint("models"), "https://api.example.com/v1/models");
    }
}
