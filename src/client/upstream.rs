/// HTTP client for the OpenAI-compatible API.
/// Uses reqwest-middleware for retries on transient failures.
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::config::Config;
use crate::errors::ChatError;

pub const EVENT_STREAM: &str = "text/event-stream";

pub struct UpstreamClient {
    client: ClientWithMiddleware,
    authorization: Option<HeaderValue>,
}

impl UpstreamClient {
    pub fn new(timeout: Duration, authorization: Option<String>) -> Result<Self, ChatError> {
        // Base HTTP client
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout) // Covers the whole streamed body
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ChatError::Upstream(format!("failed to build HTTP client: {e}")))?;

        // Retries: 3 times with exponential backoff
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let authorization = authorization
            .map(|v| HeaderValue::from_str(&v))
            .transpose()
            .map_err(|_| ChatError::Upstream("API key contains invalid header characters".into()))?
            .map(|mut v| {
                v.set_sensitive(true);
                v
            });

        Ok(Self {
            client,
            authorization,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ChatError> {
        Self::new(Duration::from_secs(cfg.timeout_secs), cfg.authorization())
    }

    fn headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        if let Some(auth) = &self.authorization {
            headers.insert(AUTHORIZATION, auth.clone());
        }
        headers
    }

    /// POST a JSON body. A non-2xx status becomes [`ChatError::UpstreamStatus`];
    /// the body of a successful response is left unread for the caller.
    pub async fn post_json<T: Serialize>(
        &self,
        url: &str,
        body: &T,
        stream: bool,
    ) -> Result<reqwest::Response, ChatError> {
        let payload = serde_json::to_vec(body)?;
        let accept = if stream { EVENT_STREAM } else { "application/json" };

        let resp = self
            .client
            .post(url)
            .headers(self.headers(accept))
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                // reqwest-middleware errors are compound, but to_string() gives details
                tracing::warn!("Upstream request failed after retries: {}", e);
                ChatError::from(e)
            })?;

        check_status(resp).await
    }

    /// GET and decode a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ChatError> {
        let resp = self
            .client
            .get(url)
            .headers(self.headers("application/json"))
            .send()
            .await?;

        let resp = check_status(resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    tracing::warn!(status = status.as_u16(), "upstream rejected request");
    Err(ChatError::UpstreamStatus {
        status: status.as_u16(),
        body,
    })
}
