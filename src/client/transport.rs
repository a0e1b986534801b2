//! Upstream transport.
//!
//! [`Transport`] performs exactly one call to the completions endpoint and
//! maps the outcome into [`MuninnError`]. It never retries; that is the
//! caller's job. [`Connector`] opens the network session a transport runs
//! on and is invoked once per `start()`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, error};

use crate::telemetry;
use crate::types::{CompletionRequest, CompletionResponse, Usage};
use crate::{MuninnError, Result};

/// Default upstream base URL.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("muninn/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body written to the log.
const ERROR_BODY_LOG_LIMIT: usize = 500;

/// A successful completion, reduced to what callers consume.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Model the upstream reports having used.
    pub model: String,
    pub usage: Usage,
}

impl Completion {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            usage: Usage::default(),
        }
    }

    /// Approximate completion size in tokens.
    ///
    /// Uses the upstream's `completion_tokens` when reported, otherwise the
    /// whitespace-delimited word count of the text.
    pub fn approx_tokens(&self) -> u32 {
        self.usage.completion_tokens.unwrap_or_else(|| {
            u32::try_from(self.text.split_whitespace().count()).unwrap_or(u32::MAX)
        })
    }

    /// Reduce a response body to its first choice.
    ///
    /// Absent, null, or empty content is [`MuninnError::EmptyResponse`].
    pub fn from_response(response: CompletionResponse) -> Result<Self> {
        let text = response
            .first_choice_text()
            .filter(|t| !t.is_empty())
            .ok_or(MuninnError::EmptyResponse)?
            .to_string();
        Ok(Self {
            text,
            model: response.model,
            usage: response.usage,
        })
    }
}

/// One call to the completions endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Opens the session transports run on.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn Transport>>;
}

/// Connector for the real HTTP API.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    api_key: String,
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl HttpConnector {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout,
            user_agent: user_agent.into(),
        }
    }
}

impl Connector for HttpConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| MuninnError::Configuration("API key is not a valid header value".into()))?;
        headers.insert(header::AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .build()
            .map_err(|e| MuninnError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Arc::new(HttpTransport {
            http,
            endpoint: format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
            timeout: self.timeout,
        }))
    }
}

/// Transport over a `reqwest` session.
pub struct HttpTransport {
    http: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    fn map_send_error(&self, e: reqwest::Error) -> MuninnError {
        if e.is_timeout() {
            MuninnError::Timeout(self.timeout)
        } else {
            MuninnError::Http(e.to_string())
        }
    }

    async fn post(&self, request: &CompletionRequest) -> Result<Completion> {
        debug!(
            model = request.model(),
            messages = request.messages().len(),
            temperature = request.sampling_temperature(),
            max_tokens = request.max_output_tokens(),
            "sending completion request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".into());
            error!(
                status = status.as_u16(),
                body = truncate(&body, ERROR_BODY_LOG_LIMIT),
                "API returned error status"
            );
            return Err(MuninnError::Api {
                status: status.as_u16(),
                message: truncate(&body, ERROR_BODY_LOG_LIMIT).to_string(),
                retry_after: if status.as_u16() == 429 { retry_after } else { None },
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        let parsed: CompletionResponse = serde_json::from_slice(&bytes).map_err(|e| {
            error!(error = %e, "response validation failed");
            MuninnError::InvalidResponse(e.to_string())
        })?;

        let completion = Completion::from_response(parsed)?;
        debug!(
            model = %completion.model,
            response_length = completion.text.len(),
            "completion request succeeded"
        );
        Ok(completion)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
        let start = Instant::now();
        let result = self.post(request).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "model" => request.model().to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "model" => request.model().to_owned(),
        )
        .record(start.elapsed().as_secs_f64());

        result
    }
}

/// Seconds-form `Retry-After`. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
