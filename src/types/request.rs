//! Completion request type

use serde::{Deserialize, Serialize};

use super::message::ChatMessage;
use crate::{MuninnError, Result};

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default completion budget in tokens.
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Accepted temperature range (inclusive).
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
/// Accepted `max_tokens` range (inclusive).
pub const MAX_TOKENS_RANGE: (u32, u32) = (1, 4000);

/// A chat completion request, serialized verbatim as the API body.
///
/// Immutable once built; the builder methods consume and return `self`.
///
/// ```rust
/// # use muninn::{ChatMessage, CompletionRequest};
/// let request = CompletionRequest::new("m", vec![ChatMessage::user("Hello")])
///     .temperature(0.7)
///     .max_tokens(500);
/// assert_eq!(request.messages().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn sampling_temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Check the request shape before anything is dispatched.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(MuninnError::InvalidInput(
                "messages must be a non-empty list".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(MuninnError::InvalidInput("model must not be empty".into()));
        }
        let (lo, hi) = TEMPERATURE_RANGE;
        if !(lo..=hi).contains(&self.temperature) {
            return Err(MuninnError::InvalidInput(format!(
                "temperature {} outside {lo}..={hi}",
                self.temperature
            )));
        }
        let (lo, hi) = MAX_TOKENS_RANGE;
        if !(lo..=hi).contains(&self.max_tokens) {
            return Err(MuninnError::InvalidInput(format!(
                "max_tokens {} outside {lo}..={hi}",
                self.max_tokens
            )));
        }
        Ok(())
    }
}
