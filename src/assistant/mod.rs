//! Assistant service.
//!
//! Builds the prompt for a [`ChatContext`], sends it through the shared
//! [`CompletionClient`], and parses the answer into an [`AssistantReply`].

pub mod parse;

pub use parse::{AssistantReply, parse_reply};

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::Settings;
use crate::context::ChatContext;
use crate::types::ChatMessage;
use crate::{CompletionClient, MuninnError, Result};

/// Generation parameters for assistant requests.
#[derive(Debug, Clone)]
pub struct AssistantOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub use_cache: bool,
    /// History entries rendered into the prompt.
    pub context_window_size: usize,
}

impl AssistantOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            temperature: settings.openrouter.temperature,
            max_tokens: settings.openrouter.max_tokens,
            use_cache: settings.openrouter.enable_caching,
            context_window_size: settings.assistant.context_window_size,
        }
    }
}

pub struct Assistant {
    client: Arc<CompletionClient>,
    instruction: String,
    options: AssistantOptions,
}

impl Assistant {
    /// Fails with [`MuninnError::Configuration`] if `instruction` is blank.
    pub fn new(
        client: Arc<CompletionClient>,
        instruction: impl Into<String>,
        options: AssistantOptions,
    ) -> Result<Self> {
        let instruction = instruction.into().trim().to_string();
        if instruction.is_empty() {
            return Err(MuninnError::Configuration("AI instruction is empty".into()));
        }
        info!(
            model = %client.config().model,
            instruction_length = instruction.len(),
            "assistant initialised"
        );
        Ok(Self {
            client,
            instruction,
            options,
        })
    }

    pub fn from_settings(client: Arc<CompletionClient>, settings: &Settings) -> Result<Self> {
        Self::new(
            client,
            settings.instruction.clone(),
            AssistantOptions::from_settings(settings),
        )
    }

    /// Ready once the underlying client has been started.
    pub fn is_ready(&self) -> bool {
        self.client.is_started()
    }

    /// Messages sent upstream for `context`.
    ///
    /// Instruction, a context summary, up to `context_window_size` history
    /// lines, then the user's message.
    pub fn build_prompt(&self, context: &ChatContext) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.history.len() + 3);
        messages.push(ChatMessage::system(self.instruction.clone()));
        messages.push(ChatMessage::system(format!(
            "Current context: Chat ID {}, User ID {}, Message: {}",
            context.chat_id, context.user_id, context.message_text
        )));

        let skip = context
            .history
            .len()
            .saturating_sub(self.options.context_window_size);
        for entry in &context.history[skip..] {
            messages.push(ChatMessage::user(format!(
                "User {}: {}",
                entry.user_id, entry.text
            )));
        }

        messages.push(ChatMessage::user(context.message_text.clone()));
        messages
    }

    /// Ask the model about `context` and parse the answer.
    pub async fn respond(&self, context: &ChatContext) -> Result<AssistantReply> {
        if context.message_text.trim().is_empty() {
            return Err(MuninnError::InvalidInput(
                "context must contain message text".into(),
            ));
        }

        let messages = self.build_prompt(context);
        debug!(
            chat_id = context.chat_id,
            user_id = context.user_id,
            messages = messages.len(),
            "generating reply"
        );

        let raw = self
            .client
            .complete_messages(
                messages,
                self.options.temperature,
                self.options.max_tokens,
                self.options.use_cache,
            )
            .await
            .inspect_err(|e| {
                error!(chat_id = context.chat_id, error = %e, "failed to generate reply");
            })?;

        let reply = parse_reply(&raw, &self.client.config().model)?;
        info!(
            chat_id = context.chat_id,
            response_length = reply.text.len(),
            commands = reply.commands.len(),
            "reply generated"
        );
        Ok(reply)
    }
}
