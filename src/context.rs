//! Conversation context extraction.
//!
//! Turns an incoming message plus whatever history the caller has into a
//! [`ChatContext`]: history is filtered by age, author and mentions,
//! windowed to the newest `context_window_size` entries, and trimmed from
//! the oldest end until the whole context fits `max_context_length`
//! characters.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{AssistantSettings, Settings};
use crate::{MuninnError, Result};

/// History older than this is never included.
pub const MAX_HISTORY_AGE_HOURS: i64 = 24;

/// Kind of chat, derived from the chat id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    /// Channels and supergroups (`-100…` ids).
    Channel,
}

impl ChatKind {
    pub fn from_chat_id(chat_id: i64) -> Self {
        if chat_id > 0 {
            ChatKind::Private
        } else if is_channel_id(chat_id) {
            ChatKind::Channel
        } else {
            ChatKind::Group
        }
    }
}

/// Whether `chat_id` belongs to a channel or supergroup.
pub fn is_channel_id(chat_id: i64) -> bool {
    chat_id.to_string().starts_with("-100")
}

/// A previous message offered as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub message_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub text: String,
    pub date: DateTime<Utc>,
}

/// Everything the assistant needs to answer one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: i64,
    pub message_text: String,
    /// Filtered history, oldest first.
    pub history: Vec<HistoryMessage>,
    pub chat_kind: ChatKind,
    pub created_at: DateTime<Utc>,
}

impl ChatContext {
    /// Characters in the message plus all history texts.
    pub fn text_len(&self) -> usize {
        self.message_text.chars().count()
            + self
                .history
                .iter()
                .map(|m| m.text.chars().count())
                .sum::<usize>()
    }
}

/// Builds [`ChatContext`]s according to the assistant settings.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    settings: AssistantSettings,
    bot_username: String,
    target_bot_username: String,
}

impl ContextBuilder {
    pub fn new(
        settings: AssistantSettings,
        bot_username: impl Into<String>,
        target_bot_username: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            bot_username: bot_username.into(),
            target_bot_username: target_bot_username.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.assistant.clone(),
            settings.bot.username.clone(),
            settings.bot.target_bot_username.clone(),
        )
    }

    /// Build a context for `message_text`, filtering `history` as of `now`.
    pub fn extract(
        &self,
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        message_text: &str,
        history: Vec<HistoryMessage>,
        now: DateTime<Utc>,
    ) -> Result<ChatContext> {
        let message_text = message_text.trim();
        if message_text.is_empty() {
            return Err(MuninnError::InvalidInput(
                "message text cannot be empty".into(),
            ));
        }

        let mut context = ChatContext {
            chat_id,
            user_id,
            message_id,
            message_text: message_text.to_string(),
            history: self.filter_history(history, now),
            chat_kind: ChatKind::from_chat_id(chat_id),
            created_at: now,
        };

        while context.text_len() > self.settings.max_context_length && !context.history.is_empty()
        {
            context.history.remove(0);
        }

        debug!(
            chat_id,
            user_id,
            history = context.history.len(),
            "context extracted"
        );
        Ok(context)
    }

    /// Drop unusable history and keep the newest window, oldest first.
    pub fn filter_history(
        &self,
        history: Vec<HistoryMessage>,
        now: DateTime<Utc>,
    ) -> Vec<HistoryMessage> {
        if !self.settings.include_history {
            return Vec::new();
        }

        let max_age = Duration::hours(MAX_HISTORY_AGE_HOURS);
        let mut kept: Vec<HistoryMessage> = history
            .into_iter()
            .filter(|m| !m.text.trim().is_empty())
            .filter(|m| now.signed_duration_since(m.date) <= max_age)
            .filter(|m| self.settings.include_target_bot_responses || !self.is_target_bot_message(m))
            .filter(|m| self.settings.include_mentions || !self.mentions_bot(&m.text))
            .collect();

        kept.sort_by_key(|m| m.date);
        let window = self.settings.context_window_size;
        if kept.len() > window {
            kept.drain(..kept.len() - window);
        }
        kept
    }

    /// Check the context is usable as-is.
    pub fn validate(&self, context: &ChatContext) -> Result<()> {
        if context.message_text.trim().is_empty() {
            return Err(MuninnError::InvalidInput("context has no message text".into()));
        }
        if context.chat_id == 0 || context.user_id == 0 {
            return Err(MuninnError::InvalidInput("context is missing chat or user id".into()));
        }
        let length = context.text_len();
        if length > self.settings.max_context_length {
            warn!(
                length,
                max = self.settings.max_context_length,
                "context exceeds maximum length"
            );
            return Err(MuninnError::InvalidInput(format!(
                "context is {length} characters, limit is {}",
                self.settings.max_context_length
            )));
        }
        Ok(())
    }

    fn is_target_bot_message(&self, message: &HistoryMessage) -> bool {
        let target = self.target_bot_username.trim_start_matches('@');
        if message
            .username
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(target))
        {
            return true;
        }
        message
            .text
            .to_lowercase()
            .contains(&self.target_bot_username.to_lowercase())
    }

    fn mentions_bot(&self, text: &str) -> bool {
        text.to_lowercase()
            .contains(&self.bot_username.to_lowercase())
    }
}
