//! Mention handling.
//!
//! [`MentionHandler`] decides whether an incoming chat message is addressed
//! to us, runs the assistant on it, and sends the reply (with a keyboard
//! when there are usable commands) through a [`ReplySink`]. Failures are
//! answered with a short notice chosen from the error's kind; raw error
//! text never reaches the chat.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::assistant::Assistant;
use crate::config::Settings;
use crate::context::{ContextBuilder, HistoryMessage, is_channel_id};
use crate::error::ErrorKind;
use crate::keyboard::{KeyboardBuilder, ReplyKeyboard};
use crate::{MuninnError, Result};

/// Sender of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    /// Username without the leading `@`.
    pub username: Option<String>,
}

/// A chat message as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub from: Option<Sender>,
    pub text: Option<String>,
    pub date: DateTime<Utc>,
    /// The message this one replies to, if any.
    pub reply_to: Option<Box<IncomingMessage>>,
}

/// Sends replies back to the chat platform.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Reply to `reply_to` in `chat_id`, optionally attaching a keyboard.
    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to: i64,
        text: &str,
        keyboard: Option<&ReplyKeyboard>,
    ) -> Result<()>;
}

/// What [`MentionHandler::handle`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Answered with an assistant reply.
    Replied { with_keyboard: bool },
    /// Answered `/start` or `/help`.
    Command,
    /// Not for us.
    Ignored(IgnoreReason),
    /// The assistant failed; a notice was sent instead.
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoText,
    /// Private chat, or a channel message that is not a comment.
    UnsupportedChat,
    NotMentioned,
    FromTargetBot,
}

/// Short, non-technical notice shown to users when a request fails.
pub fn user_notice(error: &MuninnError) -> &'static str {
    match error {
        MuninnError::Timeout(_) => "❌ The request timed out. The server is busy, please try again later.",
        MuninnError::Api { status: 429, .. } => "❌ Too many requests. Please wait a moment.",
        _ => match error.kind() {
            ErrorKind::InputValidation => "❌ Invalid request. Please check the command format.",
            ErrorKind::Transient | ErrorKind::Upstream => {
                "❌ The AI could not answer. Try rephrasing your request."
            }
            ErrorKind::NotStarted | ErrorKind::Configuration => {
                "❌ Configuration error. Please contact the administrator."
            }
            ErrorKind::Cancelled | ErrorKind::Internal => {
                "❌ Failed to process the request. Please try again later."
            }
        },
    }
}

pub struct MentionHandler {
    assistant: Assistant,
    contexts: ContextBuilder,
    keyboards: KeyboardBuilder,
    sink: Arc<dyn ReplySink>,
    bot_username: String,
    target_bot_username: String,
    monitor_channel_comments: bool,
}

impl MentionHandler {
    pub fn new(assistant: Assistant, settings: &Settings, sink: Arc<dyn ReplySink>) -> Self {
        info!(
            bot = %settings.bot.username,
            target_bot = %settings.bot.target_bot_username,
            "mention handler initialised"
        );
        Self {
            assistant,
            contexts: ContextBuilder::from_settings(settings),
            keyboards: KeyboardBuilder::from_settings(settings),
            sink,
            bot_username: settings.bot.username.clone(),
            target_bot_username: settings.bot.target_bot_username.clone(),
            monitor_channel_comments: settings.telegram.monitor_channel_comments,
        }
    }

    /// Handle one incoming message.
    ///
    /// Assistant failures are answered with [`user_notice`] and reported
    /// as [`HandleOutcome::Failed`]; only a failure to send is an `Err`.
    pub async fn handle(&self, message: &IncomingMessage) -> Result<HandleOutcome> {
        let Some(text) = message.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(HandleOutcome::Ignored(IgnoreReason::NoText));
        };

        if let Some(reply) = self.command_reply(text) {
            self.sink
                .send_reply(message.chat_id, message.message_id, &reply, None)
                .await?;
            return Ok(HandleOutcome::Command);
        }

        let Some(history) = self.route(message) else {
            debug!(chat_id = message.chat_id, "unsupported chat");
            return Ok(HandleOutcome::Ignored(IgnoreReason::UnsupportedChat));
        };
        if !self.is_bot_mention(message) {
            debug!(chat_id = message.chat_id, "no bot mention");
            return Ok(HandleOutcome::Ignored(IgnoreReason::NotMentioned));
        }
        if self.is_from_target_bot(message) {
            debug!(chat_id = message.chat_id, "message from target bot");
            return Ok(HandleOutcome::Ignored(IgnoreReason::FromTargetBot));
        }

        match self.answer(message, text, history).await {
            Ok((reply_text, keyboard)) => {
                self.sink
                    .send_reply(message.chat_id, message.message_id, &reply_text, keyboard.as_ref())
                    .await?;
                info!(
                    chat_id = message.chat_id,
                    has_buttons = keyboard.is_some(),
                    "response sent"
                );
                Ok(HandleOutcome::Replied {
                    with_keyboard: keyboard.is_some(),
                })
            }
            Err(e) => {
                error!(chat_id = message.chat_id, error = %e, "error handling mention");
                self.sink
                    .send_reply(message.chat_id, message.message_id, user_notice(&e), None)
                    .await?;
                Ok(HandleOutcome::Failed(e.kind()))
            }
        }
    }

    async fn answer(
        &self,
        message: &IncomingMessage,
        text: &str,
        history: Vec<HistoryMessage>,
    ) -> Result<(String, Option<ReplyKeyboard>)> {
        let user_id = message.from.as_ref().map_or(0, |s| s.id);
        let context = self.contexts.extract(
            message.chat_id,
            user_id,
            message.message_id,
            text,
            history,
            Utc::now(),
        )?;
        let reply = self.assistant.respond(&context).await?;
        let keyboard = self
            .keyboards
            .build(&reply)
            .filter(ReplyKeyboard::is_valid_layout);
        Ok((reply.text, keyboard))
    }

    /// History for a supported chat, or `None` if we don't serve it.
    ///
    /// Groups start with no history; channel comments carry the post they
    /// comment on.
    fn route(&self, message: &IncomingMessage) -> Option<Vec<HistoryMessage>> {
        let chat_id = message.chat_id;
        if chat_id >= 0 {
            return None;
        }
        if !is_channel_id(chat_id) {
            return Some(Vec::new());
        }
        if !self.monitor_channel_comments {
            return None;
        }
        let post = message.reply_to.as_deref()?;
        let history = post
            .text
            .as_ref()
            .map(|text| HistoryMessage {
                message_id: post.message_id,
                user_id: post.from.as_ref().map_or(0, |s| s.id),
                username: post.from.as_ref().and_then(|s| s.username.clone()),
                text: text.clone(),
                date: post.date,
            })
            .into_iter()
            .collect();
        Some(history)
    }

    /// The text mentions us, or the message replies to one of ours.
    pub fn is_bot_mention(&self, message: &IncomingMessage) -> bool {
        let Some(text) = message.text.as_deref() else {
            return false;
        };
        if text.to_lowercase().contains(&self.bot_username.to_lowercase()) {
            return true;
        }
        let ours = self.bot_username.trim_start_matches('@');
        message
            .reply_to
            .as_deref()
            .and_then(|r| r.from.as_ref())
            .and_then(|s| s.username.as_deref())
            .is_some_and(|u| u.eq_ignore_ascii_case(ours))
    }

    /// Guards against answering the target bot and looping.
    pub fn is_from_target_bot(&self, message: &IncomingMessage) -> bool {
        let target = self.target_bot_username.trim_start_matches('@');
        message
            .from
            .as_ref()
            .and_then(|s| s.username.as_deref())
            .is_some_and(|u| u.eq_ignore_ascii_case(target))
    }

    /// Fixed answers for `/start` and `/help`, optionally `@`-addressed to us.
    fn command_reply(&self, text: &str) -> Option<String> {
        let head = text.split_whitespace().next()?;
        let (command, addressee) = match head.split_once('@') {
            Some((c, a)) => (c, Some(a)),
            None => (head, None),
        };
        if let Some(addressee) = addressee
            && !addressee.eq_ignore_ascii_case(self.bot_username.trim_start_matches('@'))
        {
            return None;
        }

        let bot = &self.bot_username;
        let target = &self.target_bot_username;
        match command {
            "/start" => Some(format!(
                "👋 Hi! I'm {bot}, a helper for {target}. \
                 Mention me in a message and I'll help you phrase your request!"
            )),
            "/help" => Some(format!(
                "💡 How to use {bot}:\n\n\
                 1. Mention me in a message: {bot} find a book\n\
                 2. I analyse your request\n\
                 3. I suggest commands for {target}\n\
                 4. Pick the command you need from the buttons\n\n\
                 Example: '{bot} recommend some science fiction'"
            )),
            _ => None,
        }
    }
}
