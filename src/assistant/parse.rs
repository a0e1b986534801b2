//! Reply parsing.
//!
//! The model is instructed to answer in a light line-based format:
//!
//! ```text
//! Here are a few options:
//! /search@TargetBot science fiction
//! [Show me something random]
//! <code>Strugatsky</code>
//! ```
//!
//! Lines starting with `/` are commands, `[...]` lines are suggestions,
//! `<code>...</code>` lines are search queries, and everything else is the
//! display text. Each list is deduplicated in order of appearance.

use serde::{Deserialize, Serialize};

use crate::{MuninnError, Result};

/// Longest display text sent to the chat, in characters.
pub const MAX_REPLY_CHARS: usize = 4000;

/// Cap on suggestions and on commands.
pub const MAX_SUGGESTIONS: usize = 6;

/// Display text used when the reply consists only of structured lines.
pub const FALLBACK_TEXT: &str = "Here's what I found for you:";

/// A model reply split into its parts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssistantReply {
    pub text: String,
    pub suggestions: Vec<String>,
    pub commands: Vec<String>,
    pub search_queries: Vec<String>,
    /// Model that produced the reply.
    pub model: String,
}

/// Split a raw completion into an [`AssistantReply`].
///
/// Empty or whitespace-only input is [`MuninnError::InvalidResponse`].
pub fn parse_reply(raw: &str, model: &str) -> Result<AssistantReply> {
    if raw.trim().is_empty() {
        return Err(MuninnError::InvalidResponse("AI response is empty".into()));
    }

    let mut reply = AssistantReply {
        model: model.to_string(),
        ..AssistantReply::default()
    };
    let mut body = Vec::new();

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('/') && !line.starts_with("//") {
            push_unique(&mut reply.commands, line);
        } else if let Some(inner) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            push_unique(&mut reply.suggestions, inner.trim());
        } else if let Some(inner) = line
            .strip_prefix("<code>")
            .and_then(|l| l.strip_suffix("</code>"))
        {
            push_unique(&mut reply.search_queries, inner.trim());
        } else {
            body.push(line);
        }
    }

    reply.commands.truncate(MAX_SUGGESTIONS);
    reply.suggestions.truncate(MAX_SUGGESTIONS);

    let text = sanitize(&body.join("\n"));
    reply.text = if text.is_empty() {
        FALLBACK_TEXT.to_string()
    } else {
        text
    };
    Ok(reply)
}

/// Make text safe to send: no carriage returns or tabs, bounded length.
pub fn sanitize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|&c| c != '\r')
        .map(|c| if c == '\t' { ' ' } else { c })
        .collect();

    let cleaned = match cleaned.char_indices().nth(MAX_REPLY_CHARS) {
        Some((idx, _)) => format!("{}...", &cleaned[..idx]),
        None => cleaned,
    };
    cleaned.trim().to_string()
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !item.is_empty() && !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}
