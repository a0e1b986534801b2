//! Reply keyboard layout.
//!
//! Commands and suggestions from an [`AssistantReply`] become buttons that
//! address the target bot. Anything that does not mention the target bot
//! is dropped; the rest is grouped by category, one category per block of
//! rows, at most `buttons_per_row` per row.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assistant::AssistantReply;
use crate::config::Settings;

/// Most rows a keyboard may have.
pub const MAX_ROWS: usize = 5;

/// Most buttons a row may have.
pub const MAX_BUTTONS_PER_ROW: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
}

/// Bot API `ReplyKeyboardMarkup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyKeyboard {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
    pub one_time_keyboard: bool,
    pub selective: bool,
}

impl ReplyKeyboard {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            keyboard: rows
                .into_iter()
                .map(|row| row.into_iter().map(|text| KeyboardButton { text }).collect())
                .collect(),
            resize_keyboard: true,
            one_time_keyboard: false,
            selective: false,
        }
    }

    pub fn button_count(&self) -> usize {
        self.keyboard.iter().map(Vec::len).sum()
    }

    /// Whether the layout fits [`MAX_ROWS`] and [`MAX_BUTTONS_PER_ROW`].
    pub fn is_valid_layout(&self) -> bool {
        if self.keyboard.is_empty() {
            return false;
        }
        if self.keyboard.len() > MAX_ROWS {
            warn!(rows = self.keyboard.len(), max = MAX_ROWS, "too many keyboard rows");
            return false;
        }
        if let Some(row) = self.keyboard.iter().find(|r| r.len() > MAX_BUTTONS_PER_ROW) {
            warn!(
                buttons = row.len(),
                max = MAX_BUTTONS_PER_ROW,
                "too many buttons in row"
            );
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Command,
    Reply,
    Search,
}

impl Category {
    fn of(button: &str) -> Self {
        if button.starts_with('/') {
            Category::Command
        } else if button.contains('[') && button.contains(']') {
            Category::Reply
        } else if button.contains("<code>") && button.contains("</code>") {
            Category::Search
        } else {
            Category::Command
        }
    }
}

/// Lays out reply keyboards for the target bot.
#[derive(Debug, Clone)]
pub struct KeyboardBuilder {
    target_bot_username: String,
    buttons_per_row: usize,
    max_buttons: usize,
}

impl KeyboardBuilder {
    pub fn new(target_bot_username: impl Into<String>, buttons_per_row: usize, max_buttons: usize) -> Self {
        Self {
            target_bot_username: target_bot_username.into(),
            buttons_per_row: buttons_per_row.max(1),
            max_buttons,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.bot.target_bot_username.clone(),
            settings.buttons.buttons_per_row,
            settings.buttons.max_buttons,
        )
    }

    /// Keyboard for `reply`, or `None` if nothing survives validation.
    pub fn build(&self, reply: &AssistantReply) -> Option<ReplyKeyboard> {
        let candidates = reply.commands.iter().chain(&reply.suggestions);
        let valid = self.valid_commands(candidates);
        if valid.is_empty() {
            debug!("no valid commands for keyboard");
            return None;
        }

        let rows = self.grid(valid);
        debug!(rows = rows.len(), "generated reply keyboard");
        Some(ReplyKeyboard::from_rows(rows))
    }

    /// Whether `command` addresses the target bot.
    ///
    /// Accepts `/cmd@Target ...` and `@Target ...` forms.
    pub fn is_valid_command(&self, command: &str) -> bool {
        if !command.contains(&self.target_bot_username) {
            return false;
        }
        (command.starts_with('/') && command.contains('@'))
            || command.starts_with(&self.target_bot_username)
    }

    fn valid_commands<'a>(&self, commands: impl Iterator<Item = &'a String>) -> Vec<String> {
        commands
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .filter(|c| {
                let ok = self.is_valid_command(c);
                if !ok {
                    debug!(command = c, "dropping command not addressed to target bot");
                }
                ok
            })
            .take(self.max_buttons)
            .map(str::to_string)
            .collect()
    }

    fn grid(&self, commands: Vec<String>) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        for category in [Category::Command, Category::Reply, Category::Search] {
            let group: Vec<String> = commands
                .iter()
                .filter(|c| Category::of(c) == category)
                .cloned()
                .collect();
            rows.extend(group.chunks(self.buttons_per_row).map(<[String]>::to_vec));
        }
        rows
    }
}
