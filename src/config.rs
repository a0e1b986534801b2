//! Configuration loading.
//!
//! Settings come from a TOML file, resolved in this order:
//! 1. an explicit path (the `--config` flag)
//! 2. `~/.muninn/config.toml` (user)
//! 3. `/etc/muninn/config.toml` (system)
//!
//! Environment variables then override individual keys, and the merged
//! result is validated. Finally the AI instruction file named by
//! `assistant.instruction_path` is read; relative paths resolve against the
//! config file's directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::client::{ClientConfig, DEFAULT_BASE_URL, RetryConfig};
use crate::types::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, MAX_TOKENS_RANGE, TEMPERATURE_RANGE};
use crate::{MuninnError, Result};

/// Accepted `logging.level` values.
pub const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// Validated application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bot: BotSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub openrouter: OpenRouterSettings,
    #[serde(default, alias = "ai_assistant")]
    pub assistant: AssistantSettings,
    #[serde(default)]
    pub buttons: ButtonSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Contents of the AI instruction file, filled in by [`Settings::load`].
    #[serde(skip)]
    pub instruction: String,
}

/// Bot identity.
#[derive(Debug, Clone, Deserialize)]
pub struct BotSettings {
    pub name: String,
    /// Our own username, including the leading `@`.
    pub username: String,
    /// Username of the bot whose commands we suggest, including the `@`.
    pub target_bot_username: String,
    pub version: String,
}

/// Telegram settings.
///
/// `group_chat_ids`, `admin_user_ids` and `allow_private_messages` are
/// accepted so existing config files keep loading. Routing does not consult
/// them: every group that mentions the bot is served and private chats
/// never are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub group_chat_ids: Vec<i64>,
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
    #[serde(default)]
    pub allow_private_messages: bool,
    #[serde(default = "default_true")]
    pub monitor_channel_comments: bool,
}

/// Upstream LLM API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenRouterSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature, 0.0–2.0 (default: 0.7).
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion budget, 1–4000 (default: 500).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout in seconds, 1–120 (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    /// Cache TTL in seconds, at least 60 (default: 3600).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    /// Total attempts per request (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in seconds (default: 2).
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

impl Default for OpenRouterSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
            enable_caching: true,
            cache_ttl: default_cache_ttl(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantSettings {
    /// History messages included in the prompt, 1–50 (default: 10).
    #[serde(default = "default_context_window")]
    pub context_window_size: usize,
    #[serde(default = "default_true")]
    pub include_history: bool,
    #[serde(default = "default_true")]
    pub include_mentions: bool,
    #[serde(default = "default_true")]
    pub include_target_bot_responses: bool,
    /// Character budget for a context, 500–8000 (default: 3000).
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_instruction_path")]
    pub instruction_path: PathBuf,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            context_window_size: default_context_window(),
            include_history: true,
            include_mentions: true,
            include_target_bot_responses: true,
            max_context_length: default_max_context_length(),
            instruction_path: default_instruction_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonSettings {
    /// 1–4 (default: 2).
    #[serde(default = "default_buttons_per_row")]
    pub buttons_per_row: usize,
    /// 1–12 (default: 6).
    #[serde(default = "default_max_buttons")]
    pub max_buttons: usize,
}

impl Default for ButtonSettings {
    fn default() -> Self {
        Self {
            buttons_per_row: default_buttons_per_row(),
            max_buttons: default_max_buttons(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// One of [`LOG_LEVELS`], case-insensitive (default: INFO).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingSettings {
    /// The level as a `tracing` filter directive.
    pub fn filter_directive(&self) -> &'static str {
        match self.level.to_ascii_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    "nex-agi/deepseek-v3.1-nex-n1:free".to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_context_window() -> usize {
    10
}

fn default_max_context_length() -> usize {
    3000
}

fn default_instruction_path() -> PathBuf {
    PathBuf::from("ai_instruction.md")
}

fn default_buttons_per_row() -> usize {
    2
}

fn default_max_buttons() -> usize {
    6
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Settings {
    /// Load settings from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.muninn/config.toml`
    /// 3. `/etc/muninn/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from(&path, |key| std::env::var(key).ok())
    }

    /// Load settings from `path`, reading overrides through `env`.
    pub fn load_from<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = fs::read_to_string(path).map_err(|e| {
            MuninnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let mut settings = Self::parse(&content, env)?;

        let instruction_path = match path.parent() {
            Some(dir) if settings.assistant.instruction_path.is_relative() => {
                dir.join(&settings.assistant.instruction_path)
            }
            _ => settings.assistant.instruction_path.clone(),
        };
        settings.instruction = read_instruction(&instruction_path)?;
        Ok(settings)
    }

    /// Parse and validate TOML content, applying environment overrides.
    ///
    /// Does not read the instruction file.
    pub fn parse<F>(content: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings: Settings = toml::from_str(content)
            .map_err(|e| MuninnError::Configuration(format!("Failed to parse config: {e}")))?;
        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(MuninnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".muninn").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/muninn/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(MuninnError::Configuration(
            "No config file found. Create ~/.muninn/config.toml or /etc/muninn/config.toml"
                .to_string(),
        ))
    }

    fn apply_env<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = env("OPENROUTER_API_KEY") {
            self.openrouter.api_key = v;
        }
        if let Some(v) = env("OPENROUTER_MODEL") {
            self.openrouter.model = v;
        }
        if let Some(v) = env("OPENROUTER_TIMEOUT") {
            self.openrouter.timeout = parse_env("OPENROUTER_TIMEOUT", &v)?;
        }
        if let Some(v) = env("TARGET_BOT_USERNAME") {
            self.bot.target_bot_username = v;
        }
        if let Some(v) = env("BOT_USERNAME") {
            self.bot.username = v;
        }
        if let Some(v) = env("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("AI_TEMPERATURE") {
            self.openrouter.temperature = parse_env("AI_TEMPERATURE", &v)?;
        }
        if let Some(v) = env("AI_MAX_TOKENS") {
            self.openrouter.max_tokens = parse_env("AI_MAX_TOKENS", &v)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let bot = &self.bot;
        check(
            !bot.name.trim().is_empty() && bot.name.chars().count() <= 100,
            "bot.name must be 1-100 characters",
        )?;
        check(
            is_username(&bot.username),
            "bot.username must look like @name",
        )?;
        check(
            is_username(&bot.target_bot_username),
            "bot.target_bot_username must look like @name",
        )?;
        check(
            is_semver(&bot.version),
            "bot.version must be x.y.z",
        )?;

        check(
            !self.telegram.bot_token.is_empty(),
            "telegram.bot_token is required (or set TELEGRAM_BOT_TOKEN)",
        )?;

        let or = &self.openrouter;
        check(
            !or.api_key.is_empty(),
            "openrouter.api_key is required (or set OPENROUTER_API_KEY)",
        )?;
        check(!or.model.trim().is_empty(), "openrouter.model must not be empty")?;
        let (lo, hi) = TEMPERATURE_RANGE;
        check(
            (lo..=hi).contains(&or.temperature),
            "openrouter.temperature must be within 0.0-2.0",
        )?;
        let (lo, hi) = MAX_TOKENS_RANGE;
        check(
            (lo..=hi).contains(&or.max_tokens),
            "openrouter.max_tokens must be within 1-4000",
        )?;
        check(
            (1..=120).contains(&or.timeout),
            "openrouter.timeout must be within 1-120 seconds",
        )?;
        check(or.cache_ttl >= 60, "openrouter.cache_ttl must be at least 60 seconds")?;
        check(or.max_retries >= 1, "openrouter.max_retries must be at least 1")?;

        let a = &self.assistant;
        check(
            (1..=50).contains(&a.context_window_size),
            "assistant.context_window_size must be within 1-50",
        )?;
        check(
            (500..=8000).contains(&a.max_context_length),
            "assistant.max_context_length must be within 500-8000",
        )?;

        let b = &self.buttons;
        check(
            (1..=4).contains(&b.buttons_per_row),
            "buttons.buttons_per_row must be within 1-4",
        )?;
        check(
            (1..=12).contains(&b.max_buttons),
            "buttons.max_buttons must be within 1-12",
        )?;

        let level = self.logging.level.to_ascii_uppercase();
        check(
            LOG_LEVELS.contains(&level.as_str()),
            "logging.level must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL",
        )?;
        self.logging.level = level;
        Ok(())
    }

    /// Completion client configuration derived from these settings.
    pub fn client_config(&self) -> ClientConfig {
        let or = &self.openrouter;
        ClientConfig::new(or.api_key.clone(), or.model.clone())
            .base_url(or.base_url.clone())
            .timeout(Duration::from_secs(or.timeout))
            .user_agent(format!(
                "{}/{}",
                self.bot.username.trim_start_matches('@'),
                self.bot.version
            ))
            .cache(
                CacheConfig::new()
                    .enabled(or.enable_caching)
                    .ttl(Duration::from_secs(or.cache_ttl)),
            )
            .retry(
                RetryConfig::new()
                    .max_attempts(or.max_retries)
                    .base_delay(Duration::from_secs(or.retry_delay)),
            )
    }
}

fn read_instruction(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path).map_err(|e| {
        MuninnError::Configuration(format!("Failed to read AI instruction file {path:?}: {e}"))
    })?;
    if text.trim().is_empty() {
        return Err(MuninnError::Configuration(format!(
            "AI instruction file {path:?} is empty"
        )));
    }
    Ok(text)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MuninnError::Configuration(format!("{key} has invalid value {value:?}")))
}

fn check(ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(MuninnError::Configuration(message.to_string()))
    }
}

/// `@` followed by one or more word characters.
fn is_username(s: &str) -> bool {
    s.strip_prefix('@')
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

fn is_semver(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
