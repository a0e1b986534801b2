//! Muninn - a Telegram chat assistant backed by an LLM completions API
//!
//! Muninn watches group chats and channel comments for mentions, builds a
//! conversational context, asks an OpenRouter-compatible model for advice,
//! and turns the answer into a reply whose suggested commands for a target
//! bot are rendered as keyboard buttons.
//!
//! At its core is [`CompletionClient`], which coalesces identical concurrent
//! requests into one upstream call, caches results with a TTL, and retries
//! transient failures with exponential backoff.
//!
//! # Example
//!
//! ```rust,no_run
//! use muninn::{ChatMessage, ClientConfig, CompletionClient, CompletionRequest};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let client = CompletionClient::new(ClientConfig::new(
//!         "sk-or-your-key",
//!         "nex-agi/deepseek-v3.1-nex-n1:free",
//!     ));
//!     client.start()?;
//!
//!     let request = CompletionRequest::new(
//!         "nex-agi/deepseek-v3.1-nex-n1:free",
//!         vec![ChatMessage::user("Recommend a science fiction novel")],
//!     );
//!     let text = client.complete(request, true).await?;
//!     println!("{text}");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod assistant;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod handler;
pub mod keyboard;
pub mod telemetry;
pub mod types;

pub use assistant::{Assistant, AssistantOptions, AssistantReply};
pub use cache::{CacheConfig, CachedCompletion, ResponseCache};
pub use client::{
    ClientConfig, Completion, CompletionClient, Connector, HttpConnector, RetryConfig, Transport,
    should_retry,
};
pub use config::Settings;
pub use context::{ChatContext, ChatKind, ContextBuilder, HistoryMessage};
pub use error::{ErrorKind, MuninnError, Result};
pub use fingerprint::Fingerprint;
pub use handler::{HandleOutcome, IncomingMessage, MentionHandler, ReplySink, Sender, user_notice};
pub use keyboard::{KeyboardBuilder, ReplyKeyboard};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, Role, Usage};

/// Crate version.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
