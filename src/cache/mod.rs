//! Caching subsystem.
//!
//! - [`response::ResponseCache`]: TTL cache of completion texts keyed by
//!   request [`Fingerprint`](crate::Fingerprint). Owned by
//!   [`CompletionClient`](crate::CompletionClient); see the [`response`]
//!   module docs for expiry semantics.

pub mod response;

pub use response::{CacheConfig, CachedCompletion, ResponseCache};
