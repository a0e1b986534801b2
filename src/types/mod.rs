//! Public types for the Muninn API.

mod message;
mod request;
mod response;

pub use message::{ChatMessage, Role};
pub use request::{
    CompletionRequest, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, MAX_TOKENS_RANGE,
    TEMPERATURE_RANGE,
};
pub use response::{Choice, ChoiceMessage, CompletionResponse, Usage};
