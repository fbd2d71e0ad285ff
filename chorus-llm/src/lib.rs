//! # chorus-llm: completion-service layer for chorus
//!
//! Everything that produces text goes through [`CompletionService`]:
//!   - **Ollama** `/api/chat` (local, default)
//!   - **OpenAI-compatible** `/v1/chat/completions`
//!   - **Scripted** replies for tests and offline runs
//!
//! The HTTP client wraps every attempt in a hard timeout and retries a fixed
//! number of times; a timeout on the last attempt surfaces as
//! [`LlmError::Timeout`]. Prompt wording and sampling bounds live in
//! [`prompt::PromptEngine`].

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod prompt;
pub mod scripted;
pub mod types;

pub use client::{CompletionService, LlmClient, LlmProvider};
pub use error::LlmError;
pub use prompt::{PromptEngine, PromptId};
pub use scripted::ScriptedCompletion;
pub use types::{ChatMessage, ChatRole, CompletionOptions, LlmResponse};
