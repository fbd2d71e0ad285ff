//! Error types for scene orchestration.

use chorus_core::ChorusError;
use chorus_llm::LlmError;
use thiserror::Error;

/// Errors surfaced by characters, narrators and the registry.
#[derive(Debug, Error)]
pub enum SceneError {
    /// Routing was asked to pick a responder from an empty scene.
    #[error("No characters are present in the scene")]
    NoAgentsPresent,

    /// A character name that is not owned by the pool or narrator.
    #[error("Character not found: {0}")]
    AgentNotFound(String),

    /// A narrator id that is not in the registry.
    #[error("Narrator not found: {0}")]
    NarratorNotFound(String),

    /// A persona name that is not in the persona store.
    #[error("Persona not found: {0}")]
    PersonaNotFound(String),

    /// Creating a character, narrator or persona whose key is taken.
    #[error("Already exists: {0}")]
    DuplicateIdentity(String),

    /// A host-supplied argument outside its valid range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The completion service failed or timed out.
    #[error(transparent)]
    CompletionService(#[from] LlmError),

    /// Clock, memory or storage failure.
    #[error(transparent)]
    Core(#[from] ChorusError),
}

impl SceneError {
    /// `true` if the completion service timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CompletionService(e) if e.is_timeout())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, SceneError>;
