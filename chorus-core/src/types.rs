//! Shared value types for the chorus core library.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// A character's generated reply.
    Assistant,
    /// Preambles, recalled memories and stage acknowledgments.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// The identity a user presents to characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name, prefixed to every user turn.
    pub name: String,
    /// Free-text description handed to the character preamble.
    pub description: String,
}

impl Persona {
    /// Create a new persona.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::new("Guest", "A curious visitor.")
    }
}
