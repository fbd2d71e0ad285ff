//! # chorus-scene: characters, narrators and the narrator registry
//!
//! ```text
//! host ──▶ Orchestrator ──▶ NarratorRegistry ──▶ active Narrator
//!               │                                  │ route (sole / named / service / random)
//!               ▼                                  ▼
//!         CharacterPool ◀──── shared handles ──── Character::talk
//!               │                                  │ memory tiers + completion + directives
//!               ▼                                  ▼
//!         SnapshotStore (save after every mutation)
//! ```
//!
//! A [`Character`] owns its memory and clock and turns a user message into
//! one completion call. A [`Narrator`] owns a scene: who is present, the
//! scene clock, the plot so far, and a busy flag that keeps at most one
//! generative call in flight. The [`Orchestrator`] ties both to storage.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod character;
pub mod error;
pub mod narrator;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod suggestion;
pub mod telemetry;

pub use character::{
    Character, CharacterProfile, CharacterRecord, CharacterServices, CharacterSettings,
    StageCommand, TalkOptions, TalkReply,
};
pub use error::{Result, SceneError};
pub use narrator::{
    BUSY_PLACEHOLDER, Narrator, NarratorRecord, NarratorReply, NarratorSummary, RoutingDecision,
    RoutingMethod, Speaker,
};
pub use orchestrator::Orchestrator;
pub use pool::{CharacterPool, PoolRecord, SharedCharacter};
pub use registry::{NarratorRegistry, RegistryRecord};
pub use suggestion::{SuggestionBoard, SuggestionStatus, SuggestionTicket};
pub use telemetry::init_tracing;
