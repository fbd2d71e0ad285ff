//! # Chorus Core Library
//!
//! Building blocks for multi-character dialogue that share one fictional
//! timeline:
//!
//! - **Clock**: the `(day, time-of-day)` cursor every scene runs on
//! - **Directives**: `[change_time:..]` / `[tool:..]` instructions embedded
//!   in generated text, resolved locally
//! - **Memory**: a bounded recent-turn buffer plus a long-term semantic
//!   archive of summaries
//! - **Persistence**: SQLite snapshot store for full-state records
//!
//! Nothing in this crate talks to a completion service; the turn logic that
//! does lives in `chorus-scene`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod directive;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod persistence;
pub mod types;

pub use clock::{Clock, TimeOfDay};
pub use config::ChorusConfig;
pub use directive::{DirectiveReport, resolve_directives};
pub use error::{ChorusError, Result};
pub use memory::{MemoryEntry, MemoryTiers};
pub use types::{Persona, Role};
