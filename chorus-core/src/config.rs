//! Configuration for the chorus engine.
//!
//! Maps directly to `chorus.toml`. Every section and key is optional; missing
//! values fall back to the defaults below.

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, TimeOfDay};
use crate::error::{ChorusError, Result};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Per-character memory tiers.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Completion service connection.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Character turn defaults.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Narrator defaults.
    #[serde(default)]
    pub narrator: NarratorConfig,
    /// Snapshot storage.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Characters created on first start if absent.
    #[serde(default)]
    pub characters: Vec<CharacterSeed>,
}

impl ChorusConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`ChorusError::Config`] if the TOML is invalid or fails [`Self::validate`].
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ChorusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints serde cannot express.
    ///
    /// # Errors
    /// Returns [`ChorusError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.memory.short_term_capacity == 0 {
            return Err(ChorusError::Config(
                "memory.short_term_capacity must be at least 1".to_string(),
            ));
        }
        if self.memory.embedding_dimensions == 0 {
            return Err(ChorusError::Config(
                "memory.embedding_dimensions must be at least 1".to_string(),
            ));
        }
        if self.agent.turns_per_time_change == 0 {
            return Err(ChorusError::Config(
                "agent.turns_per_time_change must be at least 1".to_string(),
            ));
        }
        self.agent.start_clock()?;
        if self.llm.request_timeout_ms == 0 {
            return Err(ChorusError::Config(
                "llm.request_timeout_ms must be at least 1".to_string(),
            ));
        }
        if !matches!(self.llm.provider.as_str(), "ollama" | "openai" | "none") {
            return Err(ChorusError::Config(format!(
                "llm.provider '{}' is not one of ollama, openai, none",
                self.llm.provider
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level or `EnvFilter` directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Memory tier sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Recent turns kept before FIFO eviction.
    #[serde(default = "default_20")]
    pub short_term_capacity: usize,
    /// Recent turns replayed into each completion request.
    #[serde(default = "default_8")]
    pub context_window: usize,
    /// Long-term passages recalled per turn.
    #[serde(default = "default_2")]
    pub long_term_top_k: usize,
    /// Width of the hashing embedding.
    #[serde(default = "default_256")]
    pub embedding_dimensions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 20,
            context_window: 8,
            long_term_top_k: 2,
            embedding_dimensions: 256,
        }
    }
}

/// Completion service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai" (any compatible server), or "none".
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL for the API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Bearer token for OpenAI-compatible servers.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Hard timeout for a single request in milliseconds.
    #[serde(default = "default_30000")]
    pub request_timeout_ms: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_1_u32")]
    pub max_retries: u32,
    /// Directory of TOML prompt templates overriding the built-ins.
    #[serde(default)]
    pub prompt_directory: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            base_url: default_ollama_url(),
            api_key: None,
            model: default_model(),
            request_timeout_ms: 30_000,
            max_retries: 1,
            prompt_directory: None,
        }
    }
}

/// Per-character turn defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the user until a persona is set.
    #[serde(default = "default_user_name")]
    pub default_user_name: String,
    /// Description of the user until a persona is set.
    #[serde(default = "default_user_persona")]
    pub default_user_persona: String,
    /// Replies before the character's clock advances.
    #[serde(default = "default_1_u32")]
    pub turns_per_time_change: u32,
    /// Day a new character starts on.
    #[serde(default = "default_1_u32")]
    pub start_day: u32,
    /// Segment a new character starts in.
    #[serde(default = "default_morning")]
    pub start_time_of_day: String,
    /// Stored and returned when the service replies with no content.
    #[serde(default = "default_placeholder")]
    pub empty_reply_placeholder: String,
}

impl AgentConfig {
    /// The configured starting clock.
    ///
    /// # Errors
    /// Returns [`ChorusError::InvalidTimeValue`] for a bad day or segment.
    pub fn start_clock(&self) -> Result<Clock> {
        let tod: TimeOfDay = self.start_time_of_day.parse()?;
        Clock::new(self.start_day, tod)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_user_name: default_user_name(),
            default_user_persona: default_user_persona(),
            turns_per_time_change: 1,
            start_day: 1,
            start_time_of_day: default_morning(),
            empty_reply_placeholder: default_placeholder(),
        }
    }
}

/// Narrator defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarratorConfig {
    /// Scene label of a freshly created narrator.
    #[serde(default = "default_scene")]
    pub default_scene: String,
    /// Id of the narrator created and activated when the registry is empty.
    #[serde(default = "default_narrator_id")]
    pub default_narrator_id: String,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            default_scene: default_scene(),
            default_narrator_id: default_narrator_id(),
        }
    }
}

/// Snapshot storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite file. `None` keeps everything in memory.
    #[serde(default)]
    pub path: Option<String>,
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Detect corrupted snapshots via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Rotating backups kept by `backup_rotating`.
    #[serde(default = "default_3")]
    pub backup_count: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            wal_mode: true,
            checksum_enabled: true,
            backup_count: 3,
        }
    }
}

/// A character to create on first start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSeed {
    /// Unique character name.
    pub name: String,
    /// Opening line or short introduction.
    #[serde(default)]
    pub intro: String,
    /// Background text for the persona preamble.
    #[serde(default)]
    pub background: String,
    /// Reference to the persona asset (portrait, profile file).
    #[serde(default)]
    pub profile: String,
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "dolphin3".to_string() }
fn default_user_name() -> String { "Guest".to_string() }
fn default_user_persona() -> String { "A curious visitor to the website.".to_string() }
fn default_morning() -> String { "morning".to_string() }
fn default_placeholder() -> String { "No response".to_string() }
fn default_scene() -> String { "An empty stage".to_string() }
fn default_narrator_id() -> String { "default_story".to_string() }
fn default_1_u32() -> u32 { 1 }
fn default_2() -> usize { 2 }
fn default_3() -> u32 { 3 }
fn default_8() -> usize { 8 }
fn default_20() -> usize { 20 }
fn default_256() -> usize { 256 }
fn default_30000() -> u64 { 30_000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ChorusConfig::from_toml("").expect("parse");
        assert_eq!(config.memory.short_term_capacity, 20);
        assert_eq!(config.memory.context_window, 8);
        assert_eq!(config.memory.long_term_top_k, 2);
        assert_eq!(config.llm.model, "dolphin3");
        assert_eq!(config.agent.default_user_name, "Guest");
        assert_eq!(config.narrator.default_narrator_id, "default_story");
        assert!(config.characters.is_empty());
    }

    #[test]
    fn partial_sections_override() {
        let config = ChorusConfig::from_toml(
            r#"
            [agent]
            turns_per_time_change = 3
            start_day = 2
            start_time_of_day = "evening"

            [[characters]]
            name = "Lyra"
            intro = "Hello there."
            "#,
        )
        .expect("parse");
        assert_eq!(config.agent.turns_per_time_change, 3);
        let clock = config.agent.start_clock().expect("clock");
        assert_eq!((clock.day(), clock.time_of_day()), (2, TimeOfDay::Evening));
        assert_eq!(config.characters[0].name, "Lyra");
        assert_eq!(config.characters[0].background, "");
    }

    #[test]
    fn rejects_zero_turns_per_time_change() {
        let err = ChorusConfig::from_toml("[agent]\nturns_per_time_change = 0")
            .expect_err("invalid");
        assert!(matches!(err, ChorusError::Config(_)));
    }

    #[test]
    fn rejects_bad_start_time() {
        assert!(ChorusConfig::from_toml("[agent]\nstart_time_of_day = \"noon\"").is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(ChorusConfig::from_toml("[llm]\nprovider = \"carrier_pigeon\"").is_err());
    }

    #[test]
    fn rejects_zero_request_timeout() {
        let err = ChorusConfig::from_toml("[llm]\nrequest_timeout_ms = 0").expect_err("invalid");
        assert!(matches!(err, ChorusError::Config(ref msg) if msg.contains("request_timeout_ms")));
    }
}
