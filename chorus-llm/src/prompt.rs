//! Prompt templates for every completion call chorus makes.
//!
//! Each template carries its own generation bounds so callers never pick
//! sampling parameters ad hoc. The built-ins below can be overridden file by
//! file from a directory of TOML templates:
//!
//! ```toml
//! [prompt]
//! version = "1.0"
//! max_tokens = 250
//! temperature = 0.8
//! top_p = 0.9
//! top_k = 40
//! system = "..."
//! user = "..."
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LlmError, Result};
use crate::types::CompletionOptions;

/// Character persona preamble, including the directive grammar.
pub const CHARACTER_PERSONA_SYSTEM: &str = r"{name}: {background}
User ({user_name}): {user_persona}

It is day {day}, {time_of_day}.

You may place these directives anywhere in your reply. They are replaced before anyone reads it:
- [change_time:next_time] when time in the story moves on to the next part of the day
- [change_time:next_day] when the story skips ahead to the next morning
- [tool:get_current_time] the real-world date and time
- [tool:random_number:MIN:MAX] a random whole number between MIN and MAX
- [tool:get_weather:LOCATION] today's weather in LOCATION

Stay in character.";

/// The user's line as the character sees it.
pub const CHARACTER_PERSONA_USER: &str = "{user_name}: {message}";

/// Instruction for condensing the short-term buffer.
pub const MEMORY_SUMMARY_SYSTEM: &str =
    "Summarize the following conversation into a long-term memory.";

/// Transcript handed to the summarizer.
pub const MEMORY_SUMMARY_USER: &str = "{transcript}";

/// Scene context for picking who answers.
pub const RESPONDER_SELECTION_SYSTEM: &str = r"You are the narrator of an interactive story.
Scene: {scene}
Characters present: {characters}
Story so far: {plot_points}";

/// Routing question; the answer must be a single name.
pub const RESPONDER_SELECTION_USER: &str = r#"{user_name} says: "{message}"
Which one of the present characters should answer? Reply with the character's name only."#;

/// Narrator voice for scene descriptions.
pub const SCENE_NARRATION_SYSTEM: &str = r"You are the narrator of an interactive story. Describe what happens in vivid, concise third-person prose. Never speak for the characters.
Scene: {scene}
It is day {day}, {time_of_day}.
Characters present: {characters}
Story so far: {plot_points}";

/// Direction from the user for the next beat.
pub const SCENE_NARRATION_USER: &str = "{direction}";

/// Context for inventing a new character.
pub const CHARACTER_SUGGESTION_SYSTEM: &str = r"You design characters for an interactive story.
Scene: {scene}
Existing characters: {characters}";

/// The user's request for a new character.
pub const CHARACTER_SUGGESTION_USER: &str = r"{request}

Propose one new character who fits the scene. Give a name, a one-line introduction, and a short background.";

/// Replace every `{key}` with its value. Unknown placeholders are left as-is.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

// ---------------------------------------------------------------------------
// PromptEngine
// ---------------------------------------------------------------------------

/// Identifies a prompt template by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// A character's reply to the user.
    CharacterPersona,
    /// Condensing recent turns into a long-term summary.
    MemorySummary,
    /// Choosing which present character answers.
    ResponderSelection,
    /// Narrator scene description.
    SceneNarration,
    /// Proposing a new character.
    CharacterSuggestion,
}

impl PromptId {
    /// All prompt ids.
    pub const ALL: [Self; 5] = [
        Self::CharacterPersona,
        Self::MemorySummary,
        Self::ResponderSelection,
        Self::SceneNarration,
        Self::CharacterSuggestion,
    ];

    /// Snake-case name, also the TOML file stem.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CharacterPersona => "character_persona",
            Self::MemorySummary => "memory_summary",
            Self::ResponderSelection => "responder_selection",
            Self::SceneNarration => "scene_narration",
            Self::CharacterSuggestion => "character_suggestion",
        }
    }

    /// TOML filename for this prompt.
    #[must_use]
    pub fn filename(self) -> String {
        format!("{}.toml", self.as_str())
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| LlmError::ConfigError(format!("unknown prompt id: '{s}'")))
    }
}

#[derive(Debug, Deserialize)]
struct TomlPromptFile {
    prompt: PromptTemplate,
}

/// A loaded, ready-to-render prompt template.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    /// Version string (e.g. "1.0", or "builtin").
    pub version: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Top-k sampling cutoff.
    #[serde(default)]
    pub top_k: Option<u32>,
    /// System prompt template.
    pub system: String,
    /// User prompt template.
    pub user: String,
}

impl PromptTemplate {
    fn builtin(max_tokens: u32, temperature: f32, system: &str, user: &str) -> Self {
        Self {
            version: "builtin".into(),
            max_tokens,
            temperature,
            top_p: None,
            top_k: None,
            system: system.into(),
            user: user.into(),
        }
    }

    /// Completion options carrying this template's bounds.
    #[must_use]
    pub fn options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            timeout_ms: None,
        }
    }
}

/// Rendered system and user prompts plus the template's options.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub user: String,
    /// Generation bounds.
    pub options: CompletionOptions,
}

/// Holds one template per [`PromptId`] and renders them.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    templates: HashMap<PromptId, PromptTemplate>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptEngine {
    /// The compiled-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        let mut persona =
            PromptTemplate::builtin(250, 0.8, CHARACTER_PERSONA_SYSTEM, CHARACTER_PERSONA_USER);
        persona.top_p = Some(0.9);
        persona.top_k = Some(40);

        let templates = HashMap::from([
            (PromptId::CharacterPersona, persona),
            (
                PromptId::MemorySummary,
                PromptTemplate::builtin(150, 0.7, MEMORY_SUMMARY_SYSTEM, MEMORY_SUMMARY_USER),
            ),
            (
                PromptId::ResponderSelection,
                PromptTemplate::builtin(
                    20,
                    0.2,
                    RESPONDER_SELECTION_SYSTEM,
                    RESPONDER_SELECTION_USER,
                ),
            ),
            (
                PromptId::SceneNarration,
                PromptTemplate::builtin(200, 0.8, SCENE_NARRATION_SYSTEM, SCENE_NARRATION_USER),
            ),
            (
                PromptId::CharacterSuggestion,
                PromptTemplate::builtin(
                    300,
                    0.9,
                    CHARACTER_SUGGESTION_SYSTEM,
                    CHARACTER_SUGGESTION_USER,
                ),
            ),
        ]);
        Self { templates }
    }

    /// Load templates from a directory of TOML files named after each [`PromptId`].
    ///
    /// Unknown files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if a file cannot be read or parsed, or
    /// if the directory holds no templates at all.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut templates = HashMap::new();

        for id in PromptId::ALL {
            let path = dir.join(id.filename());
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| {
                LlmError::ConfigError(format!("failed to read {}: {e}", path.display()))
            })?;
            let parsed: TomlPromptFile = toml::from_str(&content).map_err(|e| {
                LlmError::ConfigError(format!("failed to parse {}: {e}", path.display()))
            })?;
            debug!(prompt = %id, version = %parsed.prompt.version, "Loaded prompt template");
            templates.insert(id, parsed.prompt);
        }

        if templates.is_empty() {
            return Err(LlmError::ConfigError(format!(
                "no prompt templates found in directory: {}",
                dir.display()
            )));
        }
        Ok(Self { templates })
    }

    /// Built-ins, with any templates found in `dir` taking precedence.
    ///
    /// # Errors
    ///
    /// As [`Self::from_directory`].
    pub fn with_overrides(dir: impl AsRef<Path>) -> Result<Self> {
        let overrides = Self::from_directory(&dir)?;
        let mut engine = Self::builtin();
        info!(
            dir = %dir.as_ref().display(),
            count = overrides.len(),
            "Prompt overrides loaded"
        );
        engine.templates.extend(overrides.templates);
        Ok(engine)
    }

    /// A loaded template.
    #[must_use]
    pub fn get(&self, id: PromptId) -> Option<&PromptTemplate> {
        self.templates.get(&id)
    }

    /// Render both prompts for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] if `id` is not loaded.
    pub fn render(&self, id: PromptId, vars: &[(&str, &str)]) -> Result<RenderedPrompt> {
        let tpl = self
            .get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("prompt template '{id}' not loaded")))?;
        Ok(RenderedPrompt {
            system: render_template(&tpl.system, vars),
            user: render_template(&tpl.user, vars),
            options: tpl.options(),
        })
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering_leaves_unknown_keys() {
        let rendered = render_template("Hello {name}, {unknown}.", &[("name", "Lyra")]);
        assert_eq!(rendered, "Hello Lyra, {unknown}.");
    }

    #[test]
    fn prompt_id_round_trip() {
        for id in PromptId::ALL {
            assert_eq!(id.to_string().parse::<PromptId>().expect("parse"), id);
        }
        assert!("nonexistent".parse::<PromptId>().is_err());
    }

    #[test]
    fn builtin_covers_every_id() {
        let engine = PromptEngine::builtin();
        assert_eq!(engine.len(), PromptId::ALL.len());
        for id in PromptId::ALL {
            assert!(engine.get(id).is_some(), "{id} missing");
        }
    }

    #[test]
    fn persona_options_match_reply_bounds() {
        let opts = PromptEngine::builtin()
            .get(PromptId::CharacterPersona)
            .expect("persona")
            .options();
        assert_eq!(opts.max_tokens, 250);
        assert_eq!(opts.top_k, Some(40));
        assert!((opts.temperature - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn routing_runs_cold_and_short() {
        let tpl = PromptEngine::builtin();
        let routing = tpl.get(PromptId::ResponderSelection).expect("routing");
        assert!(routing.temperature <= 0.3);
        assert!(routing.max_tokens <= 32);
    }

    #[test]
    fn from_directory_errors_on_missing_dir() {
        assert!(PromptEngine::from_directory("/tmp/nonexistent_chorus_prompts_dir").is_err());
    }
}
