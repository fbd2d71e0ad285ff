//! Characters: named personas with their own memory and clock.
//!
//! A turn runs in this order:
//!
//! ```text
//! stage command? ──yes──▶ record user turn, apply, acknowledge (no completion call)
//!       │ no
//!       ▼
//! preamble + recalled summaries + recent turns + new message
//!       │ complete()            (failure: nothing recorded, clock untouched)
//!       ▼
//! resolve directives ──▶ record user + assistant turns ──▶ tick turn counter
//! ```

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chorus_core::config::CharacterSeed;
use chorus_core::memory::{IndexProvider, LongTermRecord};
use chorus_core::{
    ChorusConfig, ChorusError, Clock, MemoryEntry, MemoryTiers, Persona, Role, TimeOfDay,
    resolve_directives,
};
use chorus_llm::{ChatMessage, CompletionService, PromptEngine, PromptId};

use crate::error::{Result, SceneError};

// ---------------------------------------------------------------------------
// Construction inputs
// ---------------------------------------------------------------------------

/// Identity and persona text of a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    /// Unique name; the key across the pool.
    pub name: String,
    /// Opening line shown when the user first meets the character.
    #[serde(default)]
    pub intro: String,
    /// Background text for the persona preamble.
    #[serde(default)]
    pub background: String,
    /// Reference to the persona asset (portrait, profile file).
    #[serde(default)]
    pub profile: String,
}

impl CharacterProfile {
    /// A profile with just a name and background.
    #[must_use]
    pub fn new(name: impl Into<String>, background: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intro: String::new(),
            background: background.into(),
            profile: String::new(),
        }
    }

    /// Set the intro line.
    #[must_use]
    pub fn with_intro(mut self, intro: impl Into<String>) -> Self {
        self.intro = intro.into();
        self
    }

    /// Set the persona asset reference.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }
}

impl From<CharacterSeed> for CharacterProfile {
    fn from(seed: CharacterSeed) -> Self {
        Self {
            name: seed.name,
            intro: seed.intro,
            background: seed.background,
            profile: seed.profile,
        }
    }
}

/// Shared collaborators handed to every character and narrator.
#[derive(Clone)]
pub struct CharacterServices {
    /// Completion backend.
    pub llm: Arc<dyn CompletionService>,
    /// Prompt templates.
    pub prompts: Arc<PromptEngine>,
    /// Per-character long-term indexes.
    pub indexes: Arc<dyn IndexProvider>,
}

impl std::fmt::Debug for CharacterServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacterServices")
            .field("llm", &self.llm.name())
            .field("prompts", &self.prompts.len())
            .finish_non_exhaustive()
    }
}

/// Tunables a new character starts with.
#[derive(Debug, Clone)]
pub struct CharacterSettings {
    /// Short-term buffer capacity.
    pub short_term_capacity: usize,
    /// Recent turns replayed per completion.
    pub context_window: usize,
    /// Long-term passages recalled per turn.
    pub long_term_top_k: usize,
    /// Replies before the clock advances.
    pub turns_per_time_change: u32,
    /// Initial clock.
    pub start_clock: Clock,
    /// Initial user persona.
    pub user: Persona,
    /// Reply text used when the service returns nothing.
    pub empty_reply_placeholder: String,
}

impl Default for CharacterSettings {
    fn default() -> Self {
        Self {
            short_term_capacity: 20,
            context_window: 8,
            long_term_top_k: 2,
            turns_per_time_change: 1,
            start_clock: Clock::default(),
            user: Persona::new("Guest", "A curious visitor to the website."),
            empty_reply_placeholder: "No response".to_string(),
        }
    }
}

impl CharacterSettings {
    /// Derive settings from the `[memory]` and `[agent]` config sections.
    ///
    /// # Errors
    /// Returns [`ChorusError::InvalidTimeValue`] for a bad start time.
    pub fn from_config(config: &ChorusConfig) -> chorus_core::Result<Self> {
        Ok(Self {
            short_term_capacity: config.memory.short_term_capacity,
            context_window: config.memory.context_window,
            long_term_top_k: config.memory.long_term_top_k,
            turns_per_time_change: config.agent.turns_per_time_change.max(1),
            start_clock: config.agent.start_clock()?,
            user: Persona::new(
                config.agent.default_user_name.clone(),
                config.agent.default_user_persona.clone(),
            ),
            empty_reply_placeholder: config.agent.empty_reply_placeholder.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Stage commands
// ---------------------------------------------------------------------------

/// User-issued commands a character handles without a completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCommand {
    /// `/time next`
    NextTime,
    /// `/time previous`
    PreviousTime,
    /// `/day next`
    NextDay,
    /// `/day previous`
    PreviousDay,
    /// `/set messages <n>`
    SetMessages(u32),
    /// A known command with bad arguments; carries the usage line.
    Usage(&'static str),
}

impl StageCommand {
    /// Recognise a stage command. Anything else is ordinary dialogue.
    #[must_use]
    pub fn parse(message: &str) -> Option<Self> {
        let lowered = message.trim().to_ascii_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        match words.as_slice() {
            ["/time", "next"] => Some(Self::NextTime),
            ["/time", "previous" | "prev"] => Some(Self::PreviousTime),
            ["/time", ..] => Some(Self::Usage("/time next | /time previous")),
            ["/day", "next"] => Some(Self::NextDay),
            ["/day", "previous" | "prev"] => Some(Self::PreviousDay),
            ["/day", ..] => Some(Self::Usage("/day next | /day previous")),
            ["/set", "messages", n] => Some(
                n.parse()
                    .map_or(Self::Usage("/set messages <n> (n >= 1)"), Self::SetMessages),
            ),
            ["/set", ..] => Some(Self::Usage("/set messages <n> (n >= 1)")),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Turn inputs and outputs
// ---------------------------------------------------------------------------

/// Per-call knobs for [`Character::talk`].
#[derive(Debug, Clone)]
pub struct TalkOptions {
    /// Opaque "time since last message" marker; `"unknown"` if absent.
    pub time_since_last: Option<String>,
    /// Tick the turn counter (and maybe the clock) after the reply.
    pub auto_advance: bool,
}

impl Default for TalkOptions {
    fn default() -> Self {
        Self {
            time_since_last: None,
            auto_advance: true,
        }
    }
}

/// Result of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkReply {
    /// Processed reply, or the stage-command acknowledgment.
    pub text: String,
    /// Character's clock after the turn.
    pub clock: Clock,
    /// `true` if the message was a stage command.
    pub stage_command: bool,
    /// Time directives applied from the reply.
    pub time_changes: usize,
}

impl TalkReply {
    /// Day after the turn.
    #[must_use]
    pub fn day(&self) -> u32 {
        self.clock.day()
    }

    /// Segment after the turn.
    #[must_use]
    pub fn time_of_day(&self) -> TimeOfDay {
        self.clock.time_of_day()
    }
}

/// Serializable snapshot of a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Identity and persona text.
    #[serde(flatten)]
    pub profile: CharacterProfile,
    /// Clock position.
    pub clock: Clock,
    /// Active user persona.
    pub user: Persona,
    /// Replies since the last clock advance.
    pub turn_counter: u32,
    /// Replies per clock advance.
    pub turns_per_time_change: u32,
    /// Recent turns, oldest first.
    #[serde(default)]
    pub short_term: Vec<MemoryEntry>,
}

// ---------------------------------------------------------------------------
// Character
// ---------------------------------------------------------------------------

/// A conversational persona with tiered memory and its own clock.
pub struct Character {
    profile: CharacterProfile,
    memory: MemoryTiers,
    clock: Clock,
    user: Persona,
    turn_counter: u32,
    turns_per_time_change: u32,
    context_window: usize,
    empty_reply_placeholder: String,
    services: CharacterServices,
    rng: StdRng,
}

impl std::fmt::Debug for Character {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Character")
            .field("name", &self.profile.name)
            .field("clock", &self.clock)
            .field("user", &self.user.name)
            .field("turn_counter", &self.turn_counter)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

impl Character {
    /// Create a character and open its long-term index.
    ///
    /// # Errors
    /// Returns [`SceneError::InvalidArgument`] for an empty name, or an index
    /// error if the long-term store cannot be opened.
    pub fn new(
        mut profile: CharacterProfile,
        settings: &CharacterSettings,
        services: CharacterServices,
    ) -> Result<Self> {
        let name = profile.name.trim();
        if name.is_empty() {
            return Err(SceneError::InvalidArgument(
                "character name must not be empty".to_string(),
            ));
        }
        if name.len() != profile.name.len() {
            profile.name = name.to_string();
        }
        let long_term = services.indexes.open(&profile.name)?;
        Ok(Self {
            memory: MemoryTiers::new(
                settings.short_term_capacity,
                long_term,
                settings.long_term_top_k,
            ),
            clock: settings.start_clock,
            user: settings.user.clone(),
            turn_counter: 0,
            turns_per_time_change: settings.turns_per_time_change.max(1),
            context_window: settings.context_window,
            empty_reply_placeholder: settings.empty_reply_placeholder.clone(),
            services,
            rng: StdRng::from_entropy(),
            profile,
        })
    }

    /// Rebuild a character from a snapshot.
    ///
    /// # Errors
    /// As [`Character::new`]; also rejects `turns_per_time_change == 0`.
    pub fn from_record(
        record: CharacterRecord,
        settings: &CharacterSettings,
        services: CharacterServices,
    ) -> Result<Self> {
        if record.turns_per_time_change == 0 {
            return Err(ChorusError::Serialization(format!(
                "character '{}' has turns_per_time_change = 0",
                record.profile.name
            ))
            .into());
        }
        let mut character = Self::new(record.profile, settings, services)?;
        character.clock = record.clock;
        character.user = record.user;
        character.turns_per_time_change = record.turns_per_time_change;
        character.turn_counter = if record.turn_counter < record.turns_per_time_change {
            record.turn_counter
        } else {
            0
        };
        character.memory.restore_short_term(record.short_term);
        Ok(character)
    }

    /// Snapshot for persistence.
    #[must_use]
    pub fn to_record(&self) -> CharacterRecord {
        CharacterRecord {
            profile: self.profile.clone(),
            clock: self.clock,
            user: self.user.clone(),
            turn_counter: self.turn_counter,
            turns_per_time_change: self.turns_per_time_change,
            short_term: self.memory.short_term().iter().cloned().collect(),
        }
    }

    /// Seed the directive generator, for reproducible `random_number` results.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    /// Identity and persona text.
    #[must_use]
    pub fn profile(&self) -> &CharacterProfile {
        &self.profile
    }

    /// Current clock.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Active user persona.
    #[must_use]
    pub fn user(&self) -> &Persona {
        &self.user
    }

    /// Replies since the last clock advance.
    #[must_use]
    pub fn turn_counter(&self) -> u32 {
        self.turn_counter
    }

    /// Replies per clock advance.
    #[must_use]
    pub fn turns_per_time_change(&self) -> u32 {
        self.turns_per_time_change
    }

    /// Memory tiers.
    #[must_use]
    pub fn memory(&self) -> &MemoryTiers {
        &self.memory
    }

    // ------------------------------------------------------------------
    // Host-side mutation
    // ------------------------------------------------------------------

    /// Replace the user persona used in the preamble and turn prefixes.
    pub fn set_user_persona(&mut self, persona: Persona) {
        self.user = persona;
    }

    /// Set the clock from untrusted input; unchanged on error.
    ///
    /// # Errors
    /// Returns [`ChorusError::InvalidTimeValue`] wrapped in [`SceneError::Core`].
    pub fn set_time(&mut self, day: u32, time_of_day: &str) -> Result<()> {
        self.clock.set(day, time_of_day)?;
        Ok(())
    }

    /// Adopt another clock wholesale (narrator sync).
    pub fn sync_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    /// Set how many replies pass per clock advance and restart the count.
    ///
    /// # Errors
    /// Returns [`SceneError::InvalidArgument`] for 0.
    pub fn set_turns_per_time_change(&mut self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(SceneError::InvalidArgument(
                "turns_per_time_change must be at least 1".to_string(),
            ));
        }
        self.turns_per_time_change = n;
        self.turn_counter = 0;
        Ok(())
    }

    fn apply_stage_command(&mut self, command: StageCommand) -> String {
        match command {
            StageCommand::NextTime => {
                self.clock.advance();
                format!("Time moves on: {}.", self.clock)
            }
            StageCommand::PreviousTime => {
                self.clock.retreat();
                format!("Time rewinds: {}.", self.clock)
            }
            StageCommand::NextDay => {
                self.clock.next_day();
                format!("A new day begins: {}.", self.clock)
            }
            StageCommand::PreviousDay => {
                self.clock.previous_day();
                format!("Time rewinds: {}.", self.clock)
            }
            StageCommand::SetMessages(n) => match self.set_turns_per_time_change(n) {
                Ok(()) => format!("Time will now advance every {n} message(s)."),
                Err(e) => e.to_string(),
            },
            StageCommand::Usage(usage) => format!("Usage: {usage}"),
        }
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Answer one user message.
    ///
    /// Stage commands are handled locally. Otherwise the reply is generated,
    /// its directives are resolved against this character's clock, and both
    /// turns are recorded. A failed completion call records nothing.
    ///
    /// # Errors
    /// Returns [`SceneError::CompletionService`] on backend failure, or
    /// [`SceneError::Core`] if the long-term index lookup fails.
    pub async fn talk(&mut self, message: &str, options: TalkOptions) -> Result<TalkReply> {
        let time_delta = options
            .time_since_last
            .unwrap_or_else(|| "unknown".to_string());
        let day = self.clock.day().to_string();
        let time_of_day = self.clock.time_of_day().to_string();
        let rendered = self.services.prompts.render(
            PromptId::CharacterPersona,
            &[
                ("name", &self.profile.name),
                ("background", &self.profile.background),
                ("user_name", &self.user.name),
                ("user_persona", &self.user.description),
                ("day", &day),
                ("time_of_day", &time_of_day),
                ("message", message),
            ],
        )?;

        if let Some(command) = StageCommand::parse(message) {
            self.memory.remember(MemoryEntry::new(
                Role::User,
                rendered.user,
                time_delta,
                &self.clock,
            ));
            let ack = self.apply_stage_command(command);
            debug!(character = %self.profile.name, ?command, clock = %self.clock, "Stage command");
            self.memory
                .remember(MemoryEntry::new(Role::System, ack.clone(), "0s", &self.clock));
            return Ok(TalkReply {
                text: ack,
                clock: self.clock,
                stage_command: true,
                time_changes: 0,
            });
        }

        let recalled = self.memory.query(message, self.memory.top_k()).await?;
        let mut context = Vec::with_capacity(2 + recalled.len() + self.context_window);
        context.push(ChatMessage::system(rendered.system));
        context.extend(recalled.into_iter().map(ChatMessage::system));
        context.extend(
            self.memory
                .short_term()
                .recent(self.context_window)
                .map(to_chat_message),
        );
        context.push(ChatMessage::user(rendered.user.clone()));

        let response = self
            .services
            .llm
            .complete(&context, &rendered.options)
            .await?;
        let raw = if response.is_empty() {
            debug!(character = %self.profile.name, "Empty completion, using placeholder");
            self.empty_reply_placeholder.clone()
        } else {
            response.text
        };

        self.memory.remember(MemoryEntry::new(
            Role::User,
            rendered.user,
            time_delta,
            &self.clock,
        ));
        let report = resolve_directives(&raw, &mut self.clock, &mut self.rng);
        self.memory.remember(MemoryEntry::new(
            Role::Assistant,
            report.text.clone(),
            "0s",
            &self.clock,
        ));

        if options.auto_advance {
            self.turn_counter += 1;
            if self.turn_counter >= self.turns_per_time_change {
                self.clock.advance();
                self.turn_counter = 0;
                debug!(character = %self.profile.name, clock = %self.clock, "Clock advanced");
            }
        }

        Ok(TalkReply {
            text: report.text,
            clock: self.clock,
            stage_command: false,
            time_changes: report.time_changes,
        })
    }

    /// Condense the short-term buffer into one long-term record.
    ///
    /// Returns `Ok(None)` when the buffer is empty or the service produced no
    /// summary; the buffer is cleared only after a record is stored.
    ///
    /// # Errors
    /// Returns [`SceneError::CompletionService`] or an index error; the buffer
    /// is untouched in both cases.
    pub async fn summarize_and_commit(&mut self) -> Result<Option<LongTermRecord>> {
        if self.memory.short_term().is_empty() {
            return Ok(None);
        }
        let transcript = self.memory.transcript();
        let rendered = self
            .services
            .prompts
            .render(PromptId::MemorySummary, &[("transcript", &transcript)])?;
        let context = [
            ChatMessage::system(rendered.system),
            ChatMessage::user(rendered.user),
        ];
        let response = self
            .services
            .llm
            .complete(&context, &rendered.options)
            .await?;

        let committed = self.memory.commit_summary(&response.text, &self.clock).await?;
        if committed.is_none() {
            info!(character = %self.profile.name, "Summarizer returned nothing, buffer kept");
        }
        Ok(committed)
    }
}

fn to_chat_message(entry: &MemoryEntry) -> ChatMessage {
    match entry.role {
        Role::User => ChatMessage::user(entry.content.clone()),
        Role::Assistant => ChatMessage::assistant(entry.content.clone()),
        Role::System => ChatMessage::system(entry.content.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::embedding::HashingEmbeddingProvider;
    use chorus_core::memory::VectorIndexProvider;
    use chorus_llm::{ChatRole, LlmError, ScriptedCompletion};

    fn services(llm: Arc<ScriptedCompletion>) -> CharacterServices {
        CharacterServices {
            llm,
            prompts: Arc::new(PromptEngine::builtin()),
            indexes: Arc::new(VectorIndexProvider::new(Arc::new(
                HashingEmbeddingProvider::default(),
            ))),
        }
    }

    fn lyra(llm: &Arc<ScriptedCompletion>) -> Character {
        Character::new(
            CharacterProfile::new("Lyra", "A wandering bard."),
            &CharacterSettings::default(),
            services(Arc::clone(llm)),
        )
        .expect("character")
        .with_rng_seed(1)
    }

    #[test]
    fn stage_command_parsing() {
        assert_eq!(StageCommand::parse("/time next"), Some(StageCommand::NextTime));
        assert_eq!(StageCommand::parse(" /DAY Previous "), Some(StageCommand::PreviousDay));
        assert_eq!(
            StageCommand::parse("/set messages 3"),
            Some(StageCommand::SetMessages(3))
        );
        assert!(matches!(
            StageCommand::parse("/set messages lots"),
            Some(StageCommand::Usage(_))
        ));
        assert_eq!(StageCommand::parse("what time is it?"), None);
    }

    #[tokio::test]
    async fn reply_is_recorded_and_clock_ticks() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("Hello, traveler.");
        let mut lyra = lyra(&llm);

        let reply = lyra.talk("Hi!", TalkOptions::default()).await.expect("talk");
        assert_eq!(reply.text, "Hello, traveler.");
        assert_eq!(reply.time_of_day(), TimeOfDay::Afternoon);

        let stored: Vec<_> = lyra.memory().short_term().iter().cloned().collect();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].content, "Guest: Hi!");
        assert_eq!(stored[0].time_delta, "unknown");
        assert_eq!(stored[1].role, Role::Assistant);
        assert_eq!(stored[1].time_delta, "0s");
    }

    #[tokio::test]
    async fn context_has_preamble_history_and_new_message() {
        let llm = Arc::new(ScriptedCompletion::new().with_default("ok"));
        let mut lyra = lyra(&llm);
        lyra.talk("first", TalkOptions::default()).await.expect("talk");
        lyra.talk("second", TalkOptions::default()).await.expect("talk");

        let call = llm.calls().pop().expect("call");
        assert_eq!(call.messages[0].role, ChatRole::System);
        assert!(call.messages[0].content.starts_with("Lyra: A wandering bard."));
        assert!(call.messages[0].content.contains("[tool:random_number:MIN:MAX]"));
        let last = call.messages.last().expect("message");
        assert_eq!(last.content, "Guest: second");
        let users = call
            .messages
            .iter()
            .filter(|m| m.content == "Guest: second")
            .count();
        assert_eq!(users, 1, "new message must not be duplicated in history");
        assert_eq!(call.options.max_tokens, 250);
    }

    #[tokio::test]
    async fn stage_command_skips_completion() {
        let llm = Arc::new(ScriptedCompletion::new());
        let mut lyra = lyra(&llm);
        let reply = lyra.talk("/day next", TalkOptions::default()).await.expect("talk");
        assert!(reply.stage_command);
        assert_eq!(reply.day(), 2);
        assert_eq!(reply.time_of_day(), TimeOfDay::EarlyMorning);
        assert_eq!(llm.call_count(), 0);
        assert_eq!(lyra.memory().short_term().len(), 2);
    }

    #[tokio::test]
    async fn set_messages_controls_advance_rate() {
        let llm = Arc::new(ScriptedCompletion::new().with_default("mm"));
        let mut lyra = lyra(&llm);
        lyra.talk("/set messages 2", TalkOptions::default()).await.expect("set");
        assert_eq!(lyra.turns_per_time_change(), 2);

        lyra.talk("a", TalkOptions::default()).await.expect("talk");
        assert_eq!(lyra.clock().time_of_day(), TimeOfDay::Morning);
        lyra.talk("b", TalkOptions::default()).await.expect("talk");
        assert_eq!(lyra.clock().time_of_day(), TimeOfDay::Afternoon);

        let reply = lyra.talk("/set messages 0", TalkOptions::default()).await.expect("set");
        assert!(reply.text.contains("at least 1"));
        assert_eq!(lyra.turns_per_time_change(), 2);
    }

    #[tokio::test]
    async fn failed_completion_leaves_state_untouched() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_timeout();
        let mut lyra = lyra(&llm);
        let before = lyra.to_record();

        let err = lyra.talk("hello?", TalkOptions::default()).await.expect_err("timeout");
        assert!(err.is_timeout());
        assert_eq!(lyra.to_record(), before);
    }

    #[tokio::test]
    async fn empty_reply_becomes_placeholder() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("   ");
        let mut lyra = lyra(&llm);
        let reply = lyra.talk("hm", TalkOptions::default()).await.expect("talk");
        assert_eq!(reply.text, "No response");
    }

    #[tokio::test]
    async fn directives_move_clock_without_auto_advance() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("Let's sleep. [change_time:next_day] Good morning!");
        let mut lyra = lyra(&llm);
        let reply = lyra
            .talk(
                "tired",
                TalkOptions {
                    time_since_last: Some("5m".into()),
                    auto_advance: false,
                },
            )
            .await
            .expect("talk");
        assert_eq!(reply.text, "Let's sleep. Good morning!");
        assert_eq!(reply.time_changes, 1);
        assert_eq!((reply.day(), reply.time_of_day()), (2, TimeOfDay::EarlyMorning));
        assert_eq!(lyra.turn_counter(), 0);
    }

    #[tokio::test]
    async fn summarize_failure_keeps_buffer() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("hi").push_failure("model crashed").push_reply("");
        let mut lyra = lyra(&llm);
        lyra.talk("hello", TalkOptions::default()).await.expect("talk");

        let err = lyra.summarize_and_commit().await.expect_err("failure");
        assert!(matches!(err, SceneError::CompletionService(LlmError::RequestFailed(_))));
        assert_eq!(lyra.memory().short_term().len(), 2);

        assert!(lyra.summarize_and_commit().await.expect("empty").is_none());
        assert_eq!(lyra.memory().short_term().len(), 2);
    }

    #[tokio::test]
    async fn summarize_commits_and_clears() {
        let llm = Arc::new(ScriptedCompletion::new());
        llm.push_reply("hi").push_reply("The guest said hello to Lyra.");
        let mut lyra = lyra(&llm);
        lyra.talk("hello", TalkOptions::default()).await.expect("talk");

        let record = lyra.summarize_and_commit().await.expect("ok").expect("record");
        assert_eq!(record.id, lyra.clock().memory_id());
        assert!(lyra.memory().short_term().is_empty());
        assert_eq!(lyra.memory().long_term().len(), 1);
    }

    #[tokio::test]
    async fn record_round_trip() {
        let llm = Arc::new(ScriptedCompletion::new().with_default("ok"));
        let mut lyra = lyra(&llm);
        lyra.set_user_persona(Persona::new("Mira", "A sailor."));
        lyra.set_time(3, "evening").expect("time");
        lyra.talk("ahoy", TalkOptions { auto_advance: false, ..TalkOptions::default() })
            .await
            .expect("talk");

        let record = lyra.to_record();
        let json = serde_json::to_string(&record).expect("serialize");
        let back: CharacterRecord = serde_json::from_str(&json).expect("deserialize");
        let restored =
            Character::from_record(back, &CharacterSettings::default(), services(llm))
                .expect("restore");
        assert_eq!(restored.to_record(), record);
        assert_eq!(restored.user().name, "Mira");
    }

    #[test]
    fn set_time_rejects_bad_segment() {
        let llm = Arc::new(ScriptedCompletion::new());
        let mut lyra = lyra(&llm);
        assert!(lyra.set_time(2, "brunch").is_err());
        assert_eq!(lyra.clock(), Clock::default());
    }
    #[test]
    fn name_is_stored_trimmed() {
        let llm = Arc::new(ScriptedCompletion::new());
        let lyra = Character::new(
            CharacterProfile::new("  Lyra ", "A wandering bard."),
            &CharacterSettings::default(),
            services(llm),
        )
        .expect("character");
        assert_eq!(lyra.name(), "Lyra");
        assert_eq!(lyra.profile().name, "Lyra");

        let blank = Character::new(
            CharacterProfile::new("   ", ""),
            &CharacterSettings::default(),
            services(Arc::new(ScriptedCompletion::new())),
        );
        assert!(matches!(blank, Err(SceneError::InvalidArgument(_))));
    }
}
