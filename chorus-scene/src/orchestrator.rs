//! Process-wide state: the character pool, the narrator registry, the named
//! personas and the snapshot store behind them.
//!
//! Lifecycle:
//!
//! ```text
//! open ──▶ load pool, registry, personas ──▶ seed characters ──▶ default narrator ──▶ save
//!                                                                                     ▲
//!          every mutating call ───────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use chorus_core::embedding::HashingEmbeddingProvider;
use chorus_core::memory::{LongTermRecord, VectorIndexProvider};
use chorus_core::persistence::{SnapshotBatch, SnapshotStore};
use chorus_core::{ChorusConfig, Clock, Persona};
use chorus_llm::{CompletionService, LlmClient, LlmProvider, PromptEngine};

use crate::character::{
    Character, CharacterProfile, CharacterServices, CharacterSettings, TalkOptions, TalkReply,
};
use crate::error::{Result, SceneError};
use crate::narrator::{Narrator, NarratorReply, NarratorSummary};
use crate::pool::{CharacterPool, PoolRecord, SharedCharacter};
use crate::registry::{NarratorRegistry, RegistryRecord};
use crate::suggestion::{SuggestionStatus, SuggestionTicket};

const POOL_KEY: &str = "pool";
const REGISTRY_KEY: &str = "registry";
const PERSONAS_KEY: &str = "personas";

type PersonaStore = BTreeMap<String, Persona>;

/// Owns every character and narrator and keeps the snapshot store current.
pub struct Orchestrator {
    config: ChorusConfig,
    settings: CharacterSettings,
    services: CharacterServices,
    pool: RwLock<CharacterPool>,
    registry: RwLock<NarratorRegistry>,
    personas: RwLock<PersonaStore>,
    store: Arc<SnapshotStore>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("characters", &self.pool.read().len())
            .field("narrators", &self.registry.read().len())
            .field("active", &self.registry.read().active_id())
            .field("personas", &self.personas.read().len())
            .field("store", &self.store.db_path())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Install the default tracing subscriber. See [`crate::telemetry`].
    pub fn init_tracing(log_level: &str) {
        crate::telemetry::init_tracing(log_level);
    }

    /// Build services from `config` and open the engine.
    ///
    /// # Errors
    /// Configuration, provider, prompt-directory and storage errors.
    pub async fn open(config: ChorusConfig) -> Result<Self> {
        let provider = LlmProvider::from_name(
            &config.llm.provider,
            &config.llm.base_url,
            config.llm.api_key.as_deref(),
        )?;
        let llm = LlmClient::new(
            provider,
            config.llm.model.clone(),
            config.llm.max_retries,
            config.llm.request_timeout_ms,
        );
        Self::open_with_llm(config, Arc::new(llm)).await
    }

    /// Open the engine over `llm`, with prompts from `config` and long-term
    /// memory persisted in the snapshot store.
    ///
    /// # Errors
    /// Configuration, prompt-directory and storage errors.
    pub async fn open_with_llm(
        config: ChorusConfig,
        llm: Arc<dyn CompletionService>,
    ) -> Result<Self> {
        config.validate()?;
        let prompts = match &config.llm.prompt_directory {
            Some(dir) => PromptEngine::with_overrides(dir)?,
            None => PromptEngine::builtin(),
        };
        let embedder = HashingEmbeddingProvider::new(config.memory.embedding_dimensions)?;
        let store = Arc::new(SnapshotStore::from_config(&config.persistence)?);
        let services = CharacterServices {
            llm,
            prompts: Arc::new(prompts),
            indexes: Arc::new(VectorIndexProvider::with_store(
                Arc::new(embedder),
                Arc::clone(&store),
            )),
        };
        Self::assemble(config, store, services).await
    }

    /// Open the engine over caller-supplied services. Long-term memory lives
    /// wherever `services.indexes` keeps it.
    ///
    /// # Errors
    /// Configuration and storage errors, or a snapshot that cannot be rebuilt.
    pub async fn with_services(config: ChorusConfig, services: CharacterServices) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SnapshotStore::from_config(&config.persistence)?);
        Self::assemble(config, store, services).await
    }

    /// Load any stored snapshot, create configured characters that are
    /// missing, and create and activate the default narrator when the
    /// registry is empty.
    async fn assemble(
        config: ChorusConfig,
        store: Arc<SnapshotStore>,
        services: CharacterServices,
    ) -> Result<Self> {
        let settings = CharacterSettings::from_config(&config)?;

        let pool = match store.load_record::<PoolRecord>(POOL_KEY)? {
            Some(record) => record.restore(&settings, &services)?,
            None => CharacterPool::new(),
        };
        let registry = match store.load_record::<RegistryRecord>(REGISTRY_KEY)? {
            Some(record) => {
                NarratorRegistry::from_record(record, &services, |name| pool.get(name).ok())?
            }
            None => NarratorRegistry::new(),
        };
        let personas = store
            .load_record::<PersonaStore>(PERSONAS_KEY)?
            .unwrap_or_default();
        info!(
            characters = pool.len(),
            narrators = registry.len(),
            personas = personas.len(),
            store = %store.db_path().display(),
            "Loaded snapshot"
        );

        let orchestrator = Self {
            config,
            settings,
            services,
            pool: RwLock::new(pool),
            registry: RwLock::new(registry),
            personas: RwLock::new(personas),
            store,
        };
        orchestrator.seed_characters()?;
        orchestrator.ensure_default_narrator().await?;
        orchestrator.save().await?;
        Ok(orchestrator)
    }

    fn seed_characters(&self) -> Result<()> {
        for seed in &self.config.characters {
            if self.pool.read().contains(&seed.name) {
                continue;
            }
            let character = Character::new(
                CharacterProfile::from(seed.clone()),
                &self.settings,
                self.services.clone(),
            )?;
            self.pool.write().insert(character)?;
            info!(character = %seed.name, "Seeded character");
        }
        Ok(())
    }

    async fn ensure_default_narrator(&self) -> Result<()> {
        let empty = self.registry.read().is_empty();
        if !empty {
            return Ok(());
        }
        let id = self.config.narrator.default_narrator_id.clone();
        let narrator = self.new_narrator(&id, None);
        let handles = self.pool.read().handles();
        for (_, handle) in handles {
            narrator.add_character(handle).await;
        }
        let mut registry = self.registry.write();
        registry.create(narrator)?;
        registry.set_active(&id)?;
        Ok(())
    }

    fn new_narrator(&self, id: &str, scene: Option<&str>) -> Narrator {
        Narrator::new(
            id,
            scene.unwrap_or(&self.config.narrator.default_scene),
            self.settings.start_clock,
            self.settings.user.clone(),
            self.services.clone(),
        )
    }

    /// Write the pool, registry and personas to the snapshot store in one
    /// transaction.
    ///
    /// # Errors
    /// Serialization and storage errors; nothing is written on failure.
    pub async fn save(&self) -> Result<()> {
        let handles = self.pool.read().handles();
        let pool = PoolRecord::capture(&handles).await;
        let registry = self.registry.read().to_record();
        let personas = self.personas.read().clone();

        let batch = SnapshotBatch::new()
            .put(POOL_KEY, &pool)?
            .put(REGISTRY_KEY, &registry)?
            .put(PERSONAS_KEY, &personas)?;
        self.store.save_records(batch)?;
        debug!(
            characters = pool.characters.len(),
            narrators = registry.narrators.len(),
            personas = personas.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Copy the store to a rotating backup file.
    ///
    /// # Errors
    /// Storage errors, including for an in-memory store.
    pub fn backup(&self) -> Result<()> {
        self.store.backup_rotating()?;
        Ok(())
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &ChorusConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Characters
    // ------------------------------------------------------------------

    /// Create a character in the pool.
    ///
    /// # Errors
    /// [`SceneError::DuplicateIdentity`] if the name is taken; the existing
    /// character is untouched.
    pub async fn create_character(&self, profile: CharacterProfile) -> Result<SharedCharacter> {
        let name = profile.name.trim();
        if self.pool.read().contains(name) {
            return Err(SceneError::DuplicateIdentity(format!("character '{name}'")));
        }
        let character = Character::new(profile, &self.settings, self.services.clone())?;
        let handle = self.pool.write().insert(character)?;
        self.save().await?;
        Ok(handle)
    }

    /// Handle to a pooled character.
    ///
    /// # Errors
    /// [`SceneError::AgentNotFound`].
    pub fn character(&self, name: &str) -> Result<SharedCharacter> {
        self.pool.read().get(name)
    }

    /// Pooled character names, sorted.
    #[must_use]
    pub fn list_characters(&self) -> Vec<String> {
        self.pool.read().names()
    }

    /// Talk to one character directly, outside any scene. A `persona` name
    /// switches the user identity the character sees before the turn.
    ///
    /// # Errors
    /// [`SceneError::AgentNotFound`], [`SceneError::PersonaNotFound`] or any
    /// turn error.
    pub async fn chat_with(
        &self,
        name: &str,
        message: &str,
        time_since_last: Option<String>,
        persona: Option<&str>,
    ) -> Result<TalkReply> {
        let handle = self.character(name)?;
        let persona = persona.map(|p| self.persona(p)).transpose()?;
        let mut character = handle.lock().await;
        if let Some(persona) = persona {
            character.set_user_persona(persona);
        }
        let reply = character
            .talk(
                message,
                TalkOptions {
                    time_since_last,
                    auto_advance: true,
                },
            )
            .await?;
        drop(character);
        self.save().await?;
        Ok(reply)
    }

    /// Fold a character's recent turns into long-term memory.
    ///
    /// # Errors
    /// [`SceneError::AgentNotFound`], completion or index errors.
    pub async fn summarize_character(&self, name: &str) -> Result<Option<LongTermRecord>> {
        let handle = self.character(name)?;
        let record = handle.lock().await.summarize_and_commit().await?;
        self.save().await?;
        Ok(record)
    }

    /// Set a character's clock before its next turn.
    ///
    /// # Errors
    /// [`SceneError::AgentNotFound`] or an invalid time; the clock is unchanged.
    pub async fn set_character_time(
        &self,
        name: &str,
        day: u32,
        time_of_day: &str,
    ) -> Result<Clock> {
        let handle = self.character(name)?;
        let clock = {
            let mut character = handle.lock().await;
            character.set_time(day, time_of_day)?;
            character.clock()
        };
        self.save().await?;
        Ok(clock)
    }

    /// Set the user persona a character sees.
    ///
    /// # Errors
    /// [`SceneError::AgentNotFound`].
    pub async fn set_character_persona(&self, name: &str, persona: Persona) -> Result<()> {
        let handle = self.character(name)?;
        handle.lock().await.set_user_persona(persona);
        self.save().await
    }

    /// Remove a character from the pool and from every narrator, and drop
    /// its long-term memory.
    ///
    /// # Errors
    /// [`SceneError::AgentNotFound`].
    pub async fn remove_character(&self, name: &str) -> Result<()> {
        self.pool
            .write()
            .remove(name)
            .ok_or_else(|| SceneError::AgentNotFound(name.to_string()))?;
        let narrators = self.registry.read().narrators();
        for narrator in narrators {
            narrator.detach_character(name);
        }
        self.services.indexes.forget(name)?;
        info!(character = %name, "Character removed");
        self.save().await
    }

    // ------------------------------------------------------------------
    // Personas
    // ------------------------------------------------------------------

    /// Add a named persona.
    ///
    /// # Errors
    /// [`SceneError::InvalidArgument`] for a blank name, or
    /// [`SceneError::DuplicateIdentity`] if the name is taken.
    pub async fn create_persona(&self, persona: Persona) -> Result<()> {
        let name = persona.name.trim().to_string();
        if name.is_empty() {
            return Err(SceneError::InvalidArgument(
                "persona name must not be empty".to_string(),
            ));
        }
        {
            let mut personas = self.personas.write();
            if personas.contains_key(&name) {
                return Err(SceneError::DuplicateIdentity(format!("persona '{name}'")));
            }
            personas.insert(name.clone(), Persona::new(name.clone(), persona.description));
        }
        info!(persona = %name, "Persona created");
        self.save().await
    }

    /// Replace a persona's description.
    ///
    /// # Errors
    /// [`SceneError::PersonaNotFound`].
    pub async fn edit_persona(&self, name: &str, description: &str) -> Result<Persona> {
        let updated = {
            let mut personas = self.personas.write();
            let persona = personas
                .get_mut(name)
                .ok_or_else(|| SceneError::PersonaNotFound(name.to_string()))?;
            persona.description = description.to_string();
            persona.clone()
        };
        self.save().await?;
        Ok(updated)
    }

    /// Delete a persona. Characters already using it keep their copy.
    ///
    /// # Errors
    /// [`SceneError::PersonaNotFound`].
    pub async fn delete_persona(&self, name: &str) -> Result<()> {
        self.personas
            .write()
            .remove(name)
            .ok_or_else(|| SceneError::PersonaNotFound(name.to_string()))?;
        info!(persona = %name, "Persona deleted");
        self.save().await
    }

    /// Look up a persona by name.
    ///
    /// # Errors
    /// [`SceneError::PersonaNotFound`].
    pub fn persona(&self, name: &str) -> Result<Persona> {
        self.personas
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SceneError::PersonaNotFound(name.to_string()))
    }

    /// Stored personas in name order.
    #[must_use]
    pub fn list_personas(&self) -> Vec<Persona> {
        self.personas.read().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Narrators
    // ------------------------------------------------------------------

    /// Create an empty narrator; activate it if nothing is active.
    ///
    /// # Errors
    /// [`SceneError::DuplicateIdentity`] if the id is taken.
    pub async fn create_narrator(&self, id: &str, scene: Option<&str>) -> Result<Arc<Narrator>> {
        let narrator = {
            let mut registry = self.registry.write();
            let narrator = registry.create(self.new_narrator(id, scene))?;
            if registry.active_id().is_none() {
                registry.set_active(id)?;
            }
            narrator
        };
        self.save().await?;
        Ok(narrator)
    }

    /// Delete a narrator. Its characters stay in the pool.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`].
    pub async fn delete_narrator(&self, id: &str) -> Result<()> {
        self.registry.write().delete(id)?;
        self.save().await
    }

    /// Make `id` the active narrator.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`].
    pub async fn set_active_narrator(&self, id: &str) -> Result<()> {
        self.registry.write().set_active(id)?;
        self.save().await
    }

    /// Look up a narrator.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`].
    pub fn narrator(&self, id: &str) -> Result<Arc<Narrator>> {
        self.registry.read().get(id)
    }

    /// The active narrator.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`] when nothing is active.
    pub fn active_narrator(&self) -> Result<Arc<Narrator>> {
        self.registry
            .read()
            .active()
            .ok_or_else(|| SceneError::NarratorNotFound("no active narrator".to_string()))
    }

    /// Narrator listing in id order.
    #[must_use]
    pub fn list_narrators(&self) -> Vec<NarratorSummary> {
        self.registry.read().list()
    }

    /// Hand a pooled character to a narrator; it joins the scene.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`] or [`SceneError::AgentNotFound`].
    pub async fn add_character_to_narrator(&self, narrator_id: &str, name: &str) -> Result<()> {
        let narrator = self.narrator(narrator_id)?;
        let handle = self.character(name)?;
        narrator.add_character(handle).await;
        self.save().await
    }

    /// Change a narrator's scene and optionally who is present.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`] or [`SceneError::AgentNotFound`].
    pub async fn set_scene(
        &self,
        narrator_id: &str,
        label: &str,
        present: Option<Vec<String>>,
    ) -> Result<()> {
        self.narrator(narrator_id)?.set_scene(label, present).await?;
        self.save().await
    }

    /// Set a narrator's clock; present characters follow.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`] or an invalid time.
    pub async fn set_narrator_time(
        &self,
        narrator_id: &str,
        day: u32,
        time_of_day: &str,
    ) -> Result<Clock> {
        let clock = self.narrator(narrator_id)?.set_time(day, time_of_day).await?;
        self.save().await?;
        Ok(clock)
    }

    /// Set the user persona of a narrator and all of its characters.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`].
    pub async fn set_user_persona(&self, narrator_id: &str, persona: Persona) -> Result<()> {
        self.narrator(narrator_id)?.set_user_persona(persona).await;
        self.save().await
    }

    /// Send a message to the active narrator. A `persona` name switches the
    /// user identity for the narrator and its characters first.
    ///
    /// `/add <name>` also accepts pooled characters the narrator does not own
    /// yet.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`], [`SceneError::PersonaNotFound`] or
    /// any routing or turn error.
    pub async fn narrator_chat(
        &self,
        message: &str,
        time_since_last: Option<String>,
        persona: Option<&str>,
    ) -> Result<NarratorReply> {
        let narrator = self.active_narrator()?;
        if let Some(name) = persona {
            narrator.set_user_persona(self.persona(name)?).await;
        }
        if let Some(name) = add_target(message) {
            if !narrator.has_character(name) {
                let handle = self.pool.read().get(name).ok();
                if let Some(handle) = handle {
                    narrator.add_character(handle).await;
                }
            }
        }
        let reply = narrator.process_message(message, time_since_last).await?;
        self.save().await?;
        Ok(reply)
    }

    /// Ask the active narrator to narrate.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`] or a completion error.
    pub async fn direct_scene(&self, direction: &str) -> Result<NarratorReply> {
        let reply = self.active_narrator()?.direct_scene(direction).await?;
        self.save().await?;
        Ok(reply)
    }

    /// Start a background character suggestion on the active narrator.
    ///
    /// # Errors
    /// [`SceneError::NarratorNotFound`] or a prompt error.
    pub fn suggest_character(&self, request: &str) -> Result<SuggestionTicket> {
        self.active_narrator()?.suggest_character(request)
    }

    /// Status of a suggestion issued by any narrator; a finished result is
    /// returned once.
    #[must_use]
    pub fn suggestion(&self, id: Uuid) -> Option<SuggestionStatus> {
        self.registry
            .read()
            .narrators()
            .iter()
            .find(|n| n.owns_suggestion(id))
            .and_then(|n| n.suggestion(id))
    }

    /// Wait for a suggestion issued by any narrator.
    pub async fn wait_for_suggestion(&self, id: Uuid) -> Option<SuggestionStatus> {
        let owner = self
            .registry
            .read()
            .narrators()
            .into_iter()
            .find(|n| n.owns_suggestion(id))?;
        owner.wait_for_suggestion(id).await
    }
}

fn add_target(message: &str) -> Option<&str> {
    let trimmed = message.trim();
    let (command, rest) = trimmed.split_once(char::is_whitespace)?;
    let name = rest.trim();
    (command.eq_ignore_ascii_case("/add") && !name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_target_parsing() {
        assert_eq!(add_target("/add Kael"), Some("Kael"));
        assert_eq!(add_target("  /ADD  Lyra "), Some("Lyra"));
        assert_eq!(add_target("/add"), None);
        assert_eq!(add_target("/remove Kael"), None);
        assert_eq!(add_target("add Kael"), None);
    }
}
