//! Name-keyed pool of characters shared between direct chat and narrators.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::character::{Character, CharacterRecord, CharacterServices, CharacterSettings};
use crate::error::{Result, SceneError};

/// A character that several narrators may hold; turns serialize on the lock.
pub type SharedCharacter = Arc<Mutex<Character>>;

/// Owns every character by name.
#[derive(Debug, Default)]
pub struct CharacterPool {
    characters: BTreeMap<String, SharedCharacter>,
}

impl CharacterPool {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a character. An existing character with the same name is kept.
    ///
    /// # Errors
    /// Returns [`SceneError::DuplicateIdentity`] if the name is taken.
    pub fn insert(&mut self, character: Character) -> Result<SharedCharacter> {
        let name = character.name().to_string();
        if self.characters.contains_key(&name) {
            return Err(SceneError::DuplicateIdentity(format!("character '{name}'")));
        }
        let handle = Arc::new(Mutex::new(character));
        self.characters.insert(name, Arc::clone(&handle));
        Ok(handle)
    }

    /// Handle to a character.
    ///
    /// # Errors
    /// Returns [`SceneError::AgentNotFound`].
    pub fn get(&self, name: &str) -> Result<SharedCharacter> {
        self.characters
            .get(name)
            .cloned()
            .ok_or_else(|| SceneError::AgentNotFound(name.to_string()))
    }

    /// Remove a character, returning its handle.
    pub fn remove(&mut self, name: &str) -> Option<SharedCharacter> {
        self.characters.remove(name)
    }

    /// `true` if `name` is owned by the pool.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.characters.contains_key(name)
    }

    /// Character names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.characters.keys().cloned().collect()
    }

    /// Handles in name order.
    #[must_use]
    pub fn handles(&self) -> Vec<(String, SharedCharacter)> {
        self.characters
            .iter()
            .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
            .collect()
    }

    /// Number of characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    /// `true` if the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

/// Serializable snapshot of the pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    /// Characters in name order.
    pub characters: Vec<CharacterRecord>,
}

impl PoolRecord {
    /// Snapshot every character in `handles`, waiting for in-flight turns.
    pub async fn capture(handles: &[(String, SharedCharacter)]) -> Self {
        let mut characters = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            characters.push(handle.lock().await.to_record());
        }
        Self { characters }
    }

    /// Rebuild a pool.
    ///
    /// # Errors
    /// Returns [`SceneError::DuplicateIdentity`] if two records share a name,
    /// or any error from [`Character::from_record`].
    pub fn restore(
        self,
        settings: &CharacterSettings,
        services: &CharacterServices,
    ) -> Result<CharacterPool> {
        let mut pool = CharacterPool::new();
        for record in self.characters {
            pool.insert(Character::from_record(record, settings, services.clone())?)?;
        }
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::CharacterProfile;
    use chorus_core::embedding::HashingEmbeddingProvider;
    use chorus_core::memory::VectorIndexProvider;
    use chorus_llm::{PromptEngine, ScriptedCompletion};

    fn services() -> CharacterServices {
        CharacterServices {
            llm: Arc::new(ScriptedCompletion::new()),
            prompts: Arc::new(PromptEngine::builtin()),
            indexes: Arc::new(VectorIndexProvider::new(Arc::new(
                HashingEmbeddingProvider::default(),
            ))),
        }
    }

    fn character(name: &str, background: &str) -> Character {
        Character::new(
            CharacterProfile::new(name, background),
            &CharacterSettings::default(),
            services(),
        )
        .expect("character")
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_original() {
        let mut pool = CharacterPool::new();
        pool.insert(character("Lyra", "original")).expect("first");
        let err = pool.insert(character("Lyra", "impostor")).expect_err("dup");
        assert!(matches!(err, SceneError::DuplicateIdentity(_)));

        let lyra = pool.get("Lyra").expect("lyra");
        assert_eq!(lyra.lock().await.profile().background, "original");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn missing_character_is_not_found() {
        let pool = CharacterPool::new();
        assert!(matches!(pool.get("Kael"), Err(SceneError::AgentNotFound(n)) if n == "Kael"));
    }

    #[tokio::test]
    async fn names_are_sorted_and_snapshot_follows() {
        let mut pool = CharacterPool::new();
        pool.insert(character("Kael", "")).expect("kael");
        pool.insert(character("Lyra", "")).expect("lyra");
        pool.insert(character("Azra", "")).expect("azra");
        assert_eq!(pool.names(), ["Azra", "Kael", "Lyra"]);

        let record = PoolRecord::capture(&pool.handles()).await;
        let names: Vec<_> = record.characters.iter().map(|r| r.profile.name.as_str()).collect();
        assert_eq!(names, ["Azra", "Kael", "Lyra"]);

        let restored = record
            .clone()
            .restore(&CharacterSettings::default(), &services())
            .expect("restore");
        assert_eq!(restored.names(), pool.names());
        assert_eq!(PoolRecord::capture(&restored.handles()).await, record);

        assert!(pool.remove("Kael").is_some());
        assert!(!pool.contains("Kael"));
    }
}
