//! Named narrators with at most one active.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::character::CharacterServices;
use crate::error::{Result, SceneError};
use crate::narrator::{Narrator, NarratorRecord, NarratorSummary};
use crate::pool::SharedCharacter;

/// Serializable snapshot of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Narrators in id order.
    pub narrators: Vec<NarratorRecord>,
    /// Active narrator, if any.
    #[serde(default)]
    pub active_id: Option<String>,
}

/// Id-keyed narrators. `active` always names an existing entry or is unset.
#[derive(Debug, Default)]
pub struct NarratorRegistry {
    narrators: BTreeMap<String, Arc<Narrator>>,
    active: Option<String>,
}

impl NarratorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a narrator under its id.
    ///
    /// # Errors
    /// Returns [`SceneError::DuplicateIdentity`]; the existing entry is kept.
    pub fn create(&mut self, narrator: Narrator) -> Result<Arc<Narrator>> {
        let id = narrator.id().to_string();
        if self.narrators.contains_key(&id) {
            return Err(SceneError::DuplicateIdentity(format!("narrator '{id}'")));
        }
        let narrator = Arc::new(narrator);
        self.narrators.insert(id.clone(), Arc::clone(&narrator));
        info!(narrator = %id, "Narrator created");
        Ok(narrator)
    }

    /// Look up a narrator.
    ///
    /// # Errors
    /// Returns [`SceneError::NarratorNotFound`].
    pub fn get(&self, id: &str) -> Result<Arc<Narrator>> {
        self.narrators
            .get(id)
            .cloned()
            .ok_or_else(|| SceneError::NarratorNotFound(id.to_string()))
    }

    /// Make `id` the active narrator.
    ///
    /// # Errors
    /// Returns [`SceneError::NarratorNotFound`]; the active id is unchanged.
    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.narrators.contains_key(id) {
            return Err(SceneError::NarratorNotFound(id.to_string()));
        }
        self.active = Some(id.to_string());
        info!(narrator = %id, "Active narrator changed");
        Ok(())
    }

    /// The active narrator, if any.
    #[must_use]
    pub fn active(&self) -> Option<Arc<Narrator>> {
        self.active
            .as_deref()
            .and_then(|id| self.narrators.get(id))
            .cloned()
    }

    /// Id of the active narrator.
    #[must_use]
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Remove a narrator; clears the active id if it pointed there.
    ///
    /// # Errors
    /// Returns [`SceneError::NarratorNotFound`].
    pub fn delete(&mut self, id: &str) -> Result<Arc<Narrator>> {
        let removed = self
            .narrators
            .remove(id)
            .ok_or_else(|| SceneError::NarratorNotFound(id.to_string()))?;
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        info!(narrator = %id, "Narrator deleted");
        Ok(removed)
    }

    /// Listing in id order.
    #[must_use]
    pub fn list(&self) -> Vec<NarratorSummary> {
        self.narrators
            .iter()
            .map(|(id, n)| n.summary(self.active.as_deref() == Some(id.as_str())))
            .collect()
    }

    /// Every narrator, in id order.
    #[must_use]
    pub fn narrators(&self) -> Vec<Arc<Narrator>> {
        self.narrators.values().cloned().collect()
    }

    /// Number of narrators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.narrators.len()
    }

    /// `true` if there are no narrators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.narrators.is_empty()
    }

    /// Snapshot for persistence.
    #[must_use]
    pub fn to_record(&self) -> RegistryRecord {
        RegistryRecord {
            narrators: self.narrators.values().map(|n| n.to_record()).collect(),
            active_id: self.active.clone(),
        }
    }

    /// Rebuild from a snapshot. A dangling active id is dropped.
    ///
    /// # Errors
    /// Returns [`SceneError::DuplicateIdentity`] if two records share an id.
    pub fn from_record(
        record: RegistryRecord,
        services: &CharacterServices,
        lookup: impl Fn(&str) -> Option<SharedCharacter>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for narrator in record.narrators {
            registry.create(Narrator::from_record(narrator, services.clone(), &lookup))?;
        }
        if let Some(id) = record.active_id {
            if registry.set_active(&id).is_err() {
                tracing::warn!(narrator = %id, "Active narrator missing from snapshot");
            }
        }
        Ok(registry)
    }
}
