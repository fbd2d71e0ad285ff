//! Background character suggestions, retrievable by id.
//!
//! A finished result is handed out once: the first [`SuggestionBoard::status`]
//! or [`SuggestionBoard::wait`] that sees it removes the slot.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Progress of a suggestion task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SuggestionStatus {
    /// Still generating.
    Pending,
    /// Finished with this text.
    Ready(String),
    /// Gave up with this reason.
    Failed(String),
}

impl SuggestionStatus {
    /// `true` while the task is running.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Outcome of asking for a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionTicket {
    /// Another narrator task was running; nothing was started.
    Busy,
    /// Started; poll or await with this id.
    Pending {
        /// Retrieval id.
        id: Uuid,
    },
}

/// Shared table of in-flight and unclaimed suggestion results.
#[derive(Debug, Clone, Default)]
pub struct SuggestionBoard {
    slots: Arc<Mutex<HashMap<Uuid, watch::Receiver<SuggestionStatus>>>>,
}

impl SuggestionBoard {
    /// An empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot in the pending state; the task publishes through the sender.
    #[must_use]
    pub fn open(&self) -> (Uuid, watch::Sender<SuggestionStatus>) {
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(SuggestionStatus::Pending);
        self.slots.lock().insert(id, rx);
        (id, tx)
    }

    /// Current status, or `None` for an unknown or already claimed id. A
    /// finished status is returned once and its slot dropped.
    #[must_use]
    pub fn status(&self, id: Uuid) -> Option<SuggestionStatus> {
        let mut slots = self.slots.lock();
        let rx = slots.get(&id)?;
        let mut status = rx.borrow().clone();
        if status.is_pending() && rx.has_changed().is_err() {
            status = abandoned();
        }
        if !status.is_pending() {
            slots.remove(&id);
        }
        Some(status)
    }

    /// `true` if `id` was issued by this board.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.slots.lock().contains_key(&id)
    }

    /// Wait until the task finishes and claim the result. `None` for an
    /// unknown or already claimed id.
    pub async fn wait(&self, id: Uuid) -> Option<SuggestionStatus> {
        let mut rx = self.slots.lock().get(&id).cloned()?;
        let status = match rx.wait_for(|status| !status.is_pending()).await {
            Ok(status) => status.clone(),
            Err(_) => abandoned(),
        };
        self.slots.lock().remove(&id);
        Some(status)
    }

    /// Slots not yet claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// `true` when every suggestion has been claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

fn abandoned() -> SuggestionStatus {
    SuggestionStatus::Failed("suggestion task ended without a result".to_string())
}
