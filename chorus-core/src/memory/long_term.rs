//! Long-term memory: summaries in a semantically searchable index.
//!
//! The index is a collaborator behind [`SemanticIndex`]; the core only relies
//! on idempotent upsert-by-id and top-k similarity lookup. [`VectorIndex`] is
//! the in-process implementation used by default; given a [`SnapshotStore`]
//! it writes every upsert through to the `long_term` table and reloads those
//! rows when an owner's index is first opened.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, TimeOfDay};
use crate::embedding::{Embedding, EmbeddingProvider, cosine_similarity};
use crate::error::Result;
use crate::persistence::SnapshotStore;

/// Where on the narrative clock a summary was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Day of the commit.
    pub day: u32,
    /// Segment of the commit.
    pub time_of_day: TimeOfDay,
}

/// One condensed summary of a stretch of conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongTermRecord {
    /// `day_<D>_time_<T>`; re-committing in the same slot overwrites.
    pub id: String,
    /// The summary text.
    pub summary: String,
    /// Clock position of the commit.
    pub metadata: RecordMetadata,
}

impl LongTermRecord {
    /// Build a record keyed by `clock`'s deterministic memory id.
    #[must_use]
    pub fn at(clock: &Clock, summary: impl Into<String>) -> Self {
        Self {
            id: clock.memory_id(),
            summary: summary.into(),
            metadata: RecordMetadata {
                day: clock.day(),
                time_of_day: clock.time_of_day(),
            },
        }
    }
}

/// A nearest-neighbour text index.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Insert `record`, replacing any record with the same id.
    ///
    /// # Errors
    /// Returns [`crate::ChorusError::Index`] if the index rejects the write.
    async fn upsert(&self, record: LongTermRecord) -> Result<()>;

    /// Up to `k` summaries, most similar to `text` first. Zero hits is `Ok(vec![])`.
    ///
    /// # Errors
    /// Returns [`crate::ChorusError::Index`] if the lookup fails.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>>;

    /// Number of stored records.
    fn len(&self) -> usize;

    /// `true` when nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct IndexedRecord {
    record: LongTermRecord,
    embedding: Embedding,
}

struct StoreSink {
    store: Arc<SnapshotStore>,
    owner: String,
}

/// In-process cosine-similarity index over an [`EmbeddingProvider`].
pub struct VectorIndex {
    provider: Arc<dyn EmbeddingProvider>,
    records: RwLock<Vec<IndexedRecord>>,
    sink: Option<StoreSink>,
}

impl VectorIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            records: RwLock::new(Vec::new()),
            sink: None,
        }
    }

    /// Load `owner`'s persisted summaries from `store` and write every later
    /// upsert back to it.
    ///
    /// # Errors
    /// Returns [`crate::ChorusError::Database`] if the rows cannot be read,
    /// or an embedding error for a stored summary.
    pub fn persistent(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<SnapshotStore>,
        owner: &str,
    ) -> Result<Self> {
        let records = store
            .load_long_term(owner)?
            .into_iter()
            .map(|record| {
                let embedding = provider.embed(&record.summary)?;
                Ok(IndexedRecord { record, embedding })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(owner, restored = records.len(), "Opened persistent long-term index");
        Ok(Self {
            provider,
            records: RwLock::new(records),
            sink: Some(StoreSink {
                store,
                owner: owner.to_string(),
            }),
        })
    }

    /// Stored records in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<LongTermRecord> {
        self.records.read().iter().map(|r| r.record.clone()).collect()
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("model", &self.provider.model_name())
            .field("records", &self.records.read().len())
            .field("persistent", &self.sink.is_some())
            .finish()
    }
}

#[async_trait]
impl SemanticIndex for VectorIndex {
    async fn upsert(&self, record: LongTermRecord) -> Result<()> {
        let embedding = self.provider.embed(&record.summary)?;
        if let Some(sink) = &self.sink {
            sink.store.save_long_term(&sink.owner, &record)?;
        }
        let mut records = self.records.write();
        if let Some(existing) = records.iter_mut().find(|r| r.record.id == record.id) {
            debug!(id = %record.id, "Overwriting long-term record");
            existing.record = record;
            existing.embedding = embedding;
        } else {
            records.push(IndexedRecord { record, embedding });
        }
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let target = self.provider.embed(text)?;
        let records = self.records.read();
        let mut scored: Vec<(f32, &LongTermRecord)> = records
            .iter()
            .map(|r| (cosine_similarity(&target, &r.embedding), &r.record))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, r)| r.summary.clone())
            .collect())
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Hands out one long-term index per character.
pub trait IndexProvider: Send + Sync {
    /// The index owned by `owner`. Repeated calls return the same store.
    ///
    /// # Errors
    /// Returns [`crate::ChorusError::Index`] if the backing store cannot be opened.
    fn open(&self, owner: &str) -> Result<Arc<dyn SemanticIndex>>;

    /// Discard everything stored for `owner`, so a later [`open`](Self::open)
    /// starts empty.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be cleared.
    fn forget(&self, owner: &str) -> Result<()>;
}

/// [`IndexProvider`] backed by shared [`VectorIndex`]es, optionally persisted
/// in a [`SnapshotStore`].
pub struct VectorIndexProvider {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Option<Arc<SnapshotStore>>,
    indexes: Mutex<HashMap<String, Arc<VectorIndex>>>,
}

impl VectorIndexProvider {
    /// Create a provider whose indexes embed with `embedder` and live only in
    /// memory.
    #[must_use]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            store: None,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Create a provider whose indexes are persisted in `store`.
    #[must_use]
    pub fn with_store(embedder: Arc<dyn EmbeddingProvider>, store: Arc<SnapshotStore>) -> Self {
        Self {
            embedder,
            store: Some(store),
            indexes: Mutex::new(HashMap::new()),
        }
    }
}

impl IndexProvider for VectorIndexProvider {
    fn open(&self, owner: &str) -> Result<Arc<dyn SemanticIndex>> {
        let mut indexes = self.indexes.lock();
        if let Some(index) = indexes.get(owner) {
            return Ok(Arc::clone(index) as Arc<dyn SemanticIndex>);
        }
        let embedder = Arc::clone(&self.embedder);
        let index = Arc::new(match &self.store {
            Some(store) => VectorIndex::persistent(embedder, Arc::clone(store), owner)?,
            None => VectorIndex::new(embedder),
        });
        indexes.insert(owner.to_string(), Arc::clone(&index));
        Ok(index as Arc<dyn SemanticIndex>)
    }

    fn forget(&self, owner: &str) -> Result<()> {
        self.indexes.lock().remove(owner);
        if let Some(store) = &self.store {
            let removed = store.delete_long_term(owner)?;
            debug!(owner, removed, "Forgot long-term records");
        }
        Ok(())
    }
}
