//! Per-character memory: a bounded recent-turn buffer plus a long-term
//! semantic archive of summaries.
//!
//! ```text
//! remember ──▶ ShortTermBuffer (FIFO, cap 20)
//!                    │ summarize (external) ──▶ non-empty? ──▶ SemanticIndex.upsert
//!                    └──────────────── clear ◀──────────────────────┘
//! ```

pub mod long_term;
pub mod short_term;

pub use long_term::{
    IndexProvider, LongTermRecord, RecordMetadata, SemanticIndex, VectorIndex, VectorIndexProvider,
};
pub use short_term::ShortTermBuffer;

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{Clock, TimeOfDay};
use crate::error::Result;
use crate::types::Role;

/// One recorded turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Who produced the turn.
    pub role: Role,
    /// Turn text as stored (user turns carry their speaker prefix).
    pub content: String,
    /// Opaque "time since last" marker supplied by the caller.
    pub time_delta: String,
    /// Day the turn happened on.
    pub day: u32,
    /// Segment the turn happened in.
    pub time_of_day: TimeOfDay,
}

impl MemoryEntry {
    /// Create an entry stamped with `clock`'s current position.
    #[must_use]
    pub fn new(
        role: Role,
        content: impl Into<String>,
        time_delta: impl Into<String>,
        clock: &Clock,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            time_delta: time_delta.into(),
            day: clock.day(),
            time_of_day: clock.time_of_day(),
        }
    }
}

/// Short-term buffer and long-term index owned by a single character.
pub struct MemoryTiers {
    short_term: ShortTermBuffer,
    long_term: Arc<dyn SemanticIndex>,
    top_k: usize,
}

impl std::fmt::Debug for MemoryTiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTiers")
            .field("short_term", &self.short_term.len())
            .field("long_term", &self.long_term.len())
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl MemoryTiers {
    /// Create tiers with an empty buffer of `capacity` over `long_term`.
    #[must_use]
    pub fn new(capacity: usize, long_term: Arc<dyn SemanticIndex>, top_k: usize) -> Self {
        Self {
            short_term: ShortTermBuffer::with_capacity(capacity),
            long_term,
            top_k,
        }
    }

    /// Append a turn, evicting the oldest beyond capacity.
    pub fn remember(&mut self, entry: MemoryEntry) {
        if let Some(evicted) = self.short_term.push(entry) {
            debug!(role = %evicted.role, "Evicted oldest short-term entry");
        }
    }

    /// Read access to the recent-turn buffer.
    #[must_use]
    pub fn short_term(&self) -> &ShortTermBuffer {
        &self.short_term
    }

    /// Replace the buffer contents, keeping the configured capacity.
    pub fn restore_short_term(&mut self, entries: impl IntoIterator<Item = MemoryEntry>) {
        self.short_term.clear();
        for entry in entries {
            self.short_term.push(entry);
        }
    }

    /// Handle to the long-term index.
    #[must_use]
    pub fn long_term(&self) -> &Arc<dyn SemanticIndex> {
        &self.long_term
    }

    /// Default number of long-term passages pulled into a turn.
    #[must_use]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Up to `k` long-term summaries related to `prompt`.
    ///
    /// # Errors
    /// Propagates index failures.
    pub async fn query(&self, prompt: &str, k: usize) -> Result<Vec<String>> {
        self.long_term.query(prompt, k).await
    }

    /// The buffer rendered as `role: content` lines, for a summarizer prompt.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.short_term
            .iter()
            .fold(String::new(), |mut out, entry| {
                let _ = writeln!(out, "{}: {}", entry.role, entry.content);
                out
            })
    }

    /// Commit a produced summary and clear the buffer.
    ///
    /// A blank summary commits nothing and leaves the buffer untouched, as does
    /// a failed upsert. Returns the stored record on success.
    ///
    /// # Errors
    /// Propagates index failures; the buffer is unchanged in that case.
    pub async fn commit_summary(
        &mut self,
        summary: &str,
        clock: &Clock,
    ) -> Result<Option<LongTermRecord>> {
        let summary = summary.trim();
        if summary.is_empty() {
            debug!(clock = %clock, "Empty summary, short-term buffer kept");
            return Ok(None);
        }

        let record = LongTermRecord::at(clock, summary);
        self.long_term.upsert(record.clone()).await?;
        let dropped = self.short_term.len();
        self.short_term.clear();
        info!(id = %record.id, dropped, "Committed long-term summary");
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbeddingProvider;
    use crate::error::ChorusError;
    use async_trait::async_trait;

    struct BrokenIndex;

    #[async_trait]
    impl SemanticIndex for BrokenIndex {
        async fn upsert(&self, _record: LongTermRecord) -> Result<()> {
            Err(ChorusError::Index("disk full".to_string()))
        }
        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn len(&self) -> usize {
            0
        }
    }

    fn tiers() -> MemoryTiers {
        let index = VectorIndex::new(Arc::new(HashingEmbeddingProvider::default()));
        MemoryTiers::new(20, Arc::new(index), 2)
    }

    fn say(tiers: &mut MemoryTiers, text: &str) {
        tiers.remember(MemoryEntry::new(Role::User, text, "unknown", &Clock::default()));
    }

    #[tokio::test]
    async fn commit_clears_buffer_and_stores_record() {
        let mut t = tiers();
        say(&mut t, "hello");
        let record = t
            .commit_summary("They greeted each other.", &Clock::default())
            .await
            .expect("commit")
            .expect("record");
        assert_eq!(record.id, "day_1_time_morning");
        assert!(t.short_term().is_empty());
        assert_eq!(t.long_term().len(), 1);
    }

    #[tokio::test]
    async fn blank_summary_keeps_buffer() {
        let mut t = tiers();
        say(&mut t, "hello");
        assert!(t.commit_summary("   ", &Clock::default()).await.expect("ok").is_none());
        assert_eq!(t.short_term().len(), 1);
    }

    #[tokio::test]
    async fn failed_upsert_keeps_buffer() {
        let mut t = MemoryTiers::new(20, Arc::new(BrokenIndex), 2);
        say(&mut t, "hello");
        assert!(t.commit_summary("summary", &Clock::default()).await.is_err());
        assert_eq!(t.short_term().len(), 1);
    }

    #[test]
    fn transcript_lists_roles() {
        let mut t = tiers();
        say(&mut t, "Guest: hi");
        t.remember(MemoryEntry::new(Role::Assistant, "hello", "0s", &Clock::default()));
        assert_eq!(t.transcript(), "user: Guest: hi\nassistant: hello\n");
    }
}
