//! Text embeddings for the long-term semantic index.
//!
//! The index only needs "similar text lands near similar text". The default
//! [`HashingEmbeddingProvider`] gets there without a model download: each
//! lowercase word is hashed into a fixed number of buckets, the counts are
//! L2-normalised, and cosine similarity does the rest.

use serde::{Deserialize, Serialize};

use crate::error::{ChorusError, Result};

/// A dense embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` for the zero-dimensional embedding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync` so one provider can back many indexes.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Index`] if the provider cannot produce an embedding.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of texts. Defaults to calling `embed` in a loop.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding in the batch fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Cosine similarity
// ---------------------------------------------------------------------------

/// Cosine similarity between two embeddings, in \[-1.0, 1.0\].
///
/// Mismatched dimensions or a zero-magnitude side yield `0.0`.
#[must_use]
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    if a.0.len() != b.0.len() {
        return 0.0;
    }

    let (dot, mag_a, mag_b) = a
        .0
        .iter()
        .zip(b.0.iter())
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(d, ma, mb), (x, y)| {
            (d + x * y, ma + x * x, mb + y * y)
        });

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

// ---------------------------------------------------------------------------
// Feature-hashing provider
// ---------------------------------------------------------------------------

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic bag-of-words embeddings via FNV-1a feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing `dimensions`-wide vectors.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::Config`] if `dimensions` is 0.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(ChorusError::Config(
                "embedding dimensions must be at least 1".to_string(),
            ));
        }
        Ok(Self { dims: dimensions })
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut buckets = vec![0.0_f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let slot = (fnv1a(&word) % self.dims as u64) as usize;
            buckets[slot] += 1.0;
        }

        let mag = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag >= f32::EPSILON {
            for x in &mut buckets {
                *x /= mag;
            }
        }
        Ok(Embedding(buckets))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "fnv1a-bag-of-words"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let a = Embedding(vec![1.0, 0.0, 0.0]);
        assert!((cosine_similarity(&a, &a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = Embedding(vec![1.0, 0.0]);
        let b = Embedding(vec![0.0, 1.0]);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_dimensions() {
        let a = Embedding(vec![1.0, 0.0]);
        let b = Embedding(vec![1.0, 0.0, 0.0]);
        assert!(cosine_similarity(&a, &b).abs() < f32::EPSILON);
    }

    #[test]
    fn hashing_is_deterministic_and_case_insensitive() {
        let provider = HashingEmbeddingProvider::new(64).expect("provider");
        let a = provider.embed("The Dragon sleeps").expect("embed");
        let b = provider.embed("the dragon SLEEPS").expect("embed");
        assert_eq!(a, b);
        let mag: f32 = a.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((mag - 1.0).abs() < 1e-4);
    }

    #[test]
    fn overlapping_text_scores_higher() {
        let provider = HashingEmbeddingProvider::default();
        let query = provider.embed("where is the dragon").expect("embed");
        let near = provider.embed("we saw the dragon by the river").expect("embed");
        let far = provider.embed("bread prices rose at market").expect("embed");
        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let provider = HashingEmbeddingProvider::new(8).expect("provider");
        let emb = provider.embed("  ...  ").expect("embed");
        assert_eq!(emb.len(), 8);
        assert!(emb.0.iter().all(|x| x.abs() < f32::EPSILON));
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(HashingEmbeddingProvider::new(0).is_err());
    }

    #[test]
    fn batch_embed_works() {
        let provider = HashingEmbeddingProvider::new(8).expect("provider");
        let results = provider.embed_batch(&["a", "b", "c"]).expect("batch");
        assert_eq!(results.len(), 3);
    }
}
