//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helper functions for vector serialization,
//! similarity computation, and token-budgeted batching.
//!
//! Concrete provider implementations (OpenAI, Ollama, fastembed) live in
//! the `memory-harness` app crate.

use std::ops::Range;

use anyhow::Result;
use async_trait::async_trait;

use crate::chunk::CHARS_PER_TOKEN;
use crate::hash::hash_text;

/// Default token budget for one embedding request.
pub const EMBEDDING_BATCH_MAX_TOKENS: usize = 8000;

/// Trait for embedding providers.
///
/// A provider is selected once when an index is opened and never switched
/// during that index's lifetime. `id`, `model` and `provider_key` are used
/// as embedding-cache and sync-metadata keys.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identifier (e.g. `"openai"`, `"ollama"`, `"local"`).
    fn id(&self) -> &str;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model(&self) -> &str;

    /// Identity binding cached vectors to this exact provider configuration.
    ///
    /// Defaults to a digest of `id` and `model`; remote providers mix in
    /// their endpoint. Credentials must never be part of the key.
    fn provider_key(&self) -> String {
        hash_text(&format!("{}:{}", self.id(), self.model()))
    }

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. The result has the same length and order as
    /// the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero-magnitude vectors. Use [`similarity`] to tell those cases apart.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    similarity(a, b).unwrap_or(0.0)
}

/// Cosine similarity, or `None` when it is undefined (empty or mismatched
/// vectors, zero magnitude, non-finite result).
pub fn similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return None;
    }

    let sim = dot / denom;
    sim.is_finite().then_some(sim)
}

/// True when the vector carries no signal (empty or all zeros).
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

/// Replace non-finite components with zero and L2-normalize.
///
/// Vectors with zero magnitude are returned as zeros.
pub fn sanitize_and_normalize(v: Vec<f32>) -> Vec<f32> {
    let cleaned: Vec<f32> = v
        .into_iter()
        .map(|x| if x.is_finite() { x } else { 0.0 })
        .collect();
    let norm = cleaned.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return cleaned;
    }
    cleaned.into_iter().map(|x| x / norm).collect()
}

/// Encode a vector as a JSON array for storage.
pub fn vector_to_json(v: &[f32]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored JSON vector. Malformed input decodes to an empty vector.
pub fn parse_vector_json(raw: &str) -> Vec<f32> {
    serde_json::from_str::<Vec<f32>>(raw).unwrap_or_default()
}

/// Approximate token count of `text` (`ceil(chars / 4)`).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Group texts into contiguous batches of at most `max_tokens` estimated
/// tokens. A single text over the budget becomes its own batch.
///
/// Returns index ranges into `texts`.
pub fn build_embedding_batches<T: AsRef<str>>(texts: &[T], max_tokens: usize) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut current_tokens = 0usize;

    for (i, text) in texts.iter().enumerate() {
        let estimate = estimate_tokens(text.as_ref());
        if i > start && current_tokens + estimate > max_tokens {
            batches.push(start..i);
            start = i;
            current_tokens = 0;
        }
        current_tokens += estimate;
    }

    if start < texts.len() {
        batches.push(start..texts.len());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_similarity_zero_magnitude_is_undefined() {
        assert_eq!(similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), None);
    }

    #[test]
    fn test_zero_vector() {
        assert!(is_zero_vector(&[]));
        assert!(is_zero_vector(&[0.0, 0.0]));
        assert!(!is_zero_vector(&[0.0, 1e-9]));
    }

    #[test]
    fn test_sanitize_and_normalize() {
        let v = sanitize_and_normalize(vec![3.0, f32::INFINITY, 4.0]);
        assert_eq!(v.len(), 3);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert_eq!(v[1], 0.0);
        assert!((v[2] - 0.8).abs() < 1e-6);
        assert_eq!(sanitize_and_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_malformed_vector_json_is_empty() {
        assert_eq!(parse_vector_json("[0.5,-1.0]"), vec![0.5, -1.0]);
        assert!(parse_vector_json("{not json").is_empty());
        assert!(parse_vector_json("").is_empty());
        assert!(parse_vector_json("[\"a\"]").is_empty());
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_batches_respect_budget() {
        let texts = vec!["a".repeat(40); 5]; // 10 tokens each
        let batches = build_embedding_batches(&texts, 25);
        assert_eq!(batches, vec![0..2, 2..4, 4..5]);
    }

    #[test]
    fn test_oversized_text_gets_own_batch() {
        let texts = vec!["a".repeat(8), "b".repeat(400), "c".repeat(8)];
        let batches = build_embedding_batches(&texts, 20);
        assert_eq!(batches, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_batches_empty_input() {
        let texts: Vec<String> = Vec::new();
        assert!(build_embedding_batches(&texts, 100).is_empty());
    }
}
