//! Hybrid retrieval: vector scoring, keyword scoring, and score fusion.
//!
//! The core search routine operates entirely through the [`Store`] trait,
//! with no database or configuration dependencies. The calling application
//! is responsible for embedding the query and constructing [`SearchParams`].
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Reject blank queries with an empty result.
//! 2. Fetch `min(200, max(1, max_results × 3))` candidates from each side.
//! 3. Keyword side: FTS rank (lower is better) → `1 / (1 + max(0, rank))`.
//! 4. Vector side: cosine similarity against every chunk of the model.
//! 5. Merge by chunk id: `score = w_v × vector + w_t × text`, a missing side
//!    contributes zero. The keyword snippet wins on overlap.
//! 6. Sort descending, filter by `min_score`, truncate to `max_results`.
//!
//! A zero query vector skips step 4 and returns keyword-only scores; a store
//! without a full-text index skips step 3 and returns vector-only scores.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::{is_zero_vector, similarity};
use crate::models::{MemorySource, SearchResult};
use crate::store::{KeywordMatch, Store, VectorCandidate};

/// Maximum characters of chunk text returned as a snippet.
pub const SNIPPET_MAX_CHARS: usize = 700;

/// Upper bound on candidates fetched from each retrieval side.
pub const MAX_CANDIDATES: usize = 200;

/// Overfetch factor so the merger has material beyond the top-N of each side.
pub const CANDIDATE_MULTIPLIER: usize = 3;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub max_results: usize,
    pub min_score: f64,
    pub vector_weight: f64,
    pub text_weight: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_results: 6,
            min_score: 0.35,
            vector_weight: 0.7,
            text_weight: 0.3,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding. `None` or an all-zero vector disables
    /// vector scoring.
    pub query_vec: Option<&'a [f32]>,
    /// Only chunks embedded with this model are considered.
    pub model: &'a str,
    pub params: SearchParams,
}

/// One ranked hit from a single retrieval side.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub path: String,
    pub source: MemorySource,
    pub start_line: usize,
    pub end_line: usize,
    pub snippet: String,
    pub score: f64,
}

/// A merged hit with its per-side scoring breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridResult {
    pub id: String,
    pub path: String,
    pub source: MemorySource,
    pub start_line: usize,
    pub end_line: usize,
    pub snippet: String,
    pub score: f64,
    pub vector_score: f64,
    pub text_score: f64,
}

/// Number of candidates to fetch from each side for `max_results` hits.
pub fn candidate_limit(max_results: usize) -> usize {
    max_results
        .saturating_mul(CANDIDATE_MULTIPLIER)
        .clamp(1, MAX_CANDIDATES)
}

/// Cut chunk text down to [`SNIPPET_MAX_CHARS`] characters.
pub fn truncate_snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_MAX_CHARS) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Rank candidates by cosine similarity to `query_vec`.
///
/// Candidates whose similarity is undefined (zero magnitude, dimension
/// mismatch) are dropped. Ties keep the input order. The result is
/// truncated to `limit` after sorting.
pub fn score_vector_candidates(
    query_vec: &[f32],
    candidates: Vec<VectorCandidate>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .filter_map(|c| {
            let sim = similarity(query_vec, &c.embedding)?;
            Some(ScoredChunk {
                snippet: truncate_snippet(&c.text),
                id: c.id,
                path: c.path,
                source: c.source,
                start_line: c.start_line,
                end_line: c.end_line,
                score: sim as f64,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}

/// Convert a BM25-style rank (lower is better) into a score in `(0, 1]`.
///
/// Non-positive ranks map to `1.0`, rank `1` to `0.5`, and the score decays
/// towards zero as the rank grows. Non-finite ranks are treated as very
/// poor matches.
pub fn bm25_rank_to_score(rank: f64) -> f64 {
    let normalized = if rank.is_finite() { rank.max(0.0) } else { 999.0 };
    1.0 / (1.0 + normalized)
}

/// Build a conjunctive full-text query from free text.
///
/// The query is split on non-word characters; every token is quoted and
/// the tokens are `AND`-joined. Returns `None` when no tokens remain.
///
/// ```rust
/// use memory_harness_core::search::build_fts_query;
///
/// assert_eq!(build_fts_query("deploy k8s-cluster"),
///            Some("\"deploy\" AND \"k8s\" AND \"cluster\"".to_string()));
/// assert_eq!(build_fts_query("  ?! "), None);
/// ```
pub fn build_fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" AND "))
    }
}

/// Convert raw full-text matches into scored hits, best rank first.
pub fn score_keyword_matches(mut matches: Vec<KeywordMatch>, limit: usize) -> Vec<ScoredChunk> {
    matches.sort_by(|a, b| a.rank.total_cmp(&b.rank));
    matches.truncate(limit);
    matches
        .into_iter()
        .map(|m| ScoredChunk {
            score: bm25_rank_to_score(m.rank),
            snippet: truncate_snippet(&m.text),
            id: m.id,
            path: m.path,
            source: m.source,
            start_line: m.start_line,
            end_line: m.end_line,
        })
        .collect()
}

/// Union vector and keyword hits by id and rank them by weighted score.
///
/// A hit found by one side only scores `weight × its own score`; the
/// weights are used as given, without renormalization. On overlap the
/// keyword snippet replaces the vector snippet. The output is sorted by
/// descending score and is not filtered or truncated.
pub fn merge_hybrid_results(
    vector: &[ScoredChunk],
    keyword: &[ScoredChunk],
    vector_weight: f64,
    text_weight: f64,
) -> Vec<HybridResult> {
    let mut merged: Vec<HybridResult> = Vec::with_capacity(vector.len() + keyword.len());
    let mut by_id: HashMap<&str, usize> = HashMap::new();

    for hit in vector {
        if by_id.contains_key(hit.id.as_str()) {
            continue;
        }
        by_id.insert(hit.id.as_str(), merged.len());
        merged.push(HybridResult {
            id: hit.id.clone(),
            path: hit.path.clone(),
            source: hit.source,
            start_line: hit.start_line,
            end_line: hit.end_line,
            snippet: hit.snippet.clone(),
            score: 0.0,
            vector_score: hit.score,
            text_score: 0.0,
        });
    }

    for hit in keyword {
        match by_id.get(hit.id.as_str()) {
            Some(&idx) => {
                let existing = &mut merged[idx];
                debug_assert_eq!(existing.path, hit.path);
                debug_assert_eq!(
                    (existing.start_line, existing.end_line),
                    (hit.start_line, hit.end_line)
                );
                existing.text_score = hit.score;
                if !hit.snippet.is_empty() {
                    existing.snippet = hit.snippet.clone();
                }
            }
            None => {
                by_id.insert(hit.id.as_str(), merged.len());
                merged.push(HybridResult {
                    id: hit.id.clone(),
                    path: hit.path.clone(),
                    source: hit.source,
                    start_line: hit.start_line,
                    end_line: hit.end_line,
                    snippet: hit.snippet.clone(),
                    score: 0.0,
                    vector_score: 0.0,
                    text_score: hit.score,
                });
            }
        }
    }

    for r in &mut merged {
        r.score = vector_weight * r.vector_score + text_weight * r.text_score;
    }
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}

/// Run a hybrid search against a [`Store`] backend.
///
/// This is the core search function that all frontends delegate to.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> Result<Vec<SearchResult>> {
    let query = req.query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let params = &req.params;
    let limit = candidate_limit(params.max_results);

    let keyword = if store.keyword_search_available() {
        let hits = match build_fts_query(query) {
            Some(fts) => {
                let matches = store.keyword_search(&fts, req.model, limit).await?;
                score_keyword_matches(matches, limit)
            }
            None => Vec::new(),
        };
        Some(hits)
    } else {
        None
    };

    let query_vec = req.query_vec.filter(|v| !is_zero_vector(v));

    let results = match (query_vec, keyword) {
        (None, Some(keyword)) => finalize(keyword.into_iter().map(single_side), params),
        (None, None) => Vec::new(),
        (Some(qv), None) => {
            let candidates = store.vector_candidates(req.model).await?;
            let vector = score_vector_candidates(qv, candidates, limit);
            finalize(vector.into_iter().map(single_side), params)
        }
        (Some(qv), Some(keyword)) => {
            let candidates = store.vector_candidates(req.model).await?;
            let vector = score_vector_candidates(qv, candidates, limit);
            let merged =
                merge_hybrid_results(&vector, &keyword, params.vector_weight, params.text_weight);
            finalize(merged.into_iter().map(hybrid_to_result), params)
        }
    };

    Ok(results)
}

fn single_side(hit: ScoredChunk) -> SearchResult {
    SearchResult {
        path: hit.path,
        start_line: hit.start_line,
        end_line: hit.end_line,
        score: hit.score,
        snippet: hit.snippet,
        source: hit.source,
    }
}

fn hybrid_to_result(hit: HybridResult) -> SearchResult {
    SearchResult {
        path: hit.path,
        start_line: hit.start_line,
        end_line: hit.end_line,
        score: hit.score,
        snippet: hit.snippet,
        source: hit.source,
    }
}

fn finalize(
    results: impl Iterator<Item = SearchResult>,
    params: &SearchParams,
) -> Vec<SearchResult> {
    results
        .filter(|r| r.score >= params.min_score)
        .take(params.max_results)
        .collect()
}
