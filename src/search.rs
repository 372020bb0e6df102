//! Hybrid retrieval over indexed chunks.
//!
//! Keyword candidates come from the FTS5 mirror (BM25 rank), semantic
//! candidates from cosine similarity over stored embeddings. Each channel
//! is min-max normalized to [0, 1] and blended with
//! `hybrid = (1 - alpha) * keyword + alpha * semantic`. Results are
//! chunk-level so hits point at the exact section, with deterministic
//! tie-breaking on chunk id.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

use crate::config::Config;
use crate::embedding::{self, Embedder};

const CANDIDATE_K: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!(
                "unknown search mode: {}. Use keyword, semantic, or hybrid",
                other
            )),
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub title: Option<String>,
    pub section_path: Option<String>,
    pub score: f64,
    pub snippet: String,
}

/// Run a search over one campaign's chunks.
pub async fn search_chunks(
    pool: &SqlitePool,
    config: &Config,
    campaign_id: &str,
    query: &str,
    mode: SearchMode,
    limit: Option<i64>,
    embedder: &dyn Embedder,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    if mode != SearchMode::Keyword && !embedder.is_enabled() {
        bail!("semantic search requires an embedding provider; set [embedding] in config");
    }

    let keyword_candidates = if mode != SearchMode::Semantic {
        fetch_keyword_candidates(pool, campaign_id, query).await?
    } else {
        Vec::new()
    };
    let vector_candidates = if mode != SearchMode::Keyword {
        fetch_vector_candidates(pool, campaign_id, query, embedder).await?
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(Vec::new());
    }

    let kw_scores = normalize_scores(&keyword_candidates);
    let vec_scores = normalize_scores(&vector_candidates);

    let alpha = match mode {
        SearchMode::Keyword => 0.0,
        SearchMode::Semantic => 1.0,
        SearchMode::Hybrid => config.retrieval.hybrid_alpha,
    };

    let mut merged: HashMap<&str, &Candidate> = HashMap::new();
    for c in keyword_candidates.iter().chain(vector_candidates.iter()) {
        merged.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut scored: Vec<(f64, &Candidate)> = merged
        .into_values()
        .map(|c| {
            let k = kw_scores.get(c.chunk_id.as_str()).copied().unwrap_or(0.0);
            let v = vec_scores.get(c.chunk_id.as_str()).copied().unwrap_or(0.0);
            ((1.0 - alpha) * k + alpha * v, c)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id))
    });
    scored.truncate(limit.unwrap_or(config.retrieval.final_limit) as usize);

    let mut results = Vec::with_capacity(scored.len());
    for (score, cand) in scored {
        let row = sqlx::query(
            r#"
            SELECT d.title, c.section_path
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.id = ?
            "#,
        )
        .bind(&cand.chunk_id)
        .fetch_optional(pool)
        .await?;

        let (title, section_path) = match row {
            Some(r) => (r.get("title"), r.get("section_path")),
            None => (None, None),
        };
        results.push(SearchResult {
            chunk_id: cand.chunk_id.clone(),
            document_id: cand.document_id.clone(),
            title,
            section_path,
            score,
            snippet: cand.snippet.clone(),
        });
    }

    Ok(results)
}

#[derive(Debug, Clone)]
struct Candidate {
    chunk_id: String,
    document_id: String,
    raw_score: f64,
    snippet: String,
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    campaign_id: &str,
    query: &str,
) -> Result<Vec<Candidate>> {
    let rows = sqlx::query(
        r#"
        SELECT chunks_fts.chunk_id, chunks_fts.document_id, rank,
               snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        WHERE chunks_fts MATCH ? AND c.campaign_id = ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(campaign_id)
    .bind(CANDIDATE_K)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            Candidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                // BM25 rank is lower-is-better; negate so higher wins
                raw_score: -rank,
                snippet: row.get("snippet"),
            }
        })
        .collect())
}

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    campaign_id: &str,
    query: &str,
    embedder: &dyn Embedder,
) -> Result<Vec<Candidate>> {
    let query_vec = embedder
        .embed(&[query.to_string()])
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    let rows = sqlx::query(
        r#"
        SELECT id, document_id, embedding,
               COALESCE(substr(content, 1, 240), '') AS snippet
        FROM chunks
        WHERE campaign_id = ? AND embedding IS NOT NULL
        "#,
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            Candidate {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                raw_score: embedding::cosine_similarity(&query_vec, &vec) as f64,
                snippet: row.get("snippet"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(CANDIDATE_K as usize);
    Ok(candidates)
}

/// Min-max normalize each channel's raw scores to [0, 1], keyed by chunk
/// id. A single-candidate channel normalizes to 1.0.
fn normalize_scores(candidates: &[Candidate]) -> HashMap<&str, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }
    let min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - min) / (max - min)
            };
            (c.chunk_id.as_str(), norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(chunk_id: &str, score: f64) -> Candidate {
        Candidate {
            chunk_id: chunk_id.to_string(),
            document_id: "d".to_string(),
            raw_score: score,
            snippet: String::new(),
        }
    }

    #[test]
    fn normalize_maps_to_unit_range() {
        let cands = vec![cand("a", 10.0), cand("b", 5.0), cand("c", 0.0)];
        let norm = normalize_scores(&cands);
        assert!((norm["a"] - 1.0).abs() < 1e-9);
        assert!((norm["b"] - 0.5).abs() < 1e-9);
        assert!((norm["c"] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_equal_scores_all_one() {
        let cands = vec![cand("a", 3.0), cand("b", 3.0)];
        let norm = normalize_scores(&cands);
        assert!((norm["a"] - 1.0).abs() < 1e-9);
        assert!((norm["b"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_empty_is_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(SearchMode::from_str("hybrid").unwrap(), SearchMode::Hybrid);
        assert!(SearchMode::from_str("fuzzy").is_err());
    }
}
