//! Mention and edge extraction over indexed chunks.
//!
//! Three extractor families, each tagged on the mentions it writes:
//!
//! - `wikilink` — `[[Target]]` / `[[Target|label]]` links. Deterministic;
//!   resolves entities directly and upserts `co_mentioned` edges between
//!   entities linked in the same chunk, with the chunk as evidence.
//! - `alias_match` — case-insensitive scan for known canonical names and
//!   aliases. Deterministic; writes mentions only.
//! - `llm` — proposals from the [`GraphExtractor`] collaborator. Never
//!   writes entities or edges directly: every proposal becomes a
//!   suggestion, and only the queue can commit it. Proposals at or above
//!   the auto-commit threshold are accepted and applied immediately, still
//!   through the queue.
//!
//! The same surface proposed by two extractors stays as two independent
//! mentions/suggestions; merging is a separate review concern.

use sqlx::SqlitePool;
use tracing::warn;

use crate::db;
use crate::entity::{self, NameEntry};
use crate::llm::GraphExtractor;
use crate::models::{Extractor, SuggestionStatus};
use crate::suggest;

const WIKILINK_CONFIDENCE: f64 = 1.0;
const ALIAS_CONFIDENCE: f64 = 0.8;
/// Entity kind assigned to wikilink targets with no declared kind.
pub const DEFAULT_LINK_KIND: &str = "note";

/// A `[[..]]` link found in chunk text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLink {
    pub target: String,
    pub label: Option<String>,
    pub start: usize,
    pub end: usize,
}

/// Scan text for wikilinks. Malformed or empty links are skipped.
pub fn find_wikilinks(text: &str) -> Vec<WikiLink> {
    let mut links = Vec::new();
    let mut rest = 0;

    while let Some(open) = text[rest..].find("[[") {
        let start = rest + open;
        let inner_start = start + 2;
        let close = match text[inner_start..].find("]]") {
            Some(c) => inner_start + c,
            None => break,
        };
        let inner = &text[inner_start..close];
        rest = close + 2;

        if inner.is_empty() || inner.contains("[[") {
            continue;
        }

        let (target, label) = match inner.split_once('|') {
            Some((t, l)) => (t.trim(), Some(l.trim().to_string()).filter(|s| !s.is_empty())),
            None => (inner.trim(), None),
        };
        if target.is_empty() {
            continue;
        }

        links.push(WikiLink {
            target: target.to_string(),
            label,
            start,
            end: close + 2,
        });
    }

    links
}

/// Case-insensitive occurrences of `needle` in `haystack` with rough word
/// boundaries on both sides.
pub fn find_name_occurrences(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    if needle.is_empty() {
        return Vec::new();
    }
    let hay_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();

    // Lowercasing can change byte lengths for some scripts; fall back to
    // no matches rather than reporting offsets into the wrong text.
    if hay_lower.len() != haystack.len() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut from = 0;
    while let Some(pos) = hay_lower[from..].find(&needle_lower) {
        let start = from + pos;
        let end = start + needle_lower.len();

        let before_ok = start == 0
            || haystack[..start]
                .chars()
                .next_back()
                .is_some_and(|c| !c.is_alphanumeric());
        let after_ok = end >= haystack.len()
            || haystack[end..]
                .chars()
                .next()
                .is_some_and(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            out.push((start, end));
        }
        from = end.max(start + 1);
    }
    out
}

/// Counters for one chunk's extraction pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractionCounts {
    pub mentions: u64,
    pub edges: u64,
    pub suggestions: u64,
}

impl ExtractionCounts {
    pub fn add(&mut self, other: ExtractionCounts) {
        self.mentions += other.mentions;
        self.edges += other.edges;
        self.suggestions += other.suggestions;
    }
}

/// Run every extractor over one indexed chunk.
#[allow(clippy::too_many_arguments)]
pub async fn process_chunk(
    pool: &SqlitePool,
    campaign_id: &str,
    document_id: &str,
    chunk_id: &str,
    chunk_text: &str,
    llm: &dyn GraphExtractor,
    auto_commit_threshold: f64,
    alias_min_len: usize,
) -> Result<ExtractionCounts, sqlx::Error> {
    let mut counts = ExtractionCounts::default();
    let evidence = serde_json::json!({
        "document_id": document_id,
        "chunk_id": chunk_id,
    });

    // Deterministic pass: wikilinks resolve entities and edges directly.
    let mut linked_entities: Vec<String> = Vec::new();
    for link in find_wikilinks(chunk_text) {
        let entity_id =
            entity::resolve(pool, campaign_id, DEFAULT_LINK_KIND, &link.target).await?;
        if let Some(label) = &link.label {
            entity::add_alias(pool, &entity_id, label).await?;
        }
        write_mention(
            pool,
            chunk_id,
            &entity_id,
            link.start as i64,
            link.end as i64,
            WIKILINK_CONFIDENCE,
            Extractor::Wikilink,
        )
        .await?;
        counts.mentions += 1;
        if !linked_entities.contains(&entity_id) {
            linked_entities.push(entity_id);
        }
    }

    // Co-mentioned wikilinked entities imply a relation.
    for i in 0..linked_entities.len() {
        for j in (i + 1)..linked_entities.len() {
            entity::upsert_edge(
                pool,
                campaign_id,
                &linked_entities[i],
                &linked_entities[j],
                "co_mentioned",
                1.0,
                &serde_json::json!({}),
                &evidence,
            )
            .await?;
            counts.edges += 1;
        }
    }

    // Alias pass: known names appearing as plain text.
    let names = entity::load_name_index(pool, campaign_id).await?;
    counts.mentions += alias_pass(pool, chunk_id, chunk_text, &names, alias_min_len).await?;

    // LLM pass: best-effort, suggestions only.
    if llm.is_enabled() {
        let proposals = match llm.extract(chunk_text).await {
            Ok(p) => p,
            Err(e) => {
                warn!(chunk_id, error = %e, "llm extraction failed; skipping chunk");
                Vec::new()
            }
        };
        for proposal in proposals {
            let id = suggest::create(
                pool,
                campaign_id,
                proposal.kind,
                &proposal.payload,
                proposal.confidence,
                &evidence,
            )
            .await?;
            counts.suggestions += 1;

            if proposal.confidence >= auto_commit_threshold {
                if let Err(e) = auto_commit(pool, &id).await {
                    warn!(suggestion_id = %id, error = %e, "auto-commit failed");
                }
            }
        }
    }

    Ok(counts)
}

async fn alias_pass(
    pool: &SqlitePool,
    chunk_id: &str,
    chunk_text: &str,
    names: &[NameEntry],
    alias_min_len: usize,
) -> Result<u64, sqlx::Error> {
    let mut written = 0;
    for entry in names {
        if entry.display.len() < alias_min_len {
            continue;
        }
        for (start, end) in find_name_occurrences(chunk_text, &entry.display) {
            write_mention(
                pool,
                chunk_id,
                &entry.entity_id,
                start as i64,
                end as i64,
                ALIAS_CONFIDENCE,
                Extractor::AliasMatch,
            )
            .await?;
            written += 1;
        }
    }
    Ok(written)
}

async fn write_mention(
    pool: &SqlitePool,
    chunk_id: &str,
    entity_id: &str,
    start_offset: i64,
    end_offset: i64,
    confidence: f64,
    extractor: Extractor,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO mentions (id, chunk_id, entity_id, start_offset, end_offset, confidence, extractor)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id, entity_id, start_offset, extractor) DO NOTHING
        "#,
    )
    .bind(db::new_id())
    .bind(chunk_id)
    .bind(entity_id)
    .bind(start_offset)
    .bind(end_offset)
    .bind(confidence)
    .bind(extractor.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Accept and apply a high-confidence suggestion through the queue, so
/// auto-committed proposals take the same path as reviewed ones.
async fn auto_commit(pool: &SqlitePool, suggestion_id: &str) -> Result<(), suggest::SuggestError> {
    suggest::accept(pool, suggestion_id).await?;
    suggest::apply(pool, suggestion_id).await?;
    Ok(())
}

/// Count of suggestions currently in a given state (used by run stats and
/// the CLI listing).
pub async fn count_suggestions(
    pool: &SqlitePool,
    campaign_id: &str,
    status: SuggestionStatus,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM suggestions WHERE campaign_id = ? AND status = ?",
    )
    .bind(campaign_id)
    .bind(status.as_str())
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_plain_wikilinks() {
        let links = find_wikilinks("Meet [[Elminster]] at [[The Yawning Portal]].");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target, "Elminster");
        assert_eq!(links[1].target, "The Yawning Portal");
        assert!(links[0].label.is_none());
    }

    #[test]
    fn finds_labelled_wikilinks() {
        let links = find_wikilinks("See [[Elminster Aumar|the Old Mage]].");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "Elminster Aumar");
        assert_eq!(links[0].label.as_deref(), Some("the Old Mage"));
    }

    #[test]
    fn offsets_point_at_full_link() {
        let text = "x [[A]] y";
        let links = find_wikilinks(text);
        assert_eq!(&text[links[0].start..links[0].end], "[[A]]");
    }

    #[test]
    fn unclosed_and_empty_links_skipped() {
        assert!(find_wikilinks("broken [[link").is_empty());
        assert!(find_wikilinks("empty [[]] here").is_empty());
        assert!(find_wikilinks("blank label [[|x]]").is_empty());
    }

    #[test]
    fn name_occurrences_respect_word_boundaries() {
        let hits = find_name_occurrences("Elminster spoke. Elminster's hat.", "Elminster");
        assert_eq!(hits.len(), 2);
        // No hit inside a longer word
        assert!(find_name_occurrences("Elminsterian studies", "Elminster").is_empty());
    }

    #[test]
    fn name_occurrences_case_insensitive() {
        let hits = find_name_occurrences("ELMINSTER was here", "Elminster");
        assert_eq!(hits, vec![(0, 9)]);
    }
}
