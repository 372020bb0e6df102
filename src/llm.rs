//! LLM extraction collaborator: chunk text → candidate graph proposals.
//!
//! The extractor is best-effort by contract: any failure degrades to "no
//! proposals from this chunk" and never aborts ingestion. Proposals are
//! wrapped as suggestions by [`crate::extract`]; the extractor itself never
//! touches entities or edges.

use async_trait::async_trait;

use crate::models::SuggestionKind;

/// One candidate graph mutation proposed by the extractor.
///
/// Payload shapes consumed by the suggestion queue:
/// - `entity`: `{"kind": "npc", "name": "Elminster", "aliases": [..]}`
/// - `edge`: `{"src": {"kind","name"}, "dst": {"kind","name"}, "rel": "ally_of", "weight": 1.0}`
/// - `tag`: `{"entity": {"kind","name"}, "tag": "undead"}`
/// - `attribute`: `{"entity": {"kind","name"}, "key": "class", "value": "wizard"}`
#[derive(Debug, Clone)]
pub struct Proposal {
    pub kind: SuggestionKind,
    pub payload: serde_json::Value,
    pub confidence: f64,
}

#[async_trait]
pub trait GraphExtractor: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }
    async fn extract(&self, chunk_text: &str) -> anyhow::Result<Vec<Proposal>>;
}

/// Default extractor: produces nothing. Deterministic extraction
/// (wikilinks, alias matching) still runs.
pub struct NoopExtractor;

#[async_trait]
impl GraphExtractor for NoopExtractor {
    fn is_enabled(&self) -> bool {
        false
    }
    async fn extract(&self, _chunk_text: &str) -> anyhow::Result<Vec<Proposal>> {
        Ok(Vec::new())
    }
}
