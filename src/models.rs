//! Core data models for the ingestion pipeline and knowledge graph.
//!
//! Row types mirror the SQLite schema in [`crate::migrate`]; lifecycle enums
//! are stored as TEXT and round-tripped through `as_str` / `parse`.

use std::str::FromStr;

/// A configured filesystem root to ingest, scoped to a campaign.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub campaign_id: String,
    pub name: String,
    pub root_path: String,
    pub recursive: bool,
    pub follow_symlinks: bool,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub change_detection: ChangeDetection,
    pub enabled: bool,
}

/// Change-detection strategy for a source (see [`crate::change`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDetection {
    /// Unchanged iff size and mtime both match exactly.
    MtimeSize,
    /// Always rehash; unchanged iff the content hash matches.
    Sha256,
    /// Metadata first; on mismatch, rehash before declaring modified.
    Auto,
}

impl ChangeDetection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeDetection::MtimeSize => "mtime_size",
            ChangeDetection::Sha256 => "sha256",
            ChangeDetection::Auto => "auto",
        }
    }
}

impl FromStr for ChangeDetection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mtime_size" => Ok(ChangeDetection::MtimeSize),
            "sha256" => Ok(ChangeDetection::Sha256),
            "auto" => Ok(ChangeDetection::Auto),
            other => Err(format!("unknown change detection mode: {}", other)),
        }
    }
}

/// Lifecycle of a tracked file. Files are never hard-deleted while documents
/// reference them; absence from a scan moves them to `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Seen,
    Deleted,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Seen => "seen",
            FileStatus::Deleted => "deleted",
            FileStatus::Error => "error",
        }
    }
}

/// Outcome of the most recent ingest attempt for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Never,
    Ok,
    Skipped,
    Error,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Never => "never",
            IngestStatus::Ok => "ok",
            IngestStatus::Skipped => "skipped",
            IngestStatus::Error => "error",
        }
    }
}

/// Persisted record of a file under a source. Identity is
/// `(source_id, rel_path)`; a rename shows up as delete + new file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub rel_path: String,
    pub size_bytes: i64,
    pub mtime_epoch: i64,
    pub sha256: Option<String>,
    pub last_ingest_status: String,
}

/// Terminal status of an ingest run, derived from per-file outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Ok,
    Partial,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::Partial => "partial",
            RunStatus::Error => "error",
        }
    }
}

/// Action the orchestrator decided for one file within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Ingest,
    Skip,
    Delete,
}

impl RunAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunAction::Ingest => "ingest",
            RunAction::Skip => "skip",
            RunAction::Delete => "delete",
        }
    }
}

/// An ordered slice of a document's normalized body, ready to index.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_index: i64,
    pub section_path: String,
    pub content: String,
    pub hash: String,
}

/// Which extractor produced a mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    Wikilink,
    AliasMatch,
    Llm,
    Manual,
}

impl Extractor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extractor::Wikilink => "wikilink",
            Extractor::AliasMatch => "alias_match",
            Extractor::Llm => "llm",
            Extractor::Manual => "manual",
        }
    }
}

/// What a pending suggestion proposes to add to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    Entity,
    Edge,
    Tag,
    Attribute,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::Entity => "entity",
            SuggestionKind::Edge => "edge",
            SuggestionKind::Tag => "tag",
            SuggestionKind::Attribute => "attribute",
        }
    }
}

impl FromStr for SuggestionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity" => Ok(SuggestionKind::Entity),
            "edge" => Ok(SuggestionKind::Edge),
            "tag" => Ok(SuggestionKind::Tag),
            "attribute" => Ok(SuggestionKind::Attribute),
            other => Err(format!("unknown suggestion kind: {}", other)),
        }
    }
}

/// Review lifecycle of a suggestion (see [`crate::suggest`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionStatus {
    New,
    Accepted,
    Rejected,
    Applied,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::New => "new",
            SuggestionStatus::Accepted => "accepted",
            SuggestionStatus::Rejected => "rejected",
            SuggestionStatus::Applied => "applied",
        }
    }
}

impl FromStr for SuggestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(SuggestionStatus::New),
            "accepted" => Ok(SuggestionStatus::Accepted),
            "rejected" => Ok(SuggestionStatus::Rejected),
            "applied" => Ok(SuggestionStatus::Applied),
            other => Err(format!("unknown suggestion status: {}", other)),
        }
    }
}
