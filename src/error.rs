//! Error taxonomy for the ingestion pipeline.
//!
//! Errors are scoped by pipeline stage so the orchestrator can decide, per
//! failure, whether to skip a branch, fail a file, or fail the whole run.
//! Run-level status is always derived from per-file outcomes, never set
//! directly from an error value.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while walking a source tree. Recorded per branch; never aborts
/// the scan unless the root itself is unreachable.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("source root unreachable: {path}: {reason}")]
    RootUnreachable { path: PathBuf, reason: String },

    #[error("symlink cycle at {path}")]
    SymlinkCycle { path: PathBuf },

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Failure while classifying a file's change state (hash I/O). The file is
/// marked `error` and excluded from this run's ingest set.
#[derive(Debug, Error)]
#[error("hash failed for {path}: {source}")]
pub struct ClassificationError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Failure while turning raw file content into a document.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf extraction failed: {0}")]
    Pdf(String),

    #[error("front matter is not a mapping")]
    FrontMatterShape,

    #[error("embedding rejected input: {0}")]
    EmbeddingRejected(String),
}

/// Embedding collaborator failures, split by retryability.
///
/// `Unavailable` leaves the file at its previous ingest status so a later
/// run retries it; `Rejected` is permanent until the content changes and is
/// treated like a [`BuildError`].
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("embedding input rejected: {0}")]
    Rejected(String),
}

/// Errors that prevent a run from starting or progressing at all.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("source name {0} exists in more than one campaign; specify the campaign")]
    AmbiguousSource(String),

    #[error("source is disabled: {0}")]
    SourceDisabled(String),

    #[error("an ingest run is already in progress for source {0}")]
    RunInProgress(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Per-file pipeline failure, aggregated into run stats.
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl FileError {
    /// True when the failure is transient and the file should keep its
    /// previous ingest status so the next run retries it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FileError::Embed(EmbedError::Unavailable(_)))
    }
}

/// Truncate an error message before persisting it.
pub fn truncate_message(msg: &str) -> String {
    const MAX: usize = 5000;
    if msg.len() <= MAX {
        msg.to_string()
    } else {
        let mut end = MAX;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(4000);
        let cut = truncate_message(&long);
        assert!(cut.len() <= 5000);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn embed_unavailable_is_retryable() {
        let err = FileError::Embed(EmbedError::Unavailable("timeout".into()));
        assert!(err.is_retryable());
        let err = FileError::Embed(EmbedError::Rejected("too long".into()));
        assert!(!err.is_retryable());
    }
}
