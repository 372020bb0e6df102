//! Ingest orchestration: one pass over one source.
//!
//! Coordinates the full sync flow: scan → change detection → document
//! building → chunk indexing → entity/mention/edge extraction, recording a
//! run-file row for every file the pass considered. Per-file failures are
//! recorded and skipped over; the run status is derived from the outcomes
//! at the end, never set directly. A crash mid-run leaves committed
//! run-file records intact; unfinished files are simply re-attempted by
//! the next run (at-least-once, not exactly-once).

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::change::{self, Change};
use crate::config::Config;
use crate::db;
use crate::document;
use crate::embedding::Embedder;
use crate::entity;
use crate::error::{truncate_message, FileError, IngestError, ScanError};
use crate::extract::{self, ExtractionCounts};
use crate::filter::PathFilter;
use crate::index;
use crate::llm::GraphExtractor;
use crate::models::{
    ChangeDetection, FileRecord, FileStatus, IngestStatus, RunAction, RunStatus, Source,
};
use crate::scanner::{self, ScannedFile};

/// A run still `running` past this age has no live owner (the process that
/// started it died) and is closed out as partial before a new run starts.
const STALE_RUN_RECLAIM_SECS: i64 = 3600;

/// Options for one ingestion pass.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub trigger: String,
    pub dry_run: bool,
    pub force_rehash: bool,
    pub max_files: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            trigger: "cli".to_string(),
            dry_run: false,
            force_rehash: false,
            max_files: None,
        }
    }
}

/// Cooperative cancellation: the run stops after the file in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aggregate counters persisted on the run row.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub files_seen: u64,
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unchanged: u64,
    pub files_deleted: u64,
    pub files_ingested: u64,
    pub files_failed: u64,
    pub docs_ingested: u64,
    pub docs_skipped: u64,
    pub chunks_written: u64,
    pub mentions_written: u64,
    pub edges_written: u64,
    pub suggestions_created: u64,
    pub errors: Vec<String>,
}

/// Result of one finished (or rejected-as-busy) ingestion pass.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub stats: RunStats,
}

/// Run a single ingestion pass for one source.
pub async fn run_ingest(
    pool: &SqlitePool,
    config: &Config,
    source_id: &str,
    opts: &IngestOptions,
    embedder: &dyn Embedder,
    llm: &dyn GraphExtractor,
    cancel: &CancelFlag,
) -> Result<RunOutcome, IngestError> {
    let source = load_source(pool, source_id).await?;
    if !source.enabled {
        return Err(IngestError::SourceDisabled(source.name));
    }

    // A crashed process leaves its run row at 'running' forever. Close out
    // anything older than the reclaim window as partial so the source is
    // not blocked by a dead owner; unfinished files are simply re-attempted
    // by this run.
    let reclaimed = sqlx::query(
        r#"
        UPDATE ingest_runs
        SET status = 'partial', finished_at = ?, error = 'interrupted; reclaimed by a later run'
        WHERE source_id = ? AND status = 'running' AND started_at < ?
        "#,
    )
    .bind(db::now_epoch())
    .bind(&source.id)
    .bind(db::now_epoch() - STALE_RUN_RECLAIM_SECS)
    .execute(pool)
    .await?
    .rows_affected();
    if reclaimed > 0 {
        warn!(source = %source.name, reclaimed, "closed out interrupted ingest runs");
    }

    let run_id = db::new_id();
    let scan_started_at = db::now_epoch();

    // One source has at most one running ingest run: two concurrent passes
    // would disagree about change classification. Guard and insert in one
    // statement, since two passes racing a separate existence check could
    // both get through it.
    let inserted = sqlx::query(
        r#"
        INSERT INTO ingest_runs (id, source_id, trigger, status, started_at)
        SELECT ?, ?, ?, 'running', ?
        WHERE NOT EXISTS (
            SELECT 1 FROM ingest_runs WHERE source_id = ? AND status = 'running'
        )
        "#,
    )
    .bind(&run_id)
    .bind(&source.id)
    .bind(&opts.trigger)
    .bind(scan_started_at)
    .bind(&source.id)
    .execute(pool)
    .await?
    .rows_affected();
    if inserted == 0 {
        return Err(IngestError::RunInProgress(source.name));
    }

    sqlx::query("UPDATE sources SET last_scan_at = ? WHERE id = ?")
        .bind(scan_started_at)
        .bind(&source.id)
        .execute(pool)
        .await?;

    info!(source = %source.name, run_id = %run_id, trigger = %opts.trigger, "ingest run started");

    let mut stats = RunStats::default();

    let filter = match PathFilter::new(
        source.root_path.as_ref(),
        &source.include_globs,
        &source.exclude_globs,
        source.follow_symlinks,
    ) {
        Ok(f) => f,
        Err(e) => {
            stats.errors.push(format!("invalid glob patterns: {}", e));
            return finalize(pool, &run_id, RunStatus::Error, &stats).await;
        }
    };

    let snapshot = match scanner::scan_source(
        source.root_path.as_ref(),
        source.recursive,
        source.follow_symlinks,
        &filter,
    ) {
        Ok(s) => s,
        Err(ScanError::RootUnreachable { path, reason }) => {
            stats
                .errors
                .push(format!("source root unreachable: {}: {}", path.display(), reason));
            return finalize(pool, &run_id, RunStatus::Error, &stats).await;
        }
        Err(other) => {
            stats.errors.push(other.to_string());
            return finalize(pool, &run_id, RunStatus::Error, &stats).await;
        }
    };

    for err in &snapshot.errors {
        warn!(source = %source.name, "scan error: {}", err);
        stats.errors.push(err.to_string());
    }

    let folder_ids = scanner::upsert_folders(pool, &source.id, &snapshot.folders).await?;
    let root_folder_id = folder_ids.get("").cloned();

    let existing = load_existing_files(pool, &source.id).await?;

    let mut ok_records: u64 = 0;
    let mut err_records: u64 = 0;
    let mut ingests_attempted: usize = 0;
    let mut cancelled = false;

    for (rel_path, scanned) in &snapshot.files {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        stats.files_seen += 1;
        let prev = existing.get(rel_path.as_str());

        let decision = match change::classify(
            prev,
            scanned,
            source.change_detection,
            opts.force_rehash,
        ) {
            Ok(d) => d,
            Err(e) => {
                // Hash I/O failure: mark the file, keep it out of this
                // run's ingest set, move on.
                err_records += 1;
                stats.files_failed += 1;
                stats.errors.push(e.to_string());
                let file_id = upsert_file_row(
                    pool,
                    &source.id,
                    scanned,
                    &folder_ids,
                    root_folder_id.as_deref(),
                    None,
                    FileStatus::Error,
                )
                .await?;
                sqlx::query("UPDATE source_files SET error = ? WHERE id = ?")
                    .bind(truncate_message(&e.to_string()))
                    .bind(&file_id)
                    .execute(pool)
                    .await?;
                record_run_file(
                    pool,
                    &run_id,
                    &file_id,
                    RunAction::Skip,
                    "error",
                    Some("classification failed"),
                    Some(&e.to_string()),
                )
                .await?;
                continue;
            }
        };

        match decision.change {
            Change::New => stats.files_new += 1,
            Change::Modified => stats.files_changed += 1,
            Change::Unchanged => stats.files_unchanged += 1,
        }

        let file_id = upsert_file_row(
            pool,
            &source.id,
            scanned,
            &folder_ids,
            root_folder_id.as_deref(),
            decision.sha256.as_deref(),
            FileStatus::Seen,
        )
        .await?;

        // A file that never completed an ingest (fresh row from a dry run
        // or an earlier crash) is ingested even when classified unchanged.
        let previously_ingested = prev
            .map(|r| r.last_ingest_status != IngestStatus::Never.as_str())
            .unwrap_or(false);

        if decision.change == Change::Unchanged && previously_ingested {
            // Persist metadata drift (auto mode may have rehashed after an
            // mtime-only change) so the next run skips the hash again.
            update_file_metadata(pool, &file_id, scanned, decision.sha256.as_deref()).await?;
            record_run_file(
                pool,
                &run_id,
                &file_id,
                RunAction::Skip,
                "ok",
                Some("unchanged"),
                None,
            )
            .await?;
            ok_records += 1;
            continue;
        }

        if opts.dry_run {
            record_run_file(
                pool,
                &run_id,
                &file_id,
                RunAction::Skip,
                "ok",
                Some("dry run"),
                None,
            )
            .await?;
            ok_records += 1;
            continue;
        }

        if let Some(max) = opts.max_files {
            if ingests_attempted >= max {
                record_run_file(
                    pool,
                    &run_id,
                    &file_id,
                    RunAction::Skip,
                    "ok",
                    Some("max_files reached"),
                    None,
                )
                .await?;
                ok_records += 1;
                continue;
            }
        }

        ingests_attempted += 1;
        match ingest_file(pool, config, &source.campaign_id, &file_id, scanned, embedder, llm)
            .await
        {
            Ok(outcome) => {
                let ingest_status = if outcome.doc_refreshed {
                    stats.files_ingested += 1;
                    stats.docs_ingested += 1;
                    IngestStatus::Ok
                } else {
                    stats.docs_skipped += 1;
                    IngestStatus::Skipped
                };
                stats.chunks_written += outcome.chunks_written;
                stats.mentions_written += outcome.counts.mentions;
                stats.edges_written += outcome.counts.edges;
                stats.suggestions_created += outcome.counts.suggestions;

                update_file_metadata(pool, &file_id, scanned, decision.sha256.as_deref())
                    .await?;
                mark_file_ingested(pool, &file_id, ingest_status, None).await?;
                let reason = (!outcome.doc_refreshed).then_some("content unchanged");
                record_run_file(pool, &run_id, &file_id, RunAction::Ingest, "ok", reason, None)
                    .await?;
                ok_records += 1;
            }
            Err(e) => {
                err_records += 1;
                stats.files_failed += 1;
                let msg = format!("ingest failed for {}: {}", rel_path, e);
                warn!(source = %source.name, "{}", msg);
                stats.errors.push(msg.clone());

                if e.is_retryable() {
                    // Transient (embedding outage): keep the previous ingest
                    // status and stale metadata so the next run reclassifies
                    // the file as modified and retries it.
                    sqlx::query("UPDATE source_files SET error = ? WHERE id = ?")
                        .bind(truncate_message(&e.to_string()))
                        .bind(&file_id)
                        .execute(pool)
                        .await?;
                } else {
                    // Permanent until the content changes: record the new
                    // metadata so the file is not pointlessly retried.
                    update_file_metadata(pool, &file_id, scanned, decision.sha256.as_deref())
                        .await?;
                    mark_file_ingested(
                        pool,
                        &file_id,
                        IngestStatus::Error,
                        Some(&e.to_string()),
                    )
                    .await?;
                }
                record_run_file(
                    pool,
                    &run_id,
                    &file_id,
                    RunAction::Ingest,
                    "error",
                    None,
                    Some(&msg),
                )
                .await?;
            }
        }
    }

    // Files on record but absent from this scan become deletes. The file
    // row flips to deleted; documents keep living with the back-reference
    // cleared.
    if !cancelled {
        for (rel_path, prev) in &existing {
            if snapshot.files.contains_key(rel_path.as_str()) {
                continue;
            }
            stats.files_deleted += 1;
            if opts.dry_run {
                continue;
            }
            sqlx::query(
                "UPDATE source_files SET status = 'deleted', last_seen_at = ? WHERE id = ?",
            )
            .bind(db::now_epoch())
            .bind(&prev.id)
            .execute(pool)
            .await?;
            sqlx::query("UPDATE documents SET source_file_id = NULL WHERE source_file_id = ?")
                .bind(&prev.id)
                .execute(pool)
                .await?;
            record_run_file(
                pool,
                &run_id,
                &prev.id,
                RunAction::Delete,
                "ok",
                Some("missing_on_disk"),
                None,
            )
            .await?;
            ok_records += 1;
        }
    }

    // Prune policy: folders disappear only when a complete, error-free
    // scan confirms their absence.
    if !cancelled && !opts.dry_run && snapshot.errors.is_empty() {
        let pruned = scanner::prune_unseen_folders(pool, &source.id, scan_started_at).await?;
        if pruned > 0 {
            debug!(source = %source.name, pruned, "pruned unseen folders");
        }
    }

    if !opts.dry_run {
        sqlx::query("UPDATE sources SET last_ingest_at = ? WHERE id = ?")
            .bind(db::now_epoch())
            .bind(&source.id)
            .execute(pool)
            .await?;
    }

    let status = derive_status(ok_records, err_records, snapshot.errors.len() as u64, cancelled);
    info!(
        source = %source.name,
        run_id = %run_id,
        status = status.as_str(),
        ingested = stats.files_ingested,
        "ingest run finished"
    );
    finalize(pool, &run_id, status, &stats).await
}

/// Run status is derived from outcomes, never set independently:
/// `ok` iff zero failures, `partial` for mixed or cancelled passes,
/// `error` when nothing at all could be processed.
fn derive_status(ok_records: u64, err_records: u64, scan_errors: u64, cancelled: bool) -> RunStatus {
    let failures = err_records + scan_errors;
    if failures == 0 {
        if cancelled {
            RunStatus::Partial
        } else {
            RunStatus::Ok
        }
    } else if ok_records > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Error
    }
}

async fn finalize(
    pool: &SqlitePool,
    run_id: &str,
    status: RunStatus,
    stats: &RunStats,
) -> Result<RunOutcome, IngestError> {
    let stats_json = serde_json::to_string(stats).unwrap_or_else(|_| "{}".to_string());
    let error = if stats.errors.is_empty() {
        None
    } else {
        Some(truncate_message(&stats.errors.join("\n")))
    };

    sqlx::query(
        "UPDATE ingest_runs SET status = ?, finished_at = ?, stats = ?, error = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(db::now_epoch())
    .bind(&stats_json)
    .bind(error)
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(RunOutcome {
        run_id: run_id.to_string(),
        status,
        stats: stats.clone(),
    })
}

struct FileOutcome {
    /// False when the content hash matched and chunks were left alone.
    doc_refreshed: bool,
    chunks_written: u64,
    counts: ExtractionCounts,
}

async fn ingest_file(
    pool: &SqlitePool,
    config: &Config,
    campaign_id: &str,
    file_id: &str,
    scanned: &ScannedFile,
    embedder: &dyn Embedder,
    llm: &dyn GraphExtractor,
) -> Result<FileOutcome, FileError> {
    let raw = std::fs::read(&scanned.abs_path).map_err(crate::error::BuildError::Io)?;
    let built = document::build(&scanned.rel_path, &raw, scanned.ext.as_deref())?;

    let existing: Option<(String, String)> =
        sqlx::query("SELECT id, content_hash FROM documents WHERE source_file_id = ?")
            .bind(file_id)
            .fetch_optional(pool)
            .await
            .map_err(FileError::Storage)?
            .map(|row| (row.get("id"), row.get("content_hash")));

    if let Some((_, hash)) = &existing {
        if hash == &built.content_hash {
            // Dedup short-circuit: same normalized body, keep the chunk set.
            return Ok(FileOutcome {
                doc_refreshed: false,
                chunks_written: 0,
                counts: ExtractionCounts::default(),
            });
        }
    }

    let now = db::now_epoch();
    let frontmatter_json = serde_json::Value::Object(built.frontmatter.clone()).to_string();

    let document_id = match existing {
        Some((id, _)) => {
            sqlx::query(
                r#"
                UPDATE documents
                SET doc_type = ?, title = ?, frontmatter = ?, body = ?, content_hash = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&built.doc_type)
            .bind(&built.title)
            .bind(&frontmatter_json)
            .bind(&built.body)
            .bind(&built.content_hash)
            .bind(now)
            .bind(&id)
            .execute(pool)
            .await
            .map_err(FileError::Storage)?;
            id
        }
        None => {
            let id = db::new_id();
            sqlx::query(
                r#"
                INSERT INTO documents
                    (id, campaign_id, source_file_id, doc_type, title, frontmatter, body, content_hash, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(campaign_id)
            .bind(file_id)
            .bind(&built.doc_type)
            .bind(&built.title)
            .bind(&frontmatter_json)
            .bind(&built.body)
            .bind(&built.content_hash)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .map_err(FileError::Storage)?;
            id
        }
    };

    let chunks = crate::chunk::chunk_body(
        &built.body,
        config.chunking.max_chars,
        config.chunking.overlap_chars,
    );
    let chunk_ids = index::replace_chunks(pool, campaign_id, &document_id, &chunks, embedder).await?;

    // A document with a declared kind is itself an entity; the title
    // becomes its canonical name.
    if let Some(kind) = built.frontmatter.get("kind").and_then(|v| v.as_str()) {
        entity::resolve(pool, campaign_id, kind, &built.title)
            .await
            .map_err(FileError::Storage)?;
    }

    let mut counts = ExtractionCounts::default();
    for (chunk, chunk_id) in chunks.iter().zip(chunk_ids.iter()) {
        let c = extract::process_chunk(
            pool,
            campaign_id,
            &document_id,
            chunk_id,
            &chunk.content,
            llm,
            config.extraction.auto_commit_threshold,
            config.extraction.alias_min_len,
        )
        .await
        .map_err(FileError::Storage)?;
        counts.add(c);
    }

    Ok(FileOutcome {
        doc_refreshed: true,
        chunks_written: chunks.len() as u64,
        counts,
    })
}

async fn upsert_file_row(
    pool: &SqlitePool,
    source_id: &str,
    scanned: &ScannedFile,
    folder_ids: &std::collections::BTreeMap<String, String>,
    root_folder_id: Option<&str>,
    sha256: Option<&str>,
    status: FileStatus,
) -> Result<String, sqlx::Error> {
    let folder_id = folder_ids
        .get(&scanned.folder_rel)
        .map(|s| s.as_str())
        .or(root_folder_id);

    // On conflict, size/mtime/sha are deliberately left alone: stored
    // metadata must describe the last state that actually completed an
    // ingest (or was verified unchanged), or change detection would mask
    // files whose ingest was skipped or failed mid-run.
    sqlx::query_scalar(
        r#"
        INSERT INTO source_files
            (id, source_id, folder_id, rel_path, ext, size_bytes, mtime_epoch, sha256, status, last_seen_at, last_ingest_status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'never')
        ON CONFLICT(source_id, rel_path) DO UPDATE SET
            folder_id = excluded.folder_id,
            ext = excluded.ext,
            status = excluded.status,
            last_seen_at = excluded.last_seen_at
        RETURNING id
        "#,
    )
    .bind(db::new_id())
    .bind(source_id)
    .bind(folder_id)
    .bind(&scanned.rel_path)
    .bind(&scanned.ext)
    .bind(scanned.size_bytes)
    .bind(scanned.mtime_epoch)
    .bind(sha256)
    .bind(status.as_str())
    .bind(db::now_epoch())
    .fetch_one(pool)
    .await
}

async fn update_file_metadata(
    pool: &SqlitePool,
    file_id: &str,
    scanned: &ScannedFile,
    sha256: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE source_files SET size_bytes = ?, mtime_epoch = ?, sha256 = ? WHERE id = ?",
    )
    .bind(scanned.size_bytes)
    .bind(scanned.mtime_epoch)
    .bind(sha256)
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn mark_file_ingested(
    pool: &SqlitePool,
    file_id: &str,
    status: IngestStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE source_files SET last_ingested_at = ?, last_ingest_status = ?, error = ? WHERE id = ?",
    )
    .bind(db::now_epoch())
    .bind(status.as_str())
    .bind(error.map(truncate_message))
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn record_run_file(
    pool: &SqlitePool,
    run_id: &str,
    file_id: &str,
    action: RunAction,
    status: &str,
    reason: Option<&str>,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ingest_run_files (run_id, file_id, action, status, reason, error)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id, file_id) DO UPDATE SET
            action = excluded.action,
            status = excluded.status,
            reason = excluded.reason,
            error = excluded.error
        "#,
    )
    .bind(run_id)
    .bind(file_id)
    .bind(action.as_str())
    .bind(status)
    .bind(reason)
    .bind(error.map(truncate_message))
    .execute(pool)
    .await?;
    Ok(())
}

/// Resolve a source name to its id, optionally scoped to one campaign.
///
/// Source names are unique per campaign, not globally; an unscoped lookup
/// that matches sources in more than one campaign is refused rather than
/// picking an arbitrary row.
pub async fn find_source_id(
    pool: &SqlitePool,
    name: &str,
    campaign_id: Option<&str>,
) -> Result<String, IngestError> {
    let mut ids: Vec<String> = match campaign_id {
        Some(campaign_id) => {
            sqlx::query_scalar("SELECT id FROM sources WHERE campaign_id = ? AND name = ?")
                .bind(campaign_id)
                .bind(name)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT id FROM sources WHERE name = ?")
                .bind(name)
                .fetch_all(pool)
                .await?
        }
    };
    match ids.len() {
        0 => Err(IngestError::SourceNotFound(name.to_string())),
        1 => Ok(ids.remove(0)),
        _ => Err(IngestError::AmbiguousSource(name.to_string())),
    }
}

/// Load a source row by id.
pub async fn load_source(pool: &SqlitePool, source_id: &str) -> Result<Source, IngestError> {
    let row = sqlx::query(
        r#"
        SELECT id, campaign_id, name, root_path, recursive, follow_symlinks,
               include_globs, exclude_globs, change_detection, enabled
        FROM sources WHERE id = ?
        "#,
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| IngestError::SourceNotFound(source_id.to_string()))?;

    let include_globs: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("include_globs")).unwrap_or_default();
    let exclude_globs: Vec<String> =
        serde_json::from_str(&row.get::<String, _>("exclude_globs")).unwrap_or_default();
    let change_detection =
        ChangeDetection::from_str(row.get::<String, _>("change_detection").as_str())
            .unwrap_or(ChangeDetection::Auto);

    Ok(Source {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        name: row.get("name"),
        root_path: row.get("root_path"),
        recursive: row.get::<i64, _>("recursive") != 0,
        follow_symlinks: row.get::<i64, _>("follow_symlinks") != 0,
        include_globs,
        exclude_globs,
        change_detection,
        enabled: row.get::<i64, _>("enabled") != 0,
    })
}

async fn load_existing_files(
    pool: &SqlitePool,
    source_id: &str,
) -> Result<HashMap<String, FileRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, rel_path, size_bytes, mtime_epoch, sha256, last_ingest_status
        FROM source_files
        WHERE source_id = ? AND status <> 'deleted'
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let record = FileRecord {
                id: row.get("id"),
                rel_path: row.get("rel_path"),
                size_bytes: row.get("size_bytes"),
                mtime_epoch: row.get("mtime_epoch"),
                sha256: row.get("sha256"),
                last_ingest_status: row.get("last_ingest_status"),
            };
            (record.rel_path.clone(), record)
        })
        .collect())
}
