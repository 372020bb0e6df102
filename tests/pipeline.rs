//! End-to-end pipeline tests over a temp vault and a real SQLite file.

use sqlx::{Row, SqlitePool};
use std::path::Path;

use vaultgraph::config::{Config, DbConfig};
use vaultgraph::db;
use vaultgraph::embedding::DisabledEmbedder;
use vaultgraph::ingest::{self, CancelFlag, IngestOptions};
use vaultgraph::llm::NoopExtractor;
use vaultgraph::migrate;
use vaultgraph::models::RunStatus;
use vaultgraph::suggest;

struct Harness {
    _dir: tempfile::TempDir,
    pool: SqlitePool,
    config: Config,
    campaign_id: String,
    source_id: String,
}

impl Harness {
    fn vault(&self) -> std::path::PathBuf {
        self._dir.path().join("vault")
    }

    async fn sync(&self) -> ingest::RunOutcome {
        self.sync_with(IngestOptions::default()).await
    }

    async fn sync_with(&self, opts: IngestOptions) -> ingest::RunOutcome {
        ingest::run_ingest(
            &self.pool,
            &self.config,
            &self.source_id,
            &opts,
            &DisabledEmbedder,
            &NoopExtractor,
            &CancelFlag::new(),
        )
        .await
        .expect("ingest run failed")
    }

    async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&self.pool).await.unwrap()
    }
}

async fn harness(include: &[&str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("vault")).unwrap();

    let db_path = dir.path().join("vg.db");
    let pool = db::connect_path(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let campaign_id = db::new_id();
    sqlx::query("INSERT INTO campaigns (id, name, created_at) VALUES (?, 'test', ?)")
        .bind(&campaign_id)
        .bind(db::now_epoch())
        .execute(&pool)
        .await
        .unwrap();

    let source_id = db::new_id();
    let includes: Vec<String> = include.iter().map(|s| s.to_string()).collect();
    sqlx::query(
        r#"
        INSERT INTO sources
            (id, campaign_id, name, root_path, recursive, follow_symlinks,
             include_globs, exclude_globs, change_detection, enabled)
        VALUES (?, ?, 'vault', ?, 1, 0, ?, '[]', 'auto', 1)
        "#,
    )
    .bind(&source_id)
    .bind(&campaign_id)
    .bind(dir.path().join("vault").to_string_lossy().as_ref())
    .bind(serde_json::to_string(&includes).unwrap())
    .execute(&pool)
    .await
    .unwrap();

    let config = Config {
        db: DbConfig { path: db_path },
        chunking: Default::default(),
        embedding: Default::default(),
        extraction: Default::default(),
        retrieval: Default::default(),
    };

    Harness {
        _dir: dir,
        pool,
        config,
        campaign_id,
        source_id,
    }
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn first_sync_ingests_everything() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("intro.md"), "# Intro\n\nWelcome to the campaign.");
    write(&h.vault().join("lore/gods.md"), "# Gods\n\nMany of them.");

    let outcome = h.sync().await;

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.stats.files_seen, 2);
    assert_eq!(outcome.stats.files_new, 2);
    assert_eq!(outcome.stats.docs_ingested, 2);
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 2);
    assert!(h.count("SELECT COUNT(*) FROM chunks").await >= 2);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM ingest_run_files WHERE action = 'ingest' AND status = 'ok'")
            .await,
        2
    );
}

#[tokio::test]
async fn second_sync_is_all_unchanged() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\nalpha");
    h.sync().await;

    let chunks_before = h.count("SELECT COUNT(*) FROM chunks").await;
    let outcome = h.sync().await;

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.stats.files_unchanged, 1);
    assert_eq!(outcome.stats.docs_ingested, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM chunks").await, chunks_before);
    // run-file records exist for both runs
    assert_eq!(h.count("SELECT COUNT(*) FROM ingest_run_files").await, 2);
}

#[tokio::test]
async fn rewriting_identical_content_does_not_reingest() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\nalpha");
    h.sync().await;

    // Same bytes again; auto mode rehashes on metadata mismatch and still
    // lands on unchanged (or skips via metadata match).
    write(&h.vault().join("a.md"), "# A\n\nalpha");
    let outcome = h.sync().await;

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.stats.docs_ingested, 0);
}

#[tokio::test]
async fn edited_file_replaces_chunks() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\nold content here");
    h.sync().await;

    write(&h.vault().join("a.md"), "# A\n\nentirely new content, longer than before");
    let outcome = h.sync().await;

    assert_eq!(outcome.stats.files_changed, 1);
    assert_eq!(outcome.stats.docs_ingested, 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 1);

    let old = h
        .count("SELECT COUNT(*) FROM chunks WHERE content LIKE '%old content%'")
        .await;
    let new = h
        .count("SELECT COUNT(*) FROM chunks WHERE content LIKE '%entirely new%'")
        .await;
    assert_eq!(old, 0);
    assert_eq!(new, 1);
}

#[tokio::test]
async fn whitespace_only_resave_skips_rechunking() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\nbody line\n");
    h.sync().await;

    // CRLF re-save: file bytes differ, normalized body does not.
    write(&h.vault().join("a.md"), "# A\r\n\r\nbody line\r\n");
    let outcome = h.sync().await;

    assert_eq!(outcome.stats.files_changed, 1);
    assert_eq!(outcome.stats.docs_ingested, 0);
    assert_eq!(outcome.stats.docs_skipped, 1);

    let status: String = sqlx::query_scalar(
        "SELECT last_ingest_status FROM source_files WHERE rel_path = 'a.md'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(status, "skipped");
}

#[tokio::test]
async fn missing_file_is_marked_deleted_and_document_survives() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("gone.md"), "# Gone\n\nsoon");
    h.sync().await;

    std::fs::remove_file(h.vault().join("gone.md")).unwrap();
    let outcome = h.sync().await;

    assert_eq!(outcome.stats.files_deleted, 1);
    let status: String =
        sqlx::query_scalar("SELECT status FROM source_files WHERE rel_path = 'gone.md'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(status, "deleted");

    // Document survives with the back-reference cleared
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 1);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM documents WHERE source_file_id IS NULL")
            .await,
        1
    );
    assert_eq!(
        h.count("SELECT COUNT(*) FROM ingest_run_files WHERE action = 'delete'")
            .await,
        1
    );
}

#[tokio::test]
async fn excluded_directories_never_reach_the_pipeline() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("real.md"), "# Real\n\ncontent");
    write(&h.vault().join(".obsidian/workspace.md"), "internal state");

    let outcome = h.sync().await;

    assert_eq!(outcome.stats.files_seen, 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 1);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM source_folders WHERE rel_path LIKE '%.obsidian%'")
            .await,
        0
    );
}

#[tokio::test]
async fn dry_run_records_but_writes_nothing() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\nalpha");

    let outcome = h
        .sync_with(IngestOptions {
            dry_run: true,
            ..Default::default()
        })
        .await;

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.stats.files_new, 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM chunks").await, 0);
    // the file row itself is recorded, as is the run-file
    assert_eq!(h.count("SELECT COUNT(*) FROM source_files").await, 1);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM ingest_run_files WHERE action = 'skip'")
            .await,
        1
    );
}

#[tokio::test]
async fn max_files_caps_ingestion_but_records_the_rest() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\none");
    write(&h.vault().join("b.md"), "# B\n\ntwo");
    write(&h.vault().join("c.md"), "# C\n\nthree");

    let outcome = h
        .sync_with(IngestOptions {
            max_files: Some(1),
            ..Default::default()
        })
        .await;

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.stats.docs_ingested, 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM ingest_run_files").await, 3);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM ingest_run_files WHERE reason = 'max_files reached'")
            .await,
        2
    );
}

#[tokio::test]
async fn unparseable_pdf_fails_the_file_not_the_run() {
    let h = harness(&[]).await;
    write(&h.vault().join("fine.md"), "# Fine\n\ngood content");
    std::fs::write(h.vault().join("broken.pdf"), b"not a pdf at all").unwrap();

    let outcome = h.sync().await;

    assert_eq!(outcome.status, RunStatus::Partial);
    assert_eq!(outcome.stats.files_failed, 1);
    assert_eq!(outcome.stats.docs_ingested, 1);

    let status: String = sqlx::query_scalar(
        "SELECT last_ingest_status FROM source_files WHERE rel_path = 'broken.pdf'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(status, "error");
    assert_eq!(
        h.count("SELECT COUNT(*) FROM ingest_run_files WHERE status = 'error'")
            .await,
        1
    );
}

#[tokio::test]
async fn unreachable_root_yields_error_run() {
    let h = harness(&["**/*.md"]).await;
    std::fs::remove_dir_all(h.vault()).unwrap();

    let outcome = h.sync().await;
    assert_eq!(outcome.status, RunStatus::Error);

    let status: String =
        sqlx::query_scalar("SELECT status FROM ingest_runs WHERE id = ?")
            .bind(&outcome.run_id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(status, "error");
}

#[tokio::test]
async fn wikilinks_build_entities_mentions_and_edges() {
    let h = harness(&["**/*.md"]).await;
    write(
        &h.vault().join("session.md"),
        "# Session 1\n\nThe party met [[Elminster]] at [[The Yawning Portal|the tavern]].",
    );

    h.sync().await;

    assert_eq!(h.count("SELECT COUNT(*) FROM entities").await, 2);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM mentions WHERE extractor = 'wikilink'")
            .await,
        2
    );
    assert_eq!(
        h.count("SELECT COUNT(*) FROM edges WHERE rel = 'co_mentioned'")
            .await,
        1
    );
    // the label became an alias
    assert_eq!(
        h.count("SELECT COUNT(*) FROM entity_aliases WHERE alias = 'the tavern'")
            .await,
        1
    );
}

#[tokio::test]
async fn reingesting_same_links_does_not_duplicate_entities() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "Saw [[Elminster]] today.");
    h.sync().await;

    write(&h.vault().join("b.md"), "And [[elminster]] again, case aside.");
    h.sync().await;

    assert_eq!(h.count("SELECT COUNT(*) FROM entities").await, 1);
    // same pairless chunk: still no edges
    assert_eq!(h.count("SELECT COUNT(*) FROM edges").await, 0);
}

#[tokio::test]
async fn known_names_are_alias_matched_in_plain_text() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("intro.md"), "All hail [[Elminster]].");
    h.sync().await;

    write(&h.vault().join("later.md"), "Elminster was mentioned without a link.");
    h.sync().await;

    assert!(
        h.count("SELECT COUNT(*) FROM mentions WHERE extractor = 'alias_match'")
            .await
            >= 1
    );
}

#[tokio::test]
async fn edge_suggestion_reaches_graph_only_after_review() {
    let h = harness(&[]).await;
    let payload = serde_json::json!({
        "src": {"kind": "npc", "name": "Elminster"},
        "dst": {"kind": "place", "name": "Waterdeep"},
        "rel": "lives_in",
    });

    let id = suggest::create(
        &h.pool,
        &h.campaign_id,
        vaultgraph::models::SuggestionKind::Edge,
        &payload,
        0.6,
        &serde_json::json!({}),
    )
    .await
    .unwrap();

    assert_eq!(h.count("SELECT COUNT(*) FROM edges").await, 0);

    suggest::accept(&h.pool, &id).await.unwrap();
    assert_eq!(h.count("SELECT COUNT(*) FROM edges").await, 0);

    let outcome = suggest::apply(&h.pool, &id).await.unwrap();
    assert_eq!(outcome, suggest::ApplyOutcome::Applied);
    assert_eq!(h.count("SELECT COUNT(*) FROM edges").await, 1);

    // Re-apply is a no-op: one edge, weight untouched
    let outcome = suggest::apply(&h.pool, &id).await.unwrap();
    assert_eq!(outcome, suggest::ApplyOutcome::AlreadyApplied);
    assert_eq!(h.count("SELECT COUNT(*) FROM edges").await, 1);
    let weight: f64 = sqlx::query_scalar("SELECT weight FROM edges")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert!((weight - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn rejected_suggestion_stays_out_of_the_graph() {
    let h = harness(&[]).await;
    let id = suggest::create(
        &h.pool,
        &h.campaign_id,
        vaultgraph::models::SuggestionKind::Entity,
        &serde_json::json!({"kind": "npc", "name": "Nobody"}),
        0.3,
        &serde_json::json!({}),
    )
    .await
    .unwrap();

    suggest::reject(&h.pool, &id).await.unwrap();
    assert!(suggest::apply(&h.pool, &id).await.is_err());
    assert_eq!(h.count("SELECT COUNT(*) FROM entities").await, 0);
}

#[tokio::test]
async fn concurrent_resolution_yields_one_entity() {
    let h = harness(&[]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = h.pool.clone();
        let campaign = h.campaign_id.clone();
        handles.push(tokio::spawn(async move {
            vaultgraph::entity::resolve(&pool, &campaign, "npc", "The Xanathar").await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM entities").await, 1);
}

#[tokio::test]
async fn cancelled_run_finalizes_as_partial() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\none");

    let cancel = CancelFlag::new();
    cancel.cancel();
    let outcome = ingest::run_ingest(
        &h.pool,
        &h.config,
        &h.source_id,
        &IngestOptions::default(),
        &DisabledEmbedder,
        &NoopExtractor,
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, RunStatus::Partial);
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 0);
}

#[tokio::test]
async fn interrupted_run_is_reclaimed_on_the_next_sync() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("pending.md"), "# Pending\n\nstill here");

    // The row a killed process leaves behind: running, started long ago.
    sqlx::query(
        "INSERT INTO ingest_runs (id, source_id, trigger, status, started_at) VALUES (?, ?, 'cli', 'running', ?)",
    )
    .bind(db::new_id())
    .bind(&h.source_id)
    .bind(db::now_epoch() - 86_400)
    .execute(&h.pool)
    .await
    .unwrap();

    let outcome = h.sync().await;

    assert_eq!(outcome.status, RunStatus::Ok);
    assert_eq!(outcome.stats.docs_ingested, 1);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM ingest_runs WHERE status = 'running'")
            .await,
        0
    );
    assert_eq!(
        h.count("SELECT COUNT(*) FROM ingest_runs WHERE status = 'partial'")
            .await,
        1
    );
}

#[tokio::test]
async fn live_run_blocks_a_second_pass() {
    let h = harness(&["**/*.md"]).await;
    write(&h.vault().join("a.md"), "# A\n\none");

    sqlx::query(
        "INSERT INTO ingest_runs (id, source_id, trigger, status, started_at) VALUES (?, ?, 'watch', 'running', ?)",
    )
    .bind(db::new_id())
    .bind(&h.source_id)
    .bind(db::now_epoch())
    .execute(&h.pool)
    .await
    .unwrap();

    let result = ingest::run_ingest(
        &h.pool,
        &h.config,
        &h.source_id,
        &IngestOptions::default(),
        &DisabledEmbedder,
        &NoopExtractor,
        &CancelFlag::new(),
    )
    .await;
    assert!(matches!(
        result,
        Err(vaultgraph::error::IngestError::RunInProgress(_))
    ));
    assert_eq!(h.count("SELECT COUNT(*) FROM documents").await, 0);
}

#[tokio::test]
async fn same_source_name_in_two_campaigns_needs_a_scope() {
    let h = harness(&[]).await;

    let other_campaign = db::new_id();
    sqlx::query("INSERT INTO campaigns (id, name, created_at) VALUES (?, 'other', ?)")
        .bind(&other_campaign)
        .bind(db::now_epoch())
        .execute(&h.pool)
        .await
        .unwrap();
    let other_source = db::new_id();
    sqlx::query(
        r#"
        INSERT INTO sources
            (id, campaign_id, name, root_path, recursive, follow_symlinks,
             include_globs, exclude_globs, change_detection, enabled)
        VALUES (?, ?, 'vault', '/elsewhere', 1, 0, '[]', '[]', 'auto', 1)
        "#,
    )
    .bind(&other_source)
    .bind(&other_campaign)
    .execute(&h.pool)
    .await
    .unwrap();

    let result = ingest::find_source_id(&h.pool, "vault", None).await;
    assert!(matches!(
        result,
        Err(vaultgraph::error::IngestError::AmbiguousSource(_))
    ));

    let id = ingest::find_source_id(&h.pool, "vault", Some(&h.campaign_id))
        .await
        .unwrap();
    assert_eq!(id, h.source_id);
    let id = ingest::find_source_id(&h.pool, "vault", Some(&other_campaign))
        .await
        .unwrap();
    assert_eq!(id, other_source);

    let result = ingest::find_source_id(&h.pool, "nonesuch", None).await;
    assert!(matches!(
        result,
        Err(vaultgraph::error::IngestError::SourceNotFound(_))
    ));
}

#[tokio::test]
async fn failed_apply_rolls_back_graph_writes() {
    let h = harness(&[]).await;
    let payload = serde_json::json!({
        "src": {"kind": "npc", "name": "Elminster"},
        "dst": {"kind": "place", "name": "Waterdeep"},
        "rel": "lives_in",
    });
    let id = suggest::create(
        &h.pool,
        &h.campaign_id,
        vaultgraph::models::SuggestionKind::Edge,
        &payload,
        0.6,
        &serde_json::json!({}),
    )
    .await
    .unwrap();
    suggest::accept(&h.pool, &id).await.unwrap();

    // Make the status flip fail after the graph writes succeeded.
    sqlx::query(
        "CREATE TRIGGER block_apply BEFORE UPDATE ON suggestions \
         WHEN new.status = 'applied' BEGIN SELECT RAISE(ABORT, 'interrupted'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    assert!(suggest::apply(&h.pool, &id).await.is_err());

    // Nothing reached the graph and the suggestion is still retryable.
    assert_eq!(h.count("SELECT COUNT(*) FROM edges").await, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM entities").await, 0);
    let status: String = sqlx::query_scalar("SELECT status FROM suggestions WHERE id = ?")
        .bind(&id)
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(status, "accepted");

    sqlx::query("DROP TRIGGER block_apply")
        .execute(&h.pool)
        .await
        .unwrap();

    // The retry applies cleanly and the weight is counted once.
    let outcome = suggest::apply(&h.pool, &id).await.unwrap();
    assert_eq!(outcome, suggest::ApplyOutcome::Applied);
    assert_eq!(h.count("SELECT COUNT(*) FROM edges").await, 1);
    let weight: f64 = sqlx::query_scalar("SELECT weight FROM edges")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert!((weight - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn disabled_source_refuses_to_run() {
    let h = harness(&[]).await;
    sqlx::query("UPDATE sources SET enabled = 0 WHERE id = ?")
        .bind(&h.source_id)
        .execute(&h.pool)
        .await
        .unwrap();

    let result = ingest::run_ingest(
        &h.pool,
        &h.config,
        &h.source_id,
        &IngestOptions::default(),
        &DisabledEmbedder,
        &NoopExtractor,
        &CancelFlag::new(),
    )
    .await;
    assert!(matches!(
        result,
        Err(vaultgraph::error::IngestError::SourceDisabled(_))
    ));
}
