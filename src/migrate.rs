use anyhow::Result;
use sqlx::SqlitePool;

/// Create the full schema. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            system TEXT NOT NULL DEFAULT '',
            embedding_model TEXT,
            embedding_dim INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            root_path TEXT NOT NULL,
            recursive INTEGER NOT NULL DEFAULT 1,
            follow_symlinks INTEGER NOT NULL DEFAULT 0,
            include_globs TEXT NOT NULL DEFAULT '[]',
            exclude_globs TEXT NOT NULL DEFAULT '[]',
            change_detection TEXT NOT NULL DEFAULT 'auto',
            enabled INTEGER NOT NULL DEFAULT 1,
            last_scan_at INTEGER,
            last_ingest_at INTEGER,
            UNIQUE(campaign_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_folders (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            rel_path TEXT NOT NULL,
            parent_id TEXT REFERENCES source_folders(id) ON DELETE SET NULL,
            depth INTEGER NOT NULL DEFAULT 0,
            last_seen_at INTEGER NOT NULL,
            UNIQUE(source_id, rel_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_files (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            folder_id TEXT REFERENCES source_folders(id) ON DELETE SET NULL,
            rel_path TEXT NOT NULL,
            ext TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            mtime_epoch INTEGER NOT NULL DEFAULT 0,
            sha256 TEXT,
            status TEXT NOT NULL DEFAULT 'seen',
            last_seen_at INTEGER NOT NULL,
            last_ingested_at INTEGER,
            last_ingest_status TEXT NOT NULL DEFAULT 'never',
            error TEXT,
            UNIQUE(source_id, rel_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_runs (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            trigger TEXT NOT NULL DEFAULT 'cli',
            status TEXT NOT NULL DEFAULT 'running',
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            stats TEXT NOT NULL DEFAULT '{}',
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_run_files (
            run_id TEXT NOT NULL REFERENCES ingest_runs(id) ON DELETE CASCADE,
            file_id TEXT NOT NULL REFERENCES source_files(id) ON DELETE CASCADE,
            action TEXT NOT NULL,
            status TEXT NOT NULL,
            reason TEXT,
            error TEXT,
            PRIMARY KEY (run_id, file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // source_file_id is a weak back-reference: a document outlives its file.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            source_file_id TEXT REFERENCES source_files(id) ON DELETE SET NULL,
            doc_type TEXT NOT NULL DEFAULT 'md',
            title TEXT NOT NULL DEFAULT '',
            frontmatter TEXT NOT NULL DEFAULT '{}',
            body TEXT NOT NULL DEFAULT '',
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            section_path TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB,
            embedding_model TEXT,
            UNIQUE(document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            attrs TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            UNIQUE(campaign_id, kind, name_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_aliases (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            alias TEXT NOT NULL,
            alias_key TEXT NOT NULL,
            UNIQUE(entity_id, alias_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edges (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            src_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            dst_entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            rel TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            attrs TEXT NOT NULL DEFAULT '{}',
            evidence TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            UNIQUE(src_entity_id, dst_entity_id, rel)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mentions (
            id TEXT PRIMARY KEY,
            chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
            entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            confidence REAL NOT NULL,
            extractor TEXT NOT NULL,
            UNIQUE(chunk_id, entity_id, start_offset, extractor)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS suggestions (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            confidence REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'new',
            evidence TEXT NOT NULL DEFAULT '{}',
            error TEXT,
            created_at INTEGER NOT NULL,
            reviewed_at INTEGER,
            applied_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_files_source ON source_files(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_source_file ON documents(source_file_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mentions_entity ON mentions(entity_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_suggestions_status ON suggestions(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_source ON ingest_runs(source_id, status)")
        .execute(pool)
        .await?;

    Ok(())
}
