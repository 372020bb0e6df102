//! # VaultGraph CLI (`vg`)
//!
//! The `vg` binary drives the full pipeline: database initialization,
//! campaign and source management, ingestion runs, suggestion review, and
//! search.
//!
//! ## Usage
//!
//! ```bash
//! vg --config ./vaultgraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vg init` | Create the SQLite database and run schema migrations |
//! | `vg campaign add <name>` | Create a campaign |
//! | `vg campaign list` | List campaigns |
//! | `vg source add` | Register a filesystem source under a campaign |
//! | `vg source list` | List sources with their last ingest times |
//! | `vg sync <source>` | Run an ingestion pass over one source |
//! | `vg search "<query>"` | Search indexed chunks |
//! | `vg suggest list` | Show pending graph suggestions |
//! | `vg suggest accept/reject/apply <id>` | Review a suggestion |
//! | `vg runs <source>` | Show recent ingest runs |
//!
//! ## Examples
//!
//! ```bash
//! vg init
//! vg campaign add waterdeep
//! vg source add --campaign waterdeep --name vault --root ~/vault --include '**/*.md'
//! vg sync vault
//! vg search "yawning portal" --campaign waterdeep --mode hybrid
//! vg suggest list --campaign waterdeep
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

use vaultgraph::config::{self, Config};
use vaultgraph::embedding;
use vaultgraph::ingest::{self, CancelFlag, IngestOptions};
use vaultgraph::llm::NoopExtractor;
use vaultgraph::models::{ChangeDetection, SuggestionStatus};
use vaultgraph::search::{self, SearchMode};
use vaultgraph::{db, migrate, suggest};

/// VaultGraph — campaign vault ingestion and knowledge-graph sync.
#[derive(Parser)]
#[command(
    name = "vg",
    about = "VaultGraph — turn a campaign content vault into a searchable knowledge graph",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./vaultgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Idempotent.
    Init,

    /// Manage campaigns.
    Campaign {
        #[command(subcommand)]
        action: CampaignAction,
    },

    /// Manage filesystem sources.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Run an ingestion pass over one source.
    ///
    /// Scans the source root, classifies each file as new, modified,
    /// unchanged, or deleted, and ingests what changed. Every considered
    /// file is recorded on the run.
    Sync {
        /// Source name.
        source: String,

        /// Campaign the source belongs to. Required when the same source
        /// name exists in more than one campaign.
        #[arg(long)]
        campaign: Option<String>,

        /// Classify and record files without ingesting or deleting.
        #[arg(long)]
        dry_run: bool,

        /// Hash every file regardless of metadata.
        #[arg(long)]
        force_rehash: bool,

        /// Cap the number of files ingested this run.
        #[arg(long)]
        max_files: Option<usize>,

        /// Recorded on the run row (cli, watch, api).
        #[arg(long, default_value = "cli")]
        trigger: String,
    },

    /// Search indexed chunks.
    Search {
        /// The search query string.
        query: String,

        /// Campaign name.
        #[arg(long)]
        campaign: String,

        /// Search mode: keyword (FTS5), semantic (vector), or hybrid.
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Review graph suggestions.
    Suggest {
        #[command(subcommand)]
        action: SuggestAction,
    },

    /// Show recent ingest runs for a source.
    Runs {
        /// Source name.
        source: String,

        /// Campaign the source belongs to. Required when the same source
        /// name exists in more than one campaign.
        #[arg(long)]
        campaign: Option<String>,

        /// Maximum number of runs to show.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum CampaignAction {
    /// Create a campaign.
    Add { name: String },
    /// List campaigns.
    List,
}

#[derive(Subcommand)]
enum SourceAction {
    /// Register a filesystem source under a campaign.
    Add {
        /// Campaign name the source belongs to.
        #[arg(long)]
        campaign: String,

        /// Source name, unique within the campaign.
        #[arg(long)]
        name: String,

        /// Root directory to scan.
        #[arg(long)]
        root: PathBuf,

        /// Include glob, repeatable. Empty means everything.
        #[arg(long = "include")]
        include: Vec<String>,

        /// Exclude glob, repeatable. Wins over includes.
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Change detection: mtime_size, sha256, or auto.
        #[arg(long, default_value = "auto")]
        change_detection: String,

        /// Scan only the top level of the root.
        #[arg(long)]
        no_recursive: bool,

        /// Follow symlinks during scans.
        #[arg(long)]
        follow_symlinks: bool,
    },
    /// List sources.
    List {
        /// Restrict to one campaign.
        #[arg(long)]
        campaign: Option<String>,
    },
}

#[derive(Subcommand)]
enum SuggestAction {
    /// List suggestions.
    List {
        /// Campaign name.
        #[arg(long)]
        campaign: String,

        /// Filter by status: new, accepted, rejected, applied.
        #[arg(long, default_value = "new")]
        status: String,
    },
    /// Accept a pending suggestion.
    Accept { id: String },
    /// Reject a pending suggestion.
    Reject { id: String },
    /// Apply an accepted suggestion to the graph.
    Apply { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Campaign { action } => {
            let pool = db::connect(&cfg).await?;
            match action {
                CampaignAction::Add { name } => campaign_add(&pool, &name).await?,
                CampaignAction::List => campaign_list(&pool).await?,
            }
            pool.close().await;
        }
        Commands::Source { action } => {
            let pool = db::connect(&cfg).await?;
            match action {
                SourceAction::Add {
                    campaign,
                    name,
                    root,
                    include,
                    exclude,
                    change_detection,
                    no_recursive,
                    follow_symlinks,
                } => {
                    source_add(
                        &pool,
                        &campaign,
                        &name,
                        &root,
                        &include,
                        &exclude,
                        &change_detection,
                        !no_recursive,
                        follow_symlinks,
                    )
                    .await?
                }
                SourceAction::List { campaign } => source_list(&pool, campaign.as_deref()).await?,
            }
            pool.close().await;
        }
        Commands::Sync {
            source,
            campaign,
            dry_run,
            force_rehash,
            max_files,
            trigger,
        } => {
            run_sync(
                &cfg,
                &source,
                campaign.as_deref(),
                dry_run,
                force_rehash,
                max_files,
                trigger,
            )
            .await?;
        }
        Commands::Search {
            query,
            campaign,
            mode,
            limit,
        } => {
            run_search(&cfg, &query, &campaign, &mode, limit).await?;
        }
        Commands::Suggest { action } => {
            let pool = db::connect(&cfg).await?;
            match action {
                SuggestAction::List { campaign, status } => {
                    suggest_list(&pool, &campaign, &status).await?
                }
                SuggestAction::Accept { id } => {
                    suggest::accept(&pool, &id).await?;
                    println!("Accepted {}.", id);
                }
                SuggestAction::Reject { id } => {
                    suggest::reject(&pool, &id).await?;
                    println!("Rejected {}.", id);
                }
                SuggestAction::Apply { id } => match suggest::apply(&pool, &id).await? {
                    suggest::ApplyOutcome::Applied => println!("Applied {}.", id),
                    suggest::ApplyOutcome::AlreadyApplied => {
                        println!("{} was already applied; nothing changed.", id)
                    }
                },
            }
            pool.close().await;
        }
        Commands::Runs {
            source,
            campaign,
            limit,
        } => {
            let pool = db::connect(&cfg).await?;
            runs_list(&pool, &source, campaign.as_deref(), limit).await?;
            pool.close().await;
        }
    }

    Ok(())
}

async fn campaign_add(pool: &SqlitePool, name: &str) -> Result<()> {
    let id = db::new_id();
    sqlx::query("INSERT INTO campaigns (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(db::now_epoch())
        .execute(pool)
        .await?;
    println!("Created campaign '{}' ({}).", name, id);
    Ok(())
}

async fn campaign_list(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query("SELECT id, name FROM campaigns ORDER BY name")
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        println!("No campaigns.");
        return Ok(());
    }
    for row in rows {
        println!("{}  {}", row.get::<String, _>("id"), row.get::<String, _>("name"));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn source_add(
    pool: &SqlitePool,
    campaign: &str,
    name: &str,
    root: &std::path::Path,
    include: &[String],
    exclude: &[String],
    change_detection: &str,
    recursive: bool,
    follow_symlinks: bool,
) -> Result<()> {
    let strategy = ChangeDetection::from_str(change_detection)
        .map_err(|e| anyhow::anyhow!(e))?;
    let campaign_id = find_campaign(pool, campaign).await?;

    let id = db::new_id();
    sqlx::query(
        r#"
        INSERT INTO sources
            (id, campaign_id, name, root_path, recursive, follow_symlinks,
             include_globs, exclude_globs, change_detection, enabled)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(&id)
    .bind(&campaign_id)
    .bind(name)
    .bind(root.to_string_lossy().as_ref())
    .bind(recursive as i64)
    .bind(follow_symlinks as i64)
    .bind(serde_json::to_string(include)?)
    .bind(serde_json::to_string(exclude)?)
    .bind(strategy.as_str())
    .execute(pool)
    .await?;
    println!("Created source '{}' ({}).", name, id);
    Ok(())
}

async fn source_list(pool: &SqlitePool, campaign: Option<&str>) -> Result<()> {
    let rows = match campaign {
        Some(c) => {
            let campaign_id = find_campaign(pool, c).await?;
            sqlx::query(
                r#"
                SELECT s.name, s.root_path, s.change_detection, s.enabled, s.last_ingest_at
                FROM sources s WHERE s.campaign_id = ? ORDER BY s.name
                "#,
            )
            .bind(campaign_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT s.name, s.root_path, s.change_detection, s.enabled, s.last_ingest_at
                FROM sources s ORDER BY s.name
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    if rows.is_empty() {
        println!("No sources.");
        return Ok(());
    }
    for row in rows {
        let enabled: i64 = row.get("enabled");
        let last: Option<i64> = row.get("last_ingest_at");
        let last_display = last
            .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<20} {:<40} {:<10} {:<8} last ingest: {}",
            row.get::<String, _>("name"),
            row.get::<String, _>("root_path"),
            row.get::<String, _>("change_detection"),
            if enabled != 0 { "enabled" } else { "disabled" },
            last_display
        );
    }
    Ok(())
}

async fn run_sync(
    cfg: &Config,
    source_name: &str,
    campaign: Option<&str>,
    dry_run: bool,
    force_rehash: bool,
    max_files: Option<usize>,
    trigger: String,
) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let source_id = find_source(&pool, source_name, campaign).await?;

    let embedder = embedding::create_embedder(&cfg.embedding)?;
    let llm = NoopExtractor;
    let opts = IngestOptions {
        trigger,
        dry_run,
        force_rehash,
        max_files,
    };

    let outcome = ingest::run_ingest(
        &pool,
        cfg,
        &source_id,
        &opts,
        embedder.as_ref(),
        &llm,
        &CancelFlag::new(),
    )
    .await?;

    let s = &outcome.stats;
    println!("Run {} finished: {}", outcome.run_id, outcome.status.as_str());
    println!(
        "  files: {} seen, {} new, {} changed, {} unchanged, {} deleted",
        s.files_seen, s.files_new, s.files_changed, s.files_unchanged, s.files_deleted
    );
    println!(
        "  docs: {} ingested, {} skipped; {} chunks written",
        s.docs_ingested, s.docs_skipped, s.chunks_written
    );
    println!(
        "  graph: {} mentions, {} edges, {} suggestions",
        s.mentions_written, s.edges_written, s.suggestions_created
    );
    if !s.errors.is_empty() {
        println!("  errors ({}):", s.errors.len());
        for err in s.errors.iter().take(10) {
            println!("    {}", err);
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    campaign: &str,
    mode: &str,
    limit: Option<i64>,
) -> Result<()> {
    let mode = SearchMode::from_str(mode).map_err(|e| anyhow::anyhow!(e))?;
    let pool = db::connect(cfg).await?;
    let campaign_id = find_campaign(&pool, campaign).await?;
    let embedder = embedding::create_embedder(&cfg.embedding)?;

    let results = search::search_chunks(
        &pool,
        cfg,
        &campaign_id,
        query,
        mode,
        limit,
        embedder.as_ref(),
    )
    .await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title = result.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.2}] {}", i + 1, result.score, title);
        if let Some(section) = result.section_path.as_deref().filter(|s| !s.is_empty()) {
            println!("    section: {}", section);
        }
        println!("    excerpt: \"{}\"", result.snippet.replace('\n', " "));
        println!("    chunk: {}", result.chunk_id);
        println!();
    }

    pool.close().await;
    Ok(())
}

async fn suggest_list(pool: &SqlitePool, campaign: &str, status: &str) -> Result<()> {
    let status = SuggestionStatus::from_str(status).map_err(|e| anyhow::anyhow!(e))?;
    let campaign_id = find_campaign(pool, campaign).await?;

    let rows = sqlx::query(
        r#"
        SELECT id, kind, payload, confidence, created_at
        FROM suggestions
        WHERE campaign_id = ? AND status = ?
        ORDER BY confidence DESC, created_at ASC
        "#,
    )
    .bind(&campaign_id)
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        println!("No {} suggestions.", status.as_str());
        return Ok(());
    }
    for row in rows {
        println!(
            "{}  [{:.2}] {:<9} {}",
            row.get::<String, _>("id"),
            row.get::<f64, _>("confidence"),
            row.get::<String, _>("kind"),
            row.get::<String, _>("payload")
        );
    }
    Ok(())
}

async fn runs_list(
    pool: &SqlitePool,
    source_name: &str,
    campaign: Option<&str>,
    limit: i64,
) -> Result<()> {
    let source_id = find_source(pool, source_name, campaign).await?;
    let rows = sqlx::query(
        r#"
        SELECT id, trigger, status, started_at, finished_at, stats
        FROM ingest_runs
        WHERE source_id = ?
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(&source_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        println!("No runs for source '{}'.", source_name);
        return Ok(());
    }
    for row in rows {
        let started: i64 = row.get("started_at");
        let started_display = chrono::DateTime::from_timestamp(started, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{}  {:<8} {:<6} started {}  {}",
            row.get::<String, _>("id"),
            row.get::<String, _>("status"),
            row.get::<String, _>("trigger"),
            started_display,
            row.get::<String, _>("stats")
        );
    }
    Ok(())
}

async fn find_campaign(pool: &SqlitePool, name: &str) -> Result<String> {
    let id: Option<String> = sqlx::query_scalar("SELECT id FROM campaigns WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    match id {
        Some(id) => Ok(id),
        None => bail!("campaign not found: {}", name),
    }
}

async fn find_source(pool: &SqlitePool, name: &str, campaign: Option<&str>) -> Result<String> {
    let campaign_id = match campaign {
        Some(c) => Some(find_campaign(pool, c).await?),
        None => None,
    };
    Ok(ingest::find_source_id(pool, name, campaign_id.as_deref()).await?)
}
