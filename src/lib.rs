//! # VaultGraph
//!
//! A local-first ingestion pipeline that turns a campaign content vault
//! (Markdown notes, PDFs) into a searchable knowledge graph in SQLite.
//!
//! VaultGraph scans configured filesystem sources, detects changed files,
//! builds normalized documents with YAML front matter, chunks and
//! optionally embeds them, and extracts entities, mentions, and edges into
//! a per-campaign graph. Uncertain extractions land in a suggestion queue
//! for human review; nothing from an LLM reaches the graph without passing
//! through it.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │  Scan   │──▶│  Change  │──▶│ Document  │──▶│  Chunk   │
//! │ sources │   │ detect   │   │  build    │   │ + embed  │
//! └─────────┘   └──────────┘   └───────────┘   └────┬─────┘
//!                                                   │
//!                              ┌────────────────────┤
//!                              ▼                    ▼
//!                        ┌──────────┐         ┌──────────┐
//!                        │ Extract  │────────▶│ Suggest  │
//!                        │ graph    │         │ queue    │
//!                        └──────────┘         └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core row types and lifecycle enums |
//! | [`filter`] | Include/exclude globs and the containment boundary |
//! | [`scanner`] | Filesystem snapshots and folder bookkeeping |
//! | [`change`] | Change-detection strategies |
//! | [`document`] | Front matter parsing and body normalization |
//! | [`chunk`] | Heading-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Transactional chunk + FTS indexing |
//! | [`entity`] | Entity resolution and edge upserts |
//! | [`extract`] | Wikilink, alias, and LLM extraction |
//! | [`llm`] | LLM extractor collaborator trait |
//! | [`suggest`] | Suggestion review queue |
//! | [`ingest`] | Run orchestration |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod change;
pub mod chunk;
pub mod config;
pub mod db;
pub mod document;
pub mod embedding;
pub mod entity;
pub mod error;
pub mod extract;
pub mod filter;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod scanner;
pub mod search;
pub mod suggest;
