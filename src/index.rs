//! Chunk indexing: persist a document's chunk set with full-text and
//! vector index material.
//!
//! A document's chunks are replaced wholesale in one transaction (chunk
//! rows plus the FTS mirror), so a body change can never leave a mix of
//! old and new chunks behind. The FTS content is the stored chunk text
//! verbatim — no stemming or locale-dependent normalization, so search
//! behavior is identical across environments. Embeddings are requested in
//! one batch per document and tagged with the producing model.

use sqlx::SqlitePool;

use crate::db;
use crate::embedding::{vec_to_blob, Embedder};
use crate::error::FileError;
use crate::models::Chunk;

/// Replace `document_id`'s chunk set. Returns (chunk ids in order).
///
/// An embedding failure surfaces as a [`FileError`] for this file only;
/// the caller records it and continues with the rest of the run.
pub async fn replace_chunks(
    pool: &SqlitePool,
    campaign_id: &str,
    document_id: &str,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
) -> Result<Vec<String>, FileError> {
    let vectors: Option<Vec<Vec<f32>>> = if embedder.is_enabled() && !chunks.is_empty() {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        Some(embedder.embed(&texts).await?)
    } else {
        None
    };

    let model_name = embedder.is_enabled().then(|| embedder.model_name().to_string());

    let mut tx = pool.begin().await.map_err(FileError::Storage)?;

    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(FileError::Storage)?;

    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(FileError::Storage)?;

    let mut ids = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        let id = db::new_id();
        let blob = vectors
            .as_ref()
            .and_then(|vs| vs.get(i))
            .map(|v| vec_to_blob(v));

        sqlx::query(
            r#"
            INSERT INTO chunks
                (id, campaign_id, document_id, chunk_index, section_path, content, hash, embedding, embedding_model)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(campaign_id)
        .bind(document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.section_path)
        .bind(&chunk.content)
        .bind(&chunk.hash)
        .bind(blob)
        .bind(&model_name)
        .execute(&mut *tx)
        .await
        .map_err(FileError::Storage)?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, content) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(document_id)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await
            .map_err(FileError::Storage)?;

        ids.push(id);
    }

    tx.commit().await.map_err(FileError::Storage)?;
    Ok(ids)
}
