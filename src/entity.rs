//! Entity resolution and edge writing.
//!
//! Entity identity is `(campaign, kind, normalized name)`. Resolution is a
//! single atomic find-or-create: the upsert races on the uniqueness
//! constraint and the loser reuses the winner's row, so concurrent runs in
//! one campaign can never mint duplicate entities. Aliases are append-only
//! and never overwrite a canonical name.

use sqlx::{Acquire, Row, Sqlite, SqliteConnection, SqlitePool};

use crate::db;

/// Collapse internal whitespace and trim; keeps the original casing for
/// display as `canonical_name`.
pub fn normalize_display(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lookup key: normalized display, lowercased.
pub fn name_key(name: &str) -> String {
    normalize_display(name).to_lowercase()
}

/// Find or create the entity for `(campaign, kind, name)`, checking aliases
/// before minting a new row. Returns the entity id.
///
/// Takes anything a connection can be acquired from, so the same code runs
/// against a pool or inside a caller's transaction.
pub async fn resolve<'a, A>(
    db: A,
    campaign_id: &str,
    kind: &str,
    name: &str,
) -> Result<String, sqlx::Error>
where
    A: Acquire<'a, Database = Sqlite>,
{
    let display = normalize_display(name);
    let key = name_key(name);

    let mut conn = db.acquire().await?;

    if let Some(id) = find_by_alias(&mut *conn, campaign_id, kind, &key).await? {
        return Ok(id);
    }

    // Atomic find-or-create on the uniqueness constraint. The no-op
    // DO UPDATE makes RETURNING yield the existing row on conflict.
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO entities (id, campaign_id, kind, canonical_name, name_key, attrs, created_at)
        VALUES (?, ?, ?, ?, ?, '{}', ?)
        ON CONFLICT(campaign_id, kind, name_key)
            DO UPDATE SET name_key = excluded.name_key
        RETURNING id
        "#,
    )
    .bind(db::new_id())
    .bind(campaign_id)
    .bind(kind)
    .bind(&display)
    .bind(&key)
    .bind(db::now_epoch())
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

async fn find_by_alias(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    kind: &str,
    key: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT e.id
        FROM entity_aliases a
        JOIN entities e ON e.id = a.entity_id
        WHERE e.campaign_id = ? AND e.kind = ? AND a.alias_key = ?
        LIMIT 1
        "#,
    )
    .bind(campaign_id)
    .bind(kind)
    .bind(key)
    .fetch_optional(conn)
    .await
}

/// Append an alias to an entity. Idempotent; never touches the canonical
/// name.
pub async fn add_alias<'a, A>(
    db: A,
    entity_id: &str,
    alias: &str,
) -> Result<(), sqlx::Error>
where
    A: Acquire<'a, Database = Sqlite>,
{
    let display = normalize_display(alias);
    if display.is_empty() {
        return Ok(());
    }
    let mut conn = db.acquire().await?;
    sqlx::query(
        r#"
        INSERT INTO entity_aliases (id, entity_id, alias, alias_key)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(entity_id, alias_key) DO NOTHING
        "#,
    )
    .bind(db::new_id())
    .bind(entity_id)
    .bind(&display)
    .bind(name_key(alias))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Upsert a directed edge. Repeated writes of the same `(src, dst, rel)`
/// accumulate weight and refresh the evidence pointer; a different `rel`
/// between the same pair is a separate edge row.
pub async fn upsert_edge<'a, A>(
    db: A,
    campaign_id: &str,
    src_entity_id: &str,
    dst_entity_id: &str,
    rel: &str,
    weight: f64,
    attrs: &serde_json::Value,
    evidence: &serde_json::Value,
) -> Result<String, sqlx::Error>
where
    A: Acquire<'a, Database = Sqlite>,
{
    let mut conn = db.acquire().await?;
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO edges (id, campaign_id, src_entity_id, dst_entity_id, rel, weight, attrs, evidence, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(src_entity_id, dst_entity_id, rel)
            DO UPDATE SET weight = edges.weight + excluded.weight,
                          evidence = excluded.evidence
        RETURNING id
        "#,
    )
    .bind(db::new_id())
    .bind(campaign_id)
    .bind(src_entity_id)
    .bind(dst_entity_id)
    .bind(rel)
    .bind(weight)
    .bind(attrs.to_string())
    .bind(evidence.to_string())
    .bind(db::now_epoch())
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// An entry in the campaign's name index, used by the alias matcher.
#[derive(Debug, Clone)]
pub struct NameEntry {
    pub entity_id: String,
    pub display: String,
}

/// All canonical names and aliases for a campaign, longest first so greedy
/// matching prefers the most specific name.
pub async fn load_name_index(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Vec<NameEntry>, sqlx::Error> {
    let mut entries = Vec::new();

    let rows = sqlx::query(
        "SELECT id, canonical_name FROM entities WHERE campaign_id = ?",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        entries.push(NameEntry {
            entity_id: row.get("id"),
            display: row.get("canonical_name"),
        });
    }

    let rows = sqlx::query(
        r#"
        SELECT a.entity_id, a.alias
        FROM entity_aliases a
        JOIN entities e ON e.id = a.entity_id
        WHERE e.campaign_id = ?
        "#,
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        entries.push(NameEntry {
            entity_id: row.get("entity_id"),
            display: row.get("alias"),
        });
    }

    entries.sort_by(|a, b| {
        b.display
            .len()
            .cmp(&a.display.len())
            .then_with(|| a.display.cmp(&b.display))
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(normalize_display("  The   Yawning\tPortal "), "The Yawning Portal");
        assert_eq!(name_key("  Elminster  AUMAR "), "elminster aumar");
    }

    #[test]
    fn key_is_case_insensitive() {
        assert_eq!(name_key("ELMINSTER"), name_key("elminster"));
    }
}
