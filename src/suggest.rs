//! Suggestion queue: pending graph mutations awaiting review.
//!
//! Lifecycle: `new → accepted → applied`, or `new → rejected` (terminal).
//! The transition rules live in [`transition`], a pure function the tests
//! drive directly. Materialization happens at apply time, not accept time,
//! so acceptance and application can be batched independently. Applying an
//! already-applied suggestion is a no-op, which makes apply safe to retry.

use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use thiserror::Error;

use crate::db;
use crate::entity;
use crate::models::{SuggestionKind, SuggestionStatus};

/// Review events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEvent {
    Accept,
    Reject,
    Apply,
}

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("suggestion not found: {0}")]
    NotFound(String),

    #[error("invalid transition: cannot {event:?} a {status:?} suggestion")]
    InvalidTransition {
        status: SuggestionStatus,
        event: ReviewEvent,
    },

    #[error("malformed suggestion payload: {0}")]
    Payload(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Outcome of an apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The suggestion was already applied; nothing changed.
    AlreadyApplied,
}

/// Pure transition function for the review lifecycle.
pub fn transition(
    status: SuggestionStatus,
    event: ReviewEvent,
) -> Result<SuggestionStatus, SuggestError> {
    use ReviewEvent::*;
    use SuggestionStatus::*;

    match (status, event) {
        (New, Accept) => Ok(Accepted),
        (New, Reject) => Ok(Rejected),
        (Accepted, Apply) => Ok(Applied),
        // Idempotent re-apply; the caller turns this into a no-op.
        (Applied, Apply) => Ok(Applied),
        (status, event) => Err(SuggestError::InvalidTransition { status, event }),
    }
}

/// Insert a new suggestion and return its id.
pub async fn create(
    pool: &SqlitePool,
    campaign_id: &str,
    kind: SuggestionKind,
    payload: &serde_json::Value,
    confidence: f64,
    evidence: &serde_json::Value,
) -> Result<String, sqlx::Error> {
    let id = db::new_id();
    sqlx::query(
        r#"
        INSERT INTO suggestions (id, campaign_id, kind, payload, confidence, status, evidence, created_at)
        VALUES (?, ?, ?, ?, ?, 'new', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(campaign_id)
    .bind(kind.as_str())
    .bind(payload.to_string())
    .bind(confidence)
    .bind(evidence.to_string())
    .bind(db::now_epoch())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn accept(pool: &SqlitePool, id: &str) -> Result<(), SuggestError> {
    review(pool, id, ReviewEvent::Accept).await
}

pub async fn reject(pool: &SqlitePool, id: &str) -> Result<(), SuggestError> {
    review(pool, id, ReviewEvent::Reject).await
}

async fn review(pool: &SqlitePool, id: &str, event: ReviewEvent) -> Result<(), SuggestError> {
    let status = fetch_status(pool, id).await?;
    let next = transition(status, event)?;

    sqlx::query("UPDATE suggestions SET status = ?, reviewed_at = ? WHERE id = ?")
        .bind(next.as_str())
        .bind(db::now_epoch())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Materialize an accepted suggestion into the graph. Idempotent for
/// already-applied suggestions.
pub async fn apply(pool: &SqlitePool, id: &str) -> Result<ApplyOutcome, SuggestError> {
    let row = sqlx::query(
        "SELECT campaign_id, kind, payload, status FROM suggestions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| SuggestError::NotFound(id.to_string()))?;

    let status = SuggestionStatus::from_str(row.get::<String, _>("status").as_str())
        .map_err(SuggestError::Payload)?;

    if status == SuggestionStatus::Applied {
        return Ok(ApplyOutcome::AlreadyApplied);
    }
    transition(status, ReviewEvent::Apply)?;

    let campaign_id: String = row.get("campaign_id");
    let kind = SuggestionKind::from_str(row.get::<String, _>("kind").as_str())
        .map_err(SuggestError::Payload)?;
    let payload: serde_json::Value =
        serde_json::from_str(&row.get::<String, _>("payload"))
            .map_err(|e| SuggestError::Payload(e.to_string()))?;

    // Graph writes and the status flip commit together: a failure anywhere
    // rolls everything back and the retry starts from 'accepted' with
    // nothing applied, so weights are never counted twice.
    let mut tx = pool.begin().await?;

    match kind {
        SuggestionKind::Entity => apply_entity(&mut tx, &campaign_id, &payload).await?,
        SuggestionKind::Edge => apply_edge(&mut tx, &campaign_id, &payload).await?,
        SuggestionKind::Tag => apply_tag(&mut tx, &campaign_id, &payload).await?,
        SuggestionKind::Attribute => apply_attribute(&mut tx, &campaign_id, &payload).await?,
    }

    sqlx::query("UPDATE suggestions SET status = 'applied', applied_at = ? WHERE id = ?")
        .bind(db::now_epoch())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(ApplyOutcome::Applied)
}

async fn fetch_status(pool: &SqlitePool, id: &str) -> Result<SuggestionStatus, SuggestError> {
    let raw: Option<String> = sqlx::query_scalar("SELECT status FROM suggestions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let raw = raw.ok_or_else(|| SuggestError::NotFound(id.to_string()))?;
    SuggestionStatus::from_str(&raw).map_err(SuggestError::Payload)
}

fn str_field<'a>(payload: &'a serde_json::Value, key: &str) -> Result<&'a str, SuggestError> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| SuggestError::Payload(format!("missing field '{}'", key)))
}

fn entity_ref(
    payload: &serde_json::Value,
    key: &str,
) -> Result<(String, String), SuggestError> {
    let obj = payload
        .get(key)
        .ok_or_else(|| SuggestError::Payload(format!("missing field '{}'", key)))?;
    Ok((
        str_field(obj, "kind")?.to_string(),
        str_field(obj, "name")?.to_string(),
    ))
}

async fn apply_entity(
    tx: &mut Transaction<'_, Sqlite>,
    campaign_id: &str,
    payload: &serde_json::Value,
) -> Result<(), SuggestError> {
    let kind = str_field(payload, "kind")?;
    let name = str_field(payload, "name")?;
    let entity_id = entity::resolve(&mut **tx, campaign_id, kind, name).await?;

    if let Some(aliases) = payload.get("aliases").and_then(|v| v.as_array()) {
        for alias in aliases.iter().filter_map(|a| a.as_str()) {
            entity::add_alias(&mut **tx, &entity_id, alias).await?;
        }
    }
    Ok(())
}

async fn apply_edge(
    tx: &mut Transaction<'_, Sqlite>,
    campaign_id: &str,
    payload: &serde_json::Value,
) -> Result<(), SuggestError> {
    let (src_kind, src_name) = entity_ref(payload, "src")?;
    let (dst_kind, dst_name) = entity_ref(payload, "dst")?;
    let rel = str_field(payload, "rel")?;
    let weight = payload.get("weight").and_then(|v| v.as_f64()).unwrap_or(1.0);

    let src = entity::resolve(&mut **tx, campaign_id, &src_kind, &src_name).await?;
    let dst = entity::resolve(&mut **tx, campaign_id, &dst_kind, &dst_name).await?;

    let attrs = payload
        .get("attrs")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let evidence = payload
        .get("evidence")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    entity::upsert_edge(&mut **tx, campaign_id, &src, &dst, rel, weight, &attrs, &evidence)
        .await?;
    Ok(())
}

async fn apply_tag(
    tx: &mut Transaction<'_, Sqlite>,
    campaign_id: &str,
    payload: &serde_json::Value,
) -> Result<(), SuggestError> {
    let (kind, name) = entity_ref(payload, "entity")?;
    let tag = str_field(payload, "tag")?;
    let entity_id = entity::resolve(&mut **tx, campaign_id, &kind, &name).await?;

    let mut attrs = fetch_attrs(&mut **tx, &entity_id).await?;
    let tags = attrs
        .entry("tags".to_string())
        .or_insert_with(|| serde_json::json!([]));
    if let Some(arr) = tags.as_array_mut() {
        if !arr.iter().any(|t| t.as_str() == Some(tag)) {
            arr.push(serde_json::json!(tag));
        }
    }
    store_attrs(&mut **tx, &entity_id, &attrs).await?;
    Ok(())
}

async fn apply_attribute(
    tx: &mut Transaction<'_, Sqlite>,
    campaign_id: &str,
    payload: &serde_json::Value,
) -> Result<(), SuggestError> {
    let (kind, name) = entity_ref(payload, "entity")?;
    let key = str_field(payload, "key")?;
    let value = payload
        .get("value")
        .cloned()
        .ok_or_else(|| SuggestError::Payload("missing field 'value'".to_string()))?;
    let entity_id = entity::resolve(&mut **tx, campaign_id, &kind, &name).await?;

    let mut attrs = fetch_attrs(&mut **tx, &entity_id).await?;
    attrs.insert(key.to_string(), value);
    store_attrs(&mut **tx, &entity_id, &attrs).await?;
    Ok(())
}

async fn fetch_attrs(
    conn: &mut SqliteConnection,
    entity_id: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, SuggestError> {
    let raw: String = sqlx::query_scalar("SELECT attrs FROM entities WHERE id = ?")
        .bind(entity_id)
        .fetch_one(conn)
        .await?;
    match serde_json::from_str(&raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

async fn store_attrs(
    conn: &mut SqliteConnection,
    entity_id: &str,
    attrs: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), SuggestError> {
    sqlx::query("UPDATE entities SET attrs = ? WHERE id = ?")
        .bind(serde_json::Value::Object(attrs.clone()).to_string())
        .bind(entity_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use SuggestionStatus::*;

    #[test]
    fn happy_path_transitions() {
        assert_eq!(transition(New, ReviewEvent::Accept).unwrap(), Accepted);
        assert_eq!(transition(Accepted, ReviewEvent::Apply).unwrap(), Applied);
        assert_eq!(transition(New, ReviewEvent::Reject).unwrap(), Rejected);
    }

    #[test]
    fn reapply_is_allowed() {
        assert_eq!(transition(Applied, ReviewEvent::Apply).unwrap(), Applied);
    }

    #[test]
    fn invalid_transitions_rejected() {
        assert!(transition(New, ReviewEvent::Apply).is_err());
        assert!(transition(Rejected, ReviewEvent::Apply).is_err());
        assert!(transition(Rejected, ReviewEvent::Accept).is_err());
        assert!(transition(Accepted, ReviewEvent::Accept).is_err());
        assert!(transition(Accepted, ReviewEvent::Reject).is_err());
        assert!(transition(Applied, ReviewEvent::Reject).is_err());
    }
}
