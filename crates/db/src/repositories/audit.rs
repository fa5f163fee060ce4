use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use resq_core::audit::{AuditCategory, AuditEvent, AuditOutcome};

use super::request::parse_timestamp;
use super::{AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persists a batch in one transaction.
    pub async fn append_all(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            insert_event(&mut *tx, event).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_event(&mut *conn, event).await
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                session_id,
                correlation_id,
                event_type,
                event_category,
                actor,
                outcome,
                metadata_json,
                occurred_at
             FROM audit_event
             WHERE session_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

async fn insert_event(
    conn: &mut sqlx::SqliteConnection,
    event: &AuditEvent,
) -> Result<(), RepositoryError> {
    let metadata = serde_json::to_string(&event.metadata)
        .map_err(|error| RepositoryError::Decode(format!("audit metadata: {error}")))?;

    sqlx::query(
        "INSERT INTO audit_event (
            id,
            session_id,
            correlation_id,
            event_type,
            event_category,
            actor,
            outcome,
            metadata_json,
            occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.session_id.as_deref())
    .bind(&event.correlation_id)
    .bind(&event.event_type)
    .bind(event.category.as_str())
    .bind(&event.actor)
    .bind(event.outcome.as_str())
    .bind(metadata)
    .bind(event.occurred_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

fn event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category = row
        .try_get::<String, _>("event_category")?
        .parse::<AuditCategory>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let outcome = row
        .try_get::<String, _>("outcome")?
        .parse::<AuditOutcome>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;
    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata = serde_json::from_str::<BTreeMap<String, String>>(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid audit metadata: {error}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        correlation_id: row.try_get("correlation_id")?,
        event_type: row.try_get("event_type")?,
        category,
        actor: row.try_get("actor")?,
        outcome,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use resq_core::audit::{AuditCategory, AuditEvent, AuditOutcome};

    use super::SqlAuditRepository;
    use crate::migrations;
    use crate::repositories::AuditRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn event(session: &str, event_type: &str) -> AuditEvent {
        AuditEvent::new(event_type, AuditCategory::Wizard, AuditOutcome::Success)
            .in_session(session)
            .by("user-1")
            .with_metadata("step", "1")
    }

    #[tokio::test]
    async fn events_round_trip_per_session() {
        let pool = setup_pool().await;
        let repo = SqlAuditRepository::new(pool.clone());

        let first = event("session-a", "wizard.transition_applied");
        let second = event("session-a", "wizard.session_closed");
        repo.append_all(&[first.clone(), second.clone()]).await.expect("append batch");
        repo.append(&event("session-b", "wizard.step_blocked")).await.expect("append single");

        let events = repo.list_for_session("session-a").await.expect("list");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, first.event_type);
        assert_eq!(events[0].metadata.get("step").map(String::as_str), Some("1"));
        assert_eq!(events[1].event_id, second.event_id);

        pool.close().await;
    }
}
