use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;
use uuid::Uuid;

use resq_core::domain::{RecordId, RecordKind, SubmissionKey};

use super::{InsertOutcome, NewRequest, RepositoryError, RequestRepository, StoredRequest};
use crate::DbPool;

const COLUMNS: &str = "id, client_request_id, kind, actor_id, payload, created_at";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_client_request_id(
        &self,
        kind: RecordKind,
        key: &SubmissionKey,
    ) -> Result<Option<StoredRequest>, RepositoryError> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE client_request_id = ?", kind.table());
        let row = sqlx::query(&sql).bind(&key.0).fetch_optional(&self.pool).await?;
        row.map(request_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn insert_or_get(&self, request: NewRequest) -> Result<InsertOutcome, RepositoryError> {
        let payload = serde_json::to_string(&request.payload)
            .map_err(|error| RepositoryError::Decode(format!("payload is not JSON: {error}")))?;
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(client_request_id) DO NOTHING",
            request.kind.table()
        );

        let inserted = sqlx::query(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(&request.client_request_id.0)
            .bind(request.kind.label())
            .bind(&request.actor_id)
            .bind(payload)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;

        let record = self
            .find_by_client_request_id(request.kind, &request.client_request_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::Decode(format!(
                    "record for client request `{}` vanished after insert",
                    request.client_request_id
                ))
            })?;

        if !inserted {
            debug!(
                event_name = "db.request.duplicate",
                client_request_id = %request.client_request_id,
                record_id = %record.id,
                "returning existing record for repeated submission"
            );
        }

        Ok(InsertOutcome { record, created: inserted })
    }

    async fn find_by_id(
        &self,
        kind: RecordKind,
        id: &RecordId,
    ) -> Result<Option<StoredRequest>, RepositoryError> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = ?", kind.table());
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.map(request_from_row).transpose()
    }

    async fn list_by_kind(&self, kind: RecordKind) -> Result<Vec<StoredRequest>, RepositoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE kind = ? ORDER BY created_at ASC, id ASC",
            kind.table()
        );
        let rows = sqlx::query(&sql).bind(kind.label()).fetch_all(&self.pool).await?;
        rows.into_iter().map(request_from_row).collect()
    }
}

fn request_from_row(row: SqliteRow) -> Result<StoredRequest, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = kind_raw
        .parse::<RecordKind>()
        .map_err(|_| RepositoryError::Decode(format!("unknown record kind `{kind_raw}`")))?;

    let payload_raw = row.try_get::<String, _>("payload")?;
    let payload = serde_json::from_str::<Value>(&payload_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid payload json: {error}")))?;

    Ok(StoredRequest {
        id: RecordId(row.try_get("id")?),
        kind,
        client_request_id: SubmissionKey(row.try_get("client_request_id")?),
        actor_id: row.try_get("actor_id")?,
        payload,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
