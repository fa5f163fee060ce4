use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use resq_core::domain::{RecordId, RecordKind};

use super::{InsertOutcome, NewRequest, RepositoryError, RequestRepository, StoredRequest};

/// Keyed by client request id; mirrors the UNIQUE constraint of the SQL tables.
#[derive(Default)]
pub struct InMemoryRequestRepository {
    records: RwLock<HashMap<String, StoredRequest>>,
}

impl InMemoryRequestRepository {
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn insert_or_get(&self, request: NewRequest) -> Result<InsertOutcome, RepositoryError> {
        if request.actor_id.trim().is_empty() {
            return Err(RepositoryError::Constraint("actor_id must not be empty".to_string()));
        }
        if !request.payload.is_object() {
            return Err(RepositoryError::Constraint("payload must be a JSON object".to_string()));
        }

        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&request.client_request_id.0) {
            return Ok(InsertOutcome { record: existing.clone(), created: false });
        }

        let record = StoredRequest {
            id: RecordId(Uuid::new_v4().to_string()),
            kind: request.kind,
            client_request_id: request.client_request_id,
            actor_id: request.actor_id,
            payload: request.payload,
            created_at: Utc::now(),
        };
        records.insert(record.client_request_id.0.clone(), record.clone());
        Ok(InsertOutcome { record, created: true })
    }

    async fn find_by_id(
        &self,
        kind: RecordKind,
        id: &RecordId,
    ) -> Result<Option<StoredRequest>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| &record.id == id && record.kind.table() == kind.table())
            .cloned())
    }

    async fn list_by_kind(&self, kind: RecordKind) -> Result<Vec<StoredRequest>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching =
            records.values().filter(|record| record.kind == kind).cloned().collect::<Vec<_>>();
        matching.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(matching)
    }
}
