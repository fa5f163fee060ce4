use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::error::ErrorKind;
use thiserror::Error;

use resq_core::audit::AuditEvent;
use resq_core::domain::{RecordId, RecordKind, SubmissionKey};

pub mod audit;
pub mod memory;
pub mod request;

pub use audit::SqlAuditRepository;
pub use memory::InMemoryRequestRepository;
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(database_error) = &error {
            if !matches!(database_error.kind(), ErrorKind::Other) {
                return Self::Constraint(database_error.message().to_string());
            }
        }
        Self::Database(error)
    }
}

/// A record the wizard wants persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRequest {
    pub kind: RecordKind,
    pub client_request_id: SubmissionKey,
    pub actor_id: String,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRequest {
    pub id: RecordId,
    pub kind: RecordKind,
    pub client_request_id: SubmissionKey,
    pub actor_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertOutcome {
    pub record: StoredRequest,
    /// False when a record with the same client request id already existed.
    pub created: bool,
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert_or_get(&self, request: NewRequest) -> Result<InsertOutcome, RepositoryError>;

    async fn find_by_id(
        &self,
        kind: RecordKind,
        id: &RecordId,
    ) -> Result<Option<StoredRequest>, RepositoryError>;

    async fn list_by_kind(&self, kind: RecordKind) -> Result<Vec<StoredRequest>, RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<AuditEvent>, RepositoryError>;
}

#[async_trait]
impl<R> RequestRepository for std::sync::Arc<R>
where
    R: RequestRepository + ?Sized,
{
    async fn insert_or_get(&self, request: NewRequest) -> Result<InsertOutcome, RepositoryError> {
        (**self).insert_or_get(request).await
    }

    async fn find_by_id(
        &self,
        kind: RecordKind,
        id: &RecordId,
    ) -> Result<Option<StoredRequest>, RepositoryError> {
        (**self).find_by_id(kind, id).await
    }

    async fn list_by_kind(&self, kind: RecordKind) -> Result<Vec<StoredRequest>, RepositoryError> {
        (**self).list_by_kind(kind).await
    }
}
