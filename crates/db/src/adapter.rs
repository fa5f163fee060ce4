use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use resq_core::wizard::{
    CancellationToken, CreateRequest, SubmissionAdapter, SubmissionFailure, SubmissionResult,
};

use crate::repositories::{NewRequest, RepositoryError, RequestRepository};

/// Persists wizard submissions through a [`RequestRepository`].
pub struct LocalSubmissionAdapter<R> {
    repository: R,
    actor_id: Option<String>,
}

impl<R: RequestRepository> LocalSubmissionAdapter<R> {
    pub fn new(repository: R, actor_id: Option<String>) -> Self {
        let actor_id = actor_id.filter(|actor| !actor.trim().is_empty());
        Self { repository, actor_id }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }
}

fn failure_from(error: RepositoryError) -> SubmissionFailure {
    match error {
        RepositoryError::Database(error) => SubmissionFailure::network(error.to_string()),
        RepositoryError::Constraint(message) | RepositoryError::Decode(message) => {
            SubmissionFailure::rejected(Some(message))
        }
    }
}

#[async_trait]
impl<R: RequestRepository> SubmissionAdapter for LocalSubmissionAdapter<R> {
    async fn create_request(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<SubmissionResult, SubmissionFailure> {
        let Some(actor_id) = self.actor_id.clone() else {
            warn!(
                event_name = "db.submission.unauthorized",
                correlation_id = %request.correlation_id,
                "no signed-in user for local submission"
            );
            return Err(SubmissionFailure::unauthorized("no signed-in user"));
        };
        if cancel.is_cancelled() {
            return Err(SubmissionFailure::network("submission cancelled"));
        }

        let correlation_id = request.correlation_id.clone();
        let new_request = NewRequest {
            kind: request.kind,
            client_request_id: request.submission_key,
            actor_id,
            payload: Value::Object(request.payload),
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SubmissionFailure::network("submission cancelled"));
            }
            outcome = self.repository.insert_or_get(new_request) => outcome,
        };

        match outcome {
            Ok(outcome) => {
                info!(
                    event_name = "db.submission.stored",
                    correlation_id = %correlation_id,
                    record_id = %outcome.record.id,
                    kind = %outcome.record.kind.label(),
                    created = outcome.created,
                    "submission stored locally"
                );
                Ok(SubmissionResult { id: outcome.record.id, created_at: outcome.record.created_at })
            }
            Err(error) => {
                warn!(
                    event_name = "db.submission.failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "local submission failed"
                );
                Err(failure_from(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Map, Value};

    use resq_core::domain::{RecordKind, RequestKind, SubmissionKey};
    use resq_core::forms::ActionRequestForm;
    use resq_core::wizard::{
        cancellation_pair, AdvanceOutcome, CancellationToken, CreateRequest, FailureCategory,
        SubmissionAdapter, WizardController,
    };

    use super::LocalSubmissionAdapter;
    use crate::migrations;
    use crate::repositories::{InMemoryRequestRepository, RequestRepository, SqlRequestRepository};
    use crate::connect_with_settings;

    fn request(key: &str, payload: Value) -> CreateRequest {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        CreateRequest {
            kind: RecordKind::Action(RequestKind::HazardReport),
            payload,
            submission_key: SubmissionKey(key.to_string()),
            correlation_id: "session-1".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_actor_is_unauthorized_and_writes_nothing() {
        let repo = Arc::new(InMemoryRequestRepository::default());
        let adapter = LocalSubmissionAdapter::new(repo.clone(), Some("  ".to_string()));

        let failure = adapter
            .create_request(request("k1", json!({"type": "HazardReport"})), CancellationToken::never())
            .await
            .expect_err("no actor");

        assert_eq!(failure.category, FailureCategory::Unauthorized);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_writing() {
        let repo = Arc::new(InMemoryRequestRepository::default());
        let adapter = LocalSubmissionAdapter::new(repo.clone(), Some("user-1".to_string()));
        let (handle, token) = cancellation_pair();
        handle.cancel();

        let failure = adapter
            .create_request(request("k1", json!({"type": "HazardReport"})), token)
            .await
            .expect_err("cancelled");

        assert_eq!(failure.category, FailureCategory::Network);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn retries_with_the_same_key_return_the_same_record() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let adapter =
            LocalSubmissionAdapter::new(SqlRequestRepository::new(pool.clone()), Some("u".into()));

        let first = adapter
            .create_request(request("same", json!({"type": "HazardReport"})), CancellationToken::never())
            .await
            .expect("first");
        let second = adapter
            .create_request(request("same", json!({"type": "HazardReport"})), CancellationToken::never())
            .await
            .expect("retry");

        assert_eq!(first.id, second.id);
        let stored = adapter
            .repository()
            .list_by_kind(RecordKind::Action(RequestKind::HazardReport))
            .await
            .expect("list");
        assert_eq!(stored.len(), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn wizard_submits_into_sqlite_end_to_end() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let adapter = LocalSubmissionAdapter::new(
            SqlRequestRepository::new(pool.clone()),
            Some("citizen-3".to_string()),
        );

        let mut controller = WizardController::<ActionRequestForm>::new(|_| {}).expect("wizard");
        for (field, value) in [
            ("type", "TransportOffer"),
            ("location", "North depot"),
            ("people_count", "6"),
            ("contact_name", "Lee"),
            ("contact_phone", "5550001111"),
        ] {
            controller.set_raw(field, value).expect("set value");
        }
        assert!(matches!(controller.advance(&adapter).await, AdvanceOutcome::Moved { .. }));
        assert!(matches!(controller.advance(&adapter).await, AdvanceOutcome::Moved { .. }));
        let outcome = controller.advance(&adapter).await;
        let AdvanceOutcome::Submitted(result) = outcome else {
            panic!("expected submission, got {outcome:?}");
        };

        let stored = adapter
            .repository()
            .find_by_id(RecordKind::Action(RequestKind::TransportOffer), &result.id)
            .await
            .expect("find")
            .expect("stored record");
        assert_eq!(stored.actor_id, "citizen-3");
        assert_eq!(stored.payload["people_count"], 6);

        pool.close().await;
    }
}
