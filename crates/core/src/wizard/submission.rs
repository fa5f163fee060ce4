use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::{RecordId, RecordKind, SubmissionKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Network,
    Rejected,
    Unauthorized,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Rejected => "rejected",
            Self::Unauthorized => "unauthorized",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unauthorized)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{category} failure: {}", .message.as_deref().unwrap_or("no details"))]
pub struct SubmissionFailure {
    pub category: FailureCategory,
    pub message: Option<String>,
}

impl SubmissionFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self { category: FailureCategory::Network, message: Some(message.into()) }
    }

    pub fn rejected(message: Option<String>) -> Self {
        Self { category: FailureCategory::Rejected, message }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self { category: FailureCategory::Unauthorized, message: Some(message.into()) }
    }

    pub fn user_message(&self) -> String {
        match self.category {
            FailureCategory::Network => {
                "We could not reach the service. Check your connection and try again.".to_string()
            }
            FailureCategory::Rejected => match self.message.as_deref().map(str::trim) {
                Some(message) if !message.is_empty() => message.to_string(),
                _ => "Your request could not be accepted. Please review it and try again."
                    .to_string(),
            },
            FailureCategory::Unauthorized => "Please sign in to continue.".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub kind: RecordKind,
    pub payload: Map<String, Value>,
    pub submission_key: SubmissionKey,
    pub correlation_id: String,
}

/// Signals cancellation of an in-flight submission.
#[derive(Debug)]
pub struct CancellationHandle {
    sender: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

#[derive(Clone, Debug)]
pub struct CancellationToken {
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        let (_, token) = cancellation_pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation_pair() -> (CancellationHandle, CancellationToken) {
    let (sender, receiver) = watch::channel(false);
    (CancellationHandle { sender }, CancellationToken { receiver })
}

/// Boundary to the external persistence collaborator.
#[async_trait]
pub trait SubmissionAdapter: Send + Sync {
    async fn create_request(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<SubmissionResult, SubmissionFailure>;
}

#[async_trait]
impl<A> SubmissionAdapter for Arc<A>
where
    A: SubmissionAdapter + ?Sized,
{
    async fn create_request(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<SubmissionResult, SubmissionFailure> {
        (**self).create_request(request, cancel).await
    }
}

/// Records every request and answers from a script, succeeding once the
/// script runs dry. Used for dry runs and tests.
#[derive(Clone, Default)]
pub struct RecordingSubmissionAdapter {
    script: Arc<Mutex<VecDeque<Result<SubmissionResult, SubmissionFailure>>>>,
    calls: Arc<Mutex<Vec<CreateRequest>>>,
}

impl RecordingSubmissionAdapter {
    pub fn with_script(
        outcomes: impl IntoIterator<Item = Result<SubmissionResult, SubmissionFailure>>,
    ) -> Self {
        Self {
            script: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<CreateRequest> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn next_outcome(&self) -> Option<Result<SubmissionResult, SubmissionFailure>> {
        match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

#[async_trait]
impl SubmissionAdapter for RecordingSubmissionAdapter {
    async fn create_request(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<SubmissionResult, SubmissionFailure> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        if cancel.is_cancelled() {
            return Err(SubmissionFailure::network("submission cancelled"));
        }
        self.next_outcome().unwrap_or_else(|| {
            Ok(SubmissionResult {
                id: RecordId(format!("dry-{}", Uuid::new_v4())),
                created_at: Utc::now(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{cancellation_pair, CancellationToken, FailureCategory, SubmissionFailure};

    #[test]
    fn rejected_message_is_surfaced_verbatim() {
        let failure = SubmissionFailure::rejected(Some("duplicate report".to_string()));
        assert_eq!(failure.user_message(), "duplicate report");

        let generic = SubmissionFailure::rejected(Some("  ".to_string()));
        assert_eq!(
            generic.user_message(),
            "Your request could not be accepted. Please review it and try again."
        );
    }

    #[test]
    fn user_messages_are_keyed_by_category() {
        assert_eq!(
            SubmissionFailure::unauthorized("token expired").user_message(),
            "Please sign in to continue."
        );
        assert!(SubmissionFailure::network("dns").user_message().contains("try again"));
        assert!(!FailureCategory::Unauthorized.is_retryable());
        assert!(FailureCategory::Rejected.is_retryable());
    }

    #[test]
    fn failure_display_includes_category_and_detail() {
        let failure = SubmissionFailure::network("connection reset");
        assert_eq!(failure.to_string(), "network failure: connection reset");
        assert_eq!(
            SubmissionFailure::rejected(None).to_string(),
            "rejected failure: no details"
        );
    }

    #[tokio::test]
    async fn token_resolves_after_cancel() {
        let (handle, token) = cancellation_pair();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation should resolve")
            .expect("waiter task");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn never_token_stays_pending() {
        let token = CancellationToken::never();
        let outcome = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(outcome.is_err(), "a never token must not resolve");
    }
}
