use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use resq_core::config::BackendConfig;
use resq_core::domain::RecordId;
use resq_core::wizard::{
    CancellationToken, CreateRequest, SubmissionAdapter, SubmissionFailure, SubmissionResult,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::SessionStore;

const PREFER_HEADER: &str = "return=representation,resolution=merge-duplicates";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("backend.base_url is not configured")]
    MissingBaseUrl,
    #[error("backend.api_key is not configured")]
    MissingApiKey,
    #[error("invalid base url `{0}`: expected http:// or https://")]
    InvalidBaseUrl(String),
    #[error("could not build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Writes wizard submissions to the hosted REST API.
#[derive(Clone)]
pub struct RestSubmissionAdapter {
    client: Client,
    base_url: String,
    api_key: SecretString,
    sessions: SessionStore,
}

#[derive(Debug, Deserialize)]
struct CreatedRow {
    id: Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl RestSubmissionAdapter {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        sessions: SessionStore,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidBaseUrl(base_url));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url, api_key, sessions })
    }

    pub fn from_config(backend: &BackendConfig, sessions: SessionStore) -> Result<Self, ClientError> {
        let base_url = backend.base_url.as_deref().ok_or(ClientError::MissingBaseUrl)?;
        let api_key = backend.api_key.clone().ok_or(ClientError::MissingApiKey)?;
        Self::new(base_url, api_key, sessions, backend.submit_timeout())
    }

    pub fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    async fn send(
        &self,
        request: &CreateRequest,
        user_id: &str,
        access_token: &SecretString,
    ) -> Result<SubmissionResult, SubmissionFailure> {
        let mut body = request.payload.clone();
        body.insert("client_request_id".to_string(), Value::String(request.submission_key.0.clone()));
        body.insert("user_id".to_string(), Value::String(user_id.to_string()));

        let response = self
            .client
            .post(self.endpoint(request.kind.table()))
            .query(&[("on_conflict", "client_request_id")])
            .header("apikey", self.api_key.expose_secret())
            .header("Authorization", format!("Bearer {}", access_token.expose_secret()))
            .header("Prefer", PREFER_HEADER)
            .header("X-Correlation-Id", &request.correlation_id)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|error| SubmissionFailure::network(transport_message(&error)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let rows = response
            .json::<Vec<CreatedRow>>()
            .await
            .map_err(|error| SubmissionFailure::network(format!("unreadable response: {error}")))?;
        let row = rows.into_iter().next().ok_or_else(|| {
            SubmissionFailure::rejected(Some("The service did not return the saved request.".into()))
        })?;

        let id = match row.id {
            Value::String(id) => id,
            other => other.to_string(),
        };
        Ok(SubmissionResult { id: RecordId(id), created_at: row.created_at })
    }
}

/// Maps a non-success HTTP status to a failure category. The body's
/// `message` is kept for rejections.
pub fn classify_status(status: StatusCode, body: &str) -> SubmissionFailure {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|body| body.message)
        .filter(|message| !message.trim().is_empty());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SubmissionFailure::unauthorized(
            message.unwrap_or_else(|| format!("backend answered {status}")),
        ),
        status if status.is_client_error() => SubmissionFailure::rejected(message),
        status => SubmissionFailure::network(
            message.unwrap_or_else(|| format!("backend answered {status}")),
        ),
    }
}

fn transport_message(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "could not connect to the backend".to_string()
    } else {
        error.to_string()
    }
}

#[async_trait]
impl SubmissionAdapter for RestSubmissionAdapter {
    async fn create_request(
        &self,
        request: CreateRequest,
        cancel: CancellationToken,
    ) -> Result<SubmissionResult, SubmissionFailure> {
        let Some(session) = self.sessions.current().await else {
            warn!(
                event_name = "client.submission.unauthorized",
                correlation_id = %request.correlation_id,
                "no active session; request not sent"
            );
            return Err(SubmissionFailure::unauthorized("no active session"));
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SubmissionFailure::network("submission cancelled")),
            result = self.send(&request, &session.user_id, &session.access_token) => result,
        };

        match &result {
            Ok(created) => info!(
                event_name = "client.submission.created",
                correlation_id = %request.correlation_id,
                record_id = %created.id,
                table = request.kind.table(),
                "submission accepted by backend"
            ),
            Err(failure) => warn!(
                event_name = "client.submission.failed",
                correlation_id = %request.correlation_id,
                category = %failure.category,
                error = %failure,
                "submission failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use resq_core::domain::{RecordKind, RequestKind, SubmissionKey};
    use resq_core::wizard::{
        cancellation_pair, CancellationToken, CreateRequest, FailureCategory, SubmissionAdapter,
    };
    use serde_json::{json, Map, Value};
    use tokio::net::TcpListener;

    use super::{classify_status, RestSubmissionAdapter};
    use crate::auth::{AuthSession, SessionStore};

    #[derive(Clone, Debug)]
    struct Captured {
        table: String,
        query: HashMap<String, String>,
        headers: HeaderMap,
        body: Value,
    }

    #[derive(Clone)]
    struct FakeBackend {
        status: StatusCode,
        reply: Value,
        delay: Duration,
        captured: Arc<Mutex<Vec<Captured>>>,
    }

    async fn handle_insert(
        State(backend): State<FakeBackend>,
        Path(table): Path<String>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if let Ok(mut captured) = backend.captured.lock() {
            captured.push(Captured { table, query, headers, body });
        }
        tokio::time::sleep(backend.delay).await;
        (backend.status, Json(backend.reply.clone()))
    }

    async fn spawn_backend(
        status: StatusCode,
        reply: Value,
        delay: Duration,
    ) -> (String, Arc<Mutex<Vec<Captured>>>) {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let captured = Arc::new(Mutex::new(Vec::new()));
        let backend = FakeBackend { status, reply, delay, captured: captured.clone() };
        let app = Router::new().route("/rest/v1/{table}", post(handle_insert)).with_state(backend);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), captured)
    }

    fn signed_in() -> SessionStore {
        SessionStore::new(Some(AuthSession::new("citizen-42", "jwt-token", None)))
    }

    fn adapter(base_url: &str, sessions: SessionStore) -> RestSubmissionAdapter {
        RestSubmissionAdapter::new(
            base_url,
            "anon-key".to_string().into(),
            sessions,
            Duration::from_secs(5),
        )
        .expect("adapter")
    }

    fn rescue_request() -> CreateRequest {
        let mut payload = Map::new();
        payload.insert("type".to_string(), json!("Rescue"));
        payload.insert("location".to_string(), json!("Main St bridge"));
        CreateRequest {
            kind: RecordKind::Action(RequestKind::Rescue),
            payload,
            submission_key: SubmissionKey("key-123".to_string()),
            correlation_id: "session-9".to_string(),
        }
    }

    #[tokio::test]
    async fn created_row_becomes_a_submission_result() {
        let created_at = Utc::now();
        let (base_url, captured) = spawn_backend(
            StatusCode::CREATED,
            json!([{ "id": 77, "created_at": created_at.to_rfc3339() }]),
            Duration::ZERO,
        )
        .await;

        let result = adapter(&base_url, signed_in())
            .create_request(rescue_request(), CancellationToken::never())
            .await
            .expect("submission");

        assert_eq!(result.id.0, "77");
        let captured = captured.lock().expect("captured").clone();
        assert_eq!(captured.len(), 1);
        let call = &captured[0];
        assert_eq!(call.table, "action_requests");
        assert_eq!(call.query.get("on_conflict").map(String::as_str), Some("client_request_id"));
        assert_eq!(call.headers.get("apikey").and_then(|v| v.to_str().ok()), Some("anon-key"));
        assert_eq!(
            call.headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer jwt-token")
        );
        assert_eq!(call.body["client_request_id"], "key-123");
        assert_eq!(call.body["user_id"], "citizen-42");
        assert_eq!(call.body["location"], "Main St bridge");
    }

    #[tokio::test]
    async fn missing_session_fails_without_any_request() {
        let (base_url, captured) =
            spawn_backend(StatusCode::CREATED, json!([]), Duration::ZERO).await;

        let failure = adapter(&base_url, SessionStore::default())
            .create_request(rescue_request(), CancellationToken::never())
            .await
            .expect_err("unauthorized");

        assert_eq!(failure.category, FailureCategory::Unauthorized);
        assert!(captured.lock().expect("captured").is_empty());
    }

    #[tokio::test]
    async fn server_rejection_surfaces_the_backend_message() {
        let (base_url, _) = spawn_backend(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "message": "location is outside the service area" }),
            Duration::ZERO,
        )
        .await;

        let failure = adapter(&base_url, signed_in())
            .create_request(rescue_request(), CancellationToken::never())
            .await
            .expect_err("rejected");

        assert_eq!(failure.category, FailureCategory::Rejected);
        assert_eq!(failure.user_message(), "location is outside the service area");
    }

    #[tokio::test]
    async fn cancellation_aborts_a_slow_request() {
        let (base_url, _) =
            spawn_backend(StatusCode::CREATED, json!([]), Duration::from_secs(10)).await;
        let (handle, token) = cancellation_pair();
        let adapter = adapter(&base_url, signed_in());

        let pending = tokio::spawn(async move { adapter.create_request(rescue_request(), token).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let failure = pending.await.expect("join").expect_err("cancelled");
        assert_eq!(failure.category, FailureCategory::Network);
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let failure = adapter(&format!("http://{addr}"), signed_in())
            .create_request(rescue_request(), CancellationToken::never())
            .await
            .expect_err("unreachable");
        assert_eq!(failure.category, FailureCategory::Network);
    }

    #[test]
    fn status_codes_map_to_failure_categories() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "").category,
            FailureCategory::Unauthorized
        );
        assert_eq!(classify_status(StatusCode::FORBIDDEN, "{}").category, FailureCategory::Unauthorized);
        assert_eq!(classify_status(StatusCode::CONFLICT, "").category, FailureCategory::Rejected);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST, "not json").message, None);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "").category,
            FailureCategory::Network
        );
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(RestSubmissionAdapter::new(
            "ftp://example.test",
            "k".to_string().into(),
            SessionStore::default(),
            Duration::from_secs(1),
        )
        .is_err());
    }
}
