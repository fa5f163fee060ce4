//! Audit trail for wizard sessions. Events are emitted synchronously by the
//! controller; hosts decide where they end up.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ANONYMOUS_ACTOR: &str = "anonymous";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Wizard,
    Validation,
    Submission,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 4] = [Self::Wizard, Self::Validation, Self::Submission, Self::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wizard => "wizard",
            Self::Validation => "validation",
            Self::Submission => "submission",
            Self::System => "system",
        }
    }
}

impl AuditOutcome {
    pub const ALL: [AuditOutcome; 3] = [Self::Success, Self::Rejected, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// Stored label that matches no known variant.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown audit label `{0}`")]
pub struct UnknownAuditLabel(pub String);

impl FromStr for AuditCategory {
    type Err = UnknownAuditLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| UnknownAuditLabel(value.to_string()))
    }
}

impl FromStr for AuditOutcome {
    type Err = UnknownAuditLabel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|outcome| outcome.as_str() == value)
            .ok_or_else(|| UnknownAuditLabel(value.to_string()))
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub session_id: Option<String>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// A fresh event with no session and an anonymous actor.
    pub fn new(event_type: impl Into<String>, category: AuditCategory, outcome: AuditOutcome) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: None,
            correlation_id: String::new(),
            event_type: event_type.into(),
            category,
            actor: ANONYMOUS_ACTOR.to_string(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Ties the event to a wizard session, which doubles as the correlation id.
    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        self.correlation_id = session_id.clone();
        self.session_id = Some(session_id);
        self
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

/// Buffers events so a host can persist them in one batch.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    fn with_events<R>(&self, f: impl FnOnce(&mut Vec<AuditEvent>) -> R) -> R {
        let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut events)
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.with_events(|events| events.clone())
    }

    pub fn event_types(&self) -> Vec<String> {
        self.with_events(|events| events.iter().map(|event| event.event_type.clone()).collect())
    }

    /// Removes and returns everything buffered so far.
    pub fn drain(&self) -> Vec<AuditEvent> {
        self.with_events(std::mem::take)
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.with_events(|events| events.push(event));
    }
}
