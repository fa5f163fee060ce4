use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::domain::SubmissionKey;
use crate::forms::{PayloadError, UnknownField, WizardForm};
use crate::wizard::engine::{StepMachine, WizardTransitionError};
use crate::wizard::states::{
    TransitionOutcome, WizardAction, WizardEvent, WizardState, WizardStatus,
};
use crate::wizard::submission::{
    cancellation_pair, CancellationHandle, CancellationToken, CreateRequest, SubmissionAdapter,
    SubmissionFailure, SubmissionResult,
};
use crate::wizard::validation::{FieldCollector, SchemaError, Violations};

pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Cancelled,
    Completed,
    SignedOut,
}

pub type CloseCallback = Box<dyn FnMut(CloseReason) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Discarded,
    /// A submission is in flight; the session closes once it resolves.
    Deferred,
    AlreadyClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoredReason {
    Closed,
    NotEditing(WizardStatus),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome<F> {
    Moved { from: usize, to: usize },
    Blocked { step: usize, violations: Violations<F> },
    Submitted(SubmissionResult),
    Failed(SubmissionFailure),
    /// The session was cancelled while submitting; the result was dropped.
    Discarded,
    Ignored(IgnoredReason),
    Invalid(WizardError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WizardError {
    #[error("wizard session is closed")]
    Closed,
    #[error("wizard is not editable while {status:?}")]
    NotEditing { status: WizardStatus },
    #[error("step {step} has invalid fields: {}", .fields.join(", "))]
    StepInvalid { step: usize, fields: Vec<String> },
    #[error("there is no failure to acknowledge")]
    NothingToAcknowledge,
    #[error(transparent)]
    UnknownField(#[from] UnknownField),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Transition(#[from] WizardTransitionError),
}

/// Handed to hosts that run the backend call themselves.
#[derive(Debug)]
pub struct PendingSubmission {
    pub request: CreateRequest,
    pub token: CancellationToken,
}

#[derive(Clone, Debug)]
pub struct WizardSession<T: WizardForm> {
    id: String,
    state: WizardState,
    collector: FieldCollector<T>,
    submission_key: SubmissionKey,
    result: Option<SubmissionResult>,
    last_failure: Option<SubmissionFailure>,
}

impl<T: WizardForm> WizardSession<T> {
    fn new(collector: FieldCollector<T>, state: WizardState) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state,
            collector,
            submission_key: SubmissionKey::generate(),
            result: None,
            last_failure: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn status(&self) -> WizardStatus {
        self.state.status()
    }

    pub fn total_steps(&self) -> usize {
        self.collector.schema().total_steps()
    }

    /// After success the session stays parked on its final step.
    pub fn current_step(&self) -> usize {
        self.state.step().unwrap_or_else(|| self.collector.schema().last_step())
    }

    pub fn form(&self) -> &T {
        self.collector.form()
    }

    pub fn errors(&self) -> &Violations<T::Field> {
        self.collector.errors()
    }

    pub fn collector(&self) -> &FieldCollector<T> {
        &self.collector
    }

    pub fn submission_key(&self) -> &SubmissionKey {
        &self.submission_key
    }

    pub fn result(&self) -> Option<&SubmissionResult> {
        self.result.as_ref()
    }

    pub fn last_failure(&self) -> Option<&SubmissionFailure> {
        self.last_failure.as_ref()
    }
}

pub struct WizardController<T: WizardForm> {
    machine: StepMachine,
    session: Option<WizardSession<T>>,
    actor: String,
    submit_timeout: Duration,
    audit: Arc<dyn AuditSink>,
    on_close: CloseCallback,
    in_flight: Option<CancellationHandle>,
    dismiss_requested: bool,
}

impl<T: WizardForm> fmt::Debug for WizardController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WizardController")
            .field("form", &T::FORM_KIND)
            .field("session", &self.session)
            .field("actor", &self.actor)
            .field("submit_timeout", &self.submit_timeout)
            .field("dismiss_requested", &self.dismiss_requested)
            .finish_non_exhaustive()
    }
}

impl<T: WizardForm> WizardController<T> {
    pub fn new(on_close: impl FnMut(CloseReason) + Send + 'static) -> Result<Self, WizardError> {
        let schema = T::schema()?;
        let machine = StepMachine::new(schema.total_steps());
        let session = WizardSession::new(FieldCollector::new(schema), machine.initial_state());

        info!(
            event_name = "wizard.session_opened",
            correlation_id = %session.id,
            form = %T::FORM_KIND,
            total_steps = machine.total_steps(),
            "wizard session opened"
        );

        Ok(Self {
            machine,
            session: Some(session),
            actor: "anonymous".to_string(),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            audit: Arc::new(NoopAuditSink),
            on_close: Box::new(on_close),
            in_flight: None,
            dismiss_requested: false,
        })
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn session(&self) -> Option<&WizardSession<T>> {
        self.session.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn status(&self) -> Option<WizardStatus> {
        self.session.as_ref().map(WizardSession::status)
    }

    pub fn current_step(&self) -> Option<usize> {
        self.session.as_ref().map(WizardSession::current_step)
    }

    pub fn set_value(&mut self, field: T::Field, value: impl Into<String>) -> Result<(), WizardError> {
        let session = self.editable_session()?;
        session.collector.set_value(field, value);
        Ok(())
    }

    /// Same as [`Self::set_value`] but addressed by wire name.
    pub fn set_raw(&mut self, name: &str, value: impl Into<String>) -> Result<(), WizardError> {
        let field = name.parse::<T::Field>()?;
        self.set_value(field, value)
    }

    pub fn clear_value(&mut self, field: T::Field) -> Result<(), WizardError> {
        let session = self.editable_session()?;
        session.collector.clear_value(field);
        Ok(())
    }

    /// Moves forward one step, or submits from the final step. A retryable
    /// failure is resubmitted with unchanged field values.
    pub async fn advance<A>(&mut self, adapter: &A) -> AdvanceOutcome<T::Field>
    where
        A: SubmissionAdapter + ?Sized,
    {
        let Some(state) = self.session.as_ref().map(WizardSession::state) else {
            return AdvanceOutcome::Ignored(IgnoredReason::Closed);
        };

        match state {
            WizardState::Editing { step } if step < self.machine.last_step() => {
                self.complete_step(step)
            }
            WizardState::Editing { .. } | WizardState::Failed { .. } => {
                self.submit_with(adapter).await
            }
            other => AdvanceOutcome::Ignored(IgnoredReason::NotEditing(other.status())),
        }
    }

    pub fn retreat(&mut self) -> bool {
        match self.session.as_ref().map(WizardSession::state) {
            Some(WizardState::Editing { step }) if step > 0 => {
                self.transition(WizardEvent::StepBack).is_ok()
            }
            _ => false,
        }
    }

    /// Starts the final submission and hands the request to the caller.
    pub fn begin_submission(&mut self) -> Result<PendingSubmission, WizardError> {
        let state = self.session.as_ref().ok_or(WizardError::Closed)?.state;
        if let WizardState::Editing { .. } = state {
            if let Some((step, violations)) = self.check_all_steps() {
                self.report_blocked(step, &violations);
                return Err(WizardError::StepInvalid {
                    step,
                    fields: violations.keys().map(ToString::to_string).collect(),
                });
            }
        }

        let event = match state {
            WizardState::Editing { .. } => WizardEvent::SubmitStarted,
            WizardState::Failed { .. } => WizardEvent::RetryRequested,
            other => return Err(WizardError::NotEditing { status: other.status() }),
        };

        let request = {
            let session = self.session.as_ref().ok_or(WizardError::Closed)?;
            let form = session.collector.form();
            CreateRequest {
                kind: form.record_kind()?,
                payload: form.payload()?,
                submission_key: session.submission_key.clone(),
                correlation_id: session.id.clone(),
            }
        };

        self.transition(event)?;
        let (handle, token) = cancellation_pair();
        self.in_flight = Some(handle);
        self.dismiss_requested = false;

        info!(
            event_name = "wizard.submission_started",
            correlation_id = %request.correlation_id,
            kind = %request.kind.label(),
            submission_key = %request.submission_key,
            "wizard submission started"
        );
        self.emit(
            "wizard.submission_started",
            AuditCategory::Submission,
            AuditOutcome::Success,
            &[("kind", request.kind.label())],
        );

        Ok(PendingSubmission { request, token })
    }

    /// Applies the backend's answer to a submission started with
    /// [`Self::begin_submission`].
    pub fn finish_submission(
        &mut self,
        result: Result<SubmissionResult, SubmissionFailure>,
    ) -> AdvanceOutcome<T::Field> {
        self.in_flight = None;
        let Some(status) = self.status() else {
            return AdvanceOutcome::Ignored(IgnoredReason::Closed);
        };
        if status != WizardStatus::Submitting {
            return AdvanceOutcome::Ignored(IgnoredReason::NotEditing(status));
        }

        if self.dismiss_requested {
            info!(
                event_name = "wizard.submission_discarded",
                correlation_id = %self.correlation_id(),
                succeeded = result.is_ok(),
                "submission resolved after cancel; result discarded"
            );
            self.close(CloseReason::Cancelled);
            return AdvanceOutcome::Discarded;
        }

        match result {
            Ok(submission) => {
                if let Err(error) = self.transition(WizardEvent::SubmitSucceeded) {
                    return AdvanceOutcome::Invalid(error);
                }
                if let Some(session) = self.session.as_mut() {
                    session.result = Some(submission.clone());
                    session.last_failure = None;
                }
                info!(
                    event_name = "wizard.submission_succeeded",
                    correlation_id = %self.correlation_id(),
                    record_id = %submission.id,
                    "wizard submission succeeded"
                );
                self.emit(
                    "wizard.submission_succeeded",
                    AuditCategory::Submission,
                    AuditOutcome::Success,
                    &[("record_id", submission.id.to_string())],
                );
                AdvanceOutcome::Submitted(submission)
            }
            Err(failure) => {
                if let Err(error) = self.transition(WizardEvent::SubmitFailed(failure.category)) {
                    return AdvanceOutcome::Invalid(error);
                }
                if let Some(session) = self.session.as_mut() {
                    session.last_failure = Some(failure.clone());
                }
                warn!(
                    event_name = "wizard.submission_failed",
                    correlation_id = %self.correlation_id(),
                    category = %failure.category,
                    error = %failure,
                    "wizard submission failed"
                );
                self.emit(
                    "wizard.submission_failed",
                    AuditCategory::Submission,
                    AuditOutcome::Failed,
                    &[("category", failure.category.to_string())],
                );
                AdvanceOutcome::Failed(failure)
            }
        }
    }

    pub fn cancel(&mut self) -> CancelOutcome {
        let Some(status) = self.status() else {
            return CancelOutcome::AlreadyClosed;
        };

        if status == WizardStatus::Submitting {
            if let Some(handle) = &self.in_flight {
                handle.cancel();
            }
            self.dismiss_requested = true;
            info!(
                event_name = "wizard.cancel_deferred",
                correlation_id = %self.correlation_id(),
                "cancel requested during submission"
            );
            return CancelOutcome::Deferred;
        }

        self.close(CloseReason::Cancelled);
        CancelOutcome::Discarded
    }

    /// Closes the confirmation view after success; otherwise behaves like
    /// [`Self::cancel`].
    pub fn dismiss(&mut self) -> CancelOutcome {
        if self.status() == Some(WizardStatus::Succeeded) {
            self.close(CloseReason::Completed);
            return CancelOutcome::Discarded;
        }
        self.cancel()
    }

    pub fn acknowledge_failure(&mut self) -> Result<(), WizardError> {
        let state = self.session.as_ref().ok_or(WizardError::Closed)?.state;
        if !matches!(state, WizardState::Failed { .. }) {
            return Err(WizardError::NothingToAcknowledge);
        }

        let outcome = self.transition(WizardEvent::FailureAcknowledged)?;
        if outcome.actions.contains(&WizardAction::DestroySession) {
            self.close(CloseReason::SignedOut);
        }
        Ok(())
    }

    fn editable_session(&mut self) -> Result<&mut WizardSession<T>, WizardError> {
        let session = self.session.as_mut().ok_or(WizardError::Closed)?;
        match session.state {
            WizardState::Editing { .. } => Ok(session),
            other => Err(WizardError::NotEditing { status: other.status() }),
        }
    }

    fn complete_step(&mut self, step: usize) -> AdvanceOutcome<T::Field> {
        let violations = match self.session.as_mut() {
            Some(session) => session.collector.check_step(step),
            None => return AdvanceOutcome::Ignored(IgnoredReason::Closed),
        };
        if !violations.is_empty() {
            self.report_blocked(step, &violations);
            return AdvanceOutcome::Blocked { step, violations };
        }

        match self.transition(WizardEvent::StepCompleted) {
            Ok(outcome) => AdvanceOutcome::Moved {
                from: step,
                to: outcome.to.step().unwrap_or(step),
            },
            Err(error) => AdvanceOutcome::Invalid(error),
        }
    }

    async fn submit_with<A>(&mut self, adapter: &A) -> AdvanceOutcome<T::Field>
    where
        A: SubmissionAdapter + ?Sized,
    {
        let pending = match self.begin_submission() {
            Ok(pending) => pending,
            Err(WizardError::StepInvalid { step, .. }) => {
                let violations = self
                    .session
                    .as_ref()
                    .map(|session| session.collector.validate_step(step))
                    .unwrap_or_default();
                return AdvanceOutcome::Blocked { step, violations };
            }
            Err(WizardError::Transition(WizardTransitionError::RetryNotAllowed { .. })) => {
                return AdvanceOutcome::Ignored(IgnoredReason::NotEditing(WizardStatus::Failed));
            }
            Err(error) => return AdvanceOutcome::Invalid(error),
        };

        let PendingSubmission { request, token } = pending;
        let timeout = self.submit_timeout;
        let result =
            match tokio::time::timeout(timeout, adapter.create_request(request, token)).await {
                Ok(result) => result,
                Err(_) => {
                    if let Some(handle) = &self.in_flight {
                        handle.cancel();
                    }
                    Err(SubmissionFailure::network(format!(
                        "no response within {}ms",
                        timeout.as_millis()
                    )))
                }
            };

        self.finish_submission(result)
    }

    /// Records violations for every step and returns the first failing one.
    fn check_all_steps(&mut self) -> Option<(usize, Violations<T::Field>)> {
        let session = self.session.as_mut()?;
        let total = session.collector.schema().total_steps();
        let mut first = None;
        for step in 0..total {
            let violations = session.collector.check_step(step);
            if first.is_none() && !violations.is_empty() {
                first = Some((step, violations));
            }
        }
        first
    }

    fn transition(&mut self, event: WizardEvent) -> Result<TransitionOutcome, WizardError> {
        let session = self.session.as_mut().ok_or(WizardError::Closed)?;
        let outcome = self.machine.apply(&session.state, &event)?;
        session.state = outcome.to;

        info!(
            event_name = "wizard.transition_applied",
            correlation_id = %session.id,
            form = %T::FORM_KIND,
            from = ?outcome.from,
            to = ?outcome.to,
            event = ?outcome.event,
            "wizard transition applied"
        );
        self.emit(
            "wizard.transition_applied",
            AuditCategory::Wizard,
            AuditOutcome::Success,
            &[
                ("from", format!("{:?}", outcome.from)),
                ("to", format!("{:?}", outcome.to)),
                ("event", format!("{:?}", outcome.event)),
            ],
        );
        Ok(outcome)
    }

    fn report_blocked(&self, step: usize, violations: &Violations<T::Field>) {
        let fields = violations.keys().map(ToString::to_string).collect::<Vec<_>>().join(",");
        info!(
            event_name = "wizard.step_blocked",
            correlation_id = %self.correlation_id(),
            step,
            fields = %fields,
            "step has invalid fields"
        );
        self.emit(
            "wizard.step_blocked",
            AuditCategory::Validation,
            AuditOutcome::Rejected,
            &[("step", step.to_string()), ("fields", fields)],
        );
    }

    fn close(&mut self, reason: CloseReason) {
        self.in_flight = None;
        self.dismiss_requested = false;
        let Some(session) = self.session.take() else {
            return;
        };

        info!(
            event_name = "wizard.session_closed",
            correlation_id = %session.id,
            reason = ?reason,
            "wizard session closed"
        );
        self.audit.emit(
            AuditEvent::new("wizard.session_closed", AuditCategory::Wizard, AuditOutcome::Success)
                .in_session(session.id)
                .by(self.actor.clone())
                .with_metadata("reason", format!("{reason:?}")),
        );
        (self.on_close)(reason);
    }

    fn correlation_id(&self) -> String {
        self.session.as_ref().map(|session| session.id.clone()).unwrap_or_default()
    }

    fn emit(
        &self,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let mut event = AuditEvent::new(event_type, category, outcome).by(self.actor.clone());
        if let Some(session) = &self.session {
            event = event.in_session(session.id.clone());
        }
        let event = metadata
            .iter()
            .fold(event, |event, (key, value)| event.with_metadata(*key, value.clone()));
        self.audit.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{
        AdvanceOutcome, CancelOutcome, CloseReason, IgnoredReason, WizardController, WizardError,
    };
    use crate::audit::InMemoryAuditSink;
    use crate::domain::{RecordId, RecordKind, RequestKind};
    use crate::forms::action::{ActionField, ActionRequestForm};
    use crate::wizard::states::{WizardState, WizardStatus};
    use crate::wizard::submission::{
        CancellationToken, CreateRequest, FailureCategory, RecordingSubmissionAdapter,
        SubmissionAdapter, SubmissionFailure, SubmissionResult,
    };

    type Closed = Arc<Mutex<Vec<CloseReason>>>;

    fn controller() -> (WizardController<ActionRequestForm>, Closed) {
        let closed: Closed = Arc::default();
        let sink = closed.clone();
        let controller = WizardController::<ActionRequestForm>::new(move |reason| {
            if let Ok(mut reasons) = sink.lock() {
                reasons.push(reason);
            }
        })
        .expect("controller");
        (controller, closed)
    }

    fn success(id: &str) -> Result<SubmissionResult, SubmissionFailure> {
        Ok(SubmissionResult { id: RecordId(id.to_string()), created_at: Utc::now() })
    }

    fn fill_location(controller: &mut WizardController<ActionRequestForm>) {
        controller.set_value(ActionField::Location, "Harbour gate 3").expect("location");
    }

    fn fill_contact(controller: &mut WizardController<ActionRequestForm>) {
        controller.set_value(ActionField::ContactName, "Robin").expect("name");
        controller.set_value(ActionField::ContactPhone, "+15551234567").expect("phone");
    }

    async fn walk_to_final_step(
        controller: &mut WizardController<ActionRequestForm>,
        adapter: &RecordingSubmissionAdapter,
    ) {
        controller.set_value(ActionField::Type, "Rescue").expect("type");
        assert_eq!(controller.advance(adapter).await, AdvanceOutcome::Moved { from: 0, to: 1 });
        fill_location(controller);
        assert_eq!(controller.advance(adapter).await, AdvanceOutcome::Moved { from: 1, to: 2 });
        fill_contact(controller);
    }

    #[tokio::test]
    async fn missing_type_blocks_the_first_step() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::default();

        let outcome = controller.advance(&adapter).await;

        let AdvanceOutcome::Blocked { step, violations } = outcome else {
            panic!("expected blocked outcome, got {outcome:?}");
        };
        assert_eq!(step, 0);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations.get(&ActionField::Type).map(String::as_str), Some("required"));
        assert_eq!(controller.current_step(), Some(0));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn valid_type_moves_to_the_second_step() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::default();

        controller.set_value(ActionField::Type, "Rescue").expect("set type");
        assert_eq!(controller.advance(&adapter).await, AdvanceOutcome::Moved { from: 0, to: 1 });
        assert_eq!(controller.current_step(), Some(1));
    }

    #[tokio::test]
    async fn final_step_submits_and_records_the_result() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::with_script([success("abc123")]);
        walk_to_final_step(&mut controller, &adapter).await;

        let outcome = controller.advance(&adapter).await;

        let AdvanceOutcome::Submitted(result) = outcome else {
            panic!("expected submitted outcome, got {outcome:?}");
        };
        assert_eq!(result.id, RecordId("abc123".to_string()));
        let session = controller.session().expect("session stays open for confirmation");
        assert_eq!(session.status(), WizardStatus::Succeeded);
        assert_eq!(session.result().map(|result| result.id.0.as_str()), Some("abc123"));

        let calls = adapter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, RecordKind::Action(RequestKind::Rescue));
        assert_eq!(calls[0].payload["contact_name"], "Robin");
    }

    #[tokio::test]
    async fn network_failure_can_be_retried_with_the_same_values() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::with_script([
            Err(SubmissionFailure::network("connection reset")),
            success("abc123"),
        ]);
        walk_to_final_step(&mut controller, &adapter).await;

        let first = controller.advance(&adapter).await;
        assert!(matches!(
            first,
            AdvanceOutcome::Failed(SubmissionFailure { category: FailureCategory::Network, .. })
        ));
        assert_eq!(
            controller.session().map(|session| session.state()),
            Some(WizardState::Failed { step: 2, category: FailureCategory::Network })
        );

        let second = controller.advance(&adapter).await;
        assert!(matches!(second, AdvanceOutcome::Submitted(_)));

        let calls = adapter.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].payload, calls[1].payload);
        assert_eq!(calls[0].submission_key, calls[1].submission_key);
    }

    #[tokio::test]
    async fn cancel_mid_edit_discards_without_any_backend_call() {
        let (mut controller, closed) = controller();
        let adapter = RecordingSubmissionAdapter::default();
        controller.set_value(ActionField::Type, "HazardReport").expect("type");
        controller.advance(&adapter).await;

        assert_eq!(controller.cancel(), CancelOutcome::Discarded);
        assert!(!controller.is_open());
        assert!(adapter.calls().is_empty());
        assert_eq!(*closed.lock().expect("closed"), vec![CloseReason::Cancelled]);
        assert_eq!(controller.cancel(), CancelOutcome::AlreadyClosed);
        assert_eq!(
            controller.advance(&adapter).await,
            AdvanceOutcome::Ignored(IgnoredReason::Closed)
        );
    }

    #[tokio::test]
    async fn retreat_at_first_step_is_a_no_op() {
        let (mut controller, _) = controller();
        let before = controller.session().map(|session| session.state());

        assert!(!controller.retreat());
        assert_eq!(controller.session().map(|session| session.state()), before);
    }

    #[tokio::test]
    async fn retreat_keeps_values_entered_on_later_steps() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::default();
        controller.set_value(ActionField::Type, "ShelterOffer").expect("type");
        controller.advance(&adapter).await;
        fill_location(&mut controller);

        assert!(controller.retreat());
        assert_eq!(controller.current_step(), Some(0));
        let form = controller.session().map(|session| session.form().clone()).expect("form");
        assert_eq!(form.location.as_deref(), Some("Harbour gate 3"));
    }

    #[tokio::test]
    async fn succeeded_sessions_reject_further_edits() {
        let (mut controller, closed) = controller();
        let adapter = RecordingSubmissionAdapter::default();
        walk_to_final_step(&mut controller, &adapter).await;
        assert!(matches!(controller.advance(&adapter).await, AdvanceOutcome::Submitted(_)));

        assert_eq!(
            controller.set_value(ActionField::Details, "late edit"),
            Err(WizardError::NotEditing { status: WizardStatus::Succeeded })
        );
        assert_eq!(
            controller.advance(&adapter).await,
            AdvanceOutcome::Ignored(IgnoredReason::NotEditing(WizardStatus::Succeeded))
        );
        assert!(!controller.retreat());
        assert_eq!(adapter.calls().len(), 1);

        assert_eq!(controller.dismiss(), CancelOutcome::Discarded);
        assert_eq!(*closed.lock().expect("closed"), vec![CloseReason::Completed]);
    }

    #[tokio::test]
    async fn final_submission_revalidates_earlier_steps() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::default();
        walk_to_final_step(&mut controller, &adapter).await;
        controller.clear_value(ActionField::Location).expect("clear");

        let outcome = controller.advance(&adapter).await;
        let AdvanceOutcome::Blocked { step, violations } = outcome else {
            panic!("expected blocked outcome, got {outcome:?}");
        };
        assert_eq!(step, 1);
        assert!(violations.contains_key(&ActionField::Location));
        assert_eq!(controller.current_step(), Some(2));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_submission_is_deferred_until_the_call_resolves() {
        let (mut controller, closed) = controller();
        let adapter = RecordingSubmissionAdapter::default();
        walk_to_final_step(&mut controller, &adapter).await;

        let pending = controller.begin_submission().expect("begin");
        assert_eq!(controller.status(), Some(WizardStatus::Submitting));
        assert_eq!(
            controller.set_value(ActionField::Details, "x"),
            Err(WizardError::NotEditing { status: WizardStatus::Submitting })
        );

        assert_eq!(controller.cancel(), CancelOutcome::Deferred);
        assert!(controller.is_open());
        assert!(pending.token.is_cancelled(), "in-flight call should observe cancellation");

        let outcome = controller.finish_submission(success("late"));
        assert_eq!(outcome, AdvanceOutcome::Discarded);
        assert!(!controller.is_open());
        assert_eq!(*closed.lock().expect("closed"), vec![CloseReason::Cancelled]);
    }

    #[tokio::test]
    async fn second_begin_while_submitting_is_refused() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::default();
        walk_to_final_step(&mut controller, &adapter).await;

        let _pending = controller.begin_submission().expect("begin");
        assert_eq!(
            controller.begin_submission().map(|_| ()),
            Err(WizardError::NotEditing { status: WizardStatus::Submitting })
        );
    }

    #[tokio::test]
    async fn unauthorized_failure_closes_the_session_on_acknowledgement() {
        let (mut controller, closed) = controller();
        let adapter = RecordingSubmissionAdapter::with_script([Err(
            SubmissionFailure::unauthorized("no session"),
        )]);
        walk_to_final_step(&mut controller, &adapter).await;

        let outcome = controller.advance(&adapter).await;
        let AdvanceOutcome::Failed(failure) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failure.user_message(), "Please sign in to continue.");

        assert_eq!(
            controller.advance(&adapter).await,
            AdvanceOutcome::Ignored(IgnoredReason::NotEditing(WizardStatus::Failed))
        );
        assert_eq!(adapter.calls().len(), 1, "unauthorized must not be retried");

        controller.acknowledge_failure().expect("acknowledge");
        assert!(!controller.is_open());
        assert_eq!(*closed.lock().expect("closed"), vec![CloseReason::SignedOut]);
    }

    #[tokio::test]
    async fn acknowledged_rejection_returns_to_the_final_step_for_edits() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::with_script([Err(SubmissionFailure::rejected(
            Some("duplicate request".to_string()),
        ))]);
        walk_to_final_step(&mut controller, &adapter).await;
        controller.advance(&adapter).await;

        controller.acknowledge_failure().expect("acknowledge");
        assert_eq!(
            controller.session().map(|session| session.state()),
            Some(WizardState::Editing { step: 2 })
        );
        controller.set_value(ActionField::Details, "second floor").expect("editable again");
        assert_eq!(controller.acknowledge_failure(), Err(WizardError::NothingToAcknowledge));
    }

    struct StalledAdapter;

    #[async_trait]
    impl SubmissionAdapter for StalledAdapter {
        async fn create_request(
            &self,
            _request: CreateRequest,
            _cancel: CancellationToken,
        ) -> Result<SubmissionResult, SubmissionFailure> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(SubmissionFailure::network("unreachable"))
        }
    }

    #[tokio::test]
    async fn slow_backend_times_out_as_network_failure() {
        let (controller, _) = controller();
        let mut controller = controller.with_submit_timeout(Duration::from_millis(20));
        let adapter = RecordingSubmissionAdapter::default();
        walk_to_final_step(&mut controller, &adapter).await;

        let outcome = controller.advance(&StalledAdapter).await;
        assert!(matches!(
            outcome,
            AdvanceOutcome::Failed(SubmissionFailure { category: FailureCategory::Network, .. })
        ));
    }

    #[tokio::test]
    async fn step_index_stays_in_bounds_while_editing() {
        let (mut controller, _) = controller();
        let adapter = RecordingSubmissionAdapter::with_script([Err(SubmissionFailure::network(
            "flaky",
        ))]);
        let total = controller.session().map(|session| session.total_steps()).expect("open");

        controller.set_value(ActionField::Type, "TransportOffer").expect("type");
        fill_location(&mut controller);
        fill_contact(&mut controller);
        for round in 0..12 {
            if round % 3 == 2 {
                controller.retreat();
            } else {
                controller.advance(&adapter).await;
            }
            if let Some(session) = controller.session() {
                if session.status() == WizardStatus::Editing {
                    assert!(session.current_step() < total);
                }
                if session.status() == WizardStatus::Failed {
                    controller.acknowledge_failure().expect("acknowledge");
                }
            }
        }
    }

    #[tokio::test]
    async fn unknown_field_names_are_rejected() {
        let (mut controller, _) = controller();
        assert!(matches!(
            controller.set_raw("kind", "Rescue"),
            Err(WizardError::UnknownField(_))
        ));
        controller.set_raw("type", "Rescue").expect("known field");
    }

    #[tokio::test]
    async fn audit_trail_covers_transitions_and_close() {
        let sink = InMemoryAuditSink::default();
        let (controller, _) = controller();
        let mut controller = controller.with_actor("citizen-9").with_audit_sink(Arc::new(sink.clone()));
        let adapter = RecordingSubmissionAdapter::default();

        controller.advance(&adapter).await;
        controller.set_value(ActionField::Type, "Rescue").expect("type");
        controller.advance(&adapter).await;
        controller.cancel();

        let types = sink.event_types();
        assert_eq!(
            types,
            vec![
                "wizard.step_blocked".to_string(),
                "wizard.transition_applied".to_string(),
                "wizard.session_closed".to_string(),
            ]
        );
        assert!(sink.events().iter().all(|event| event.actor == "citizen-9"));
    }
}
