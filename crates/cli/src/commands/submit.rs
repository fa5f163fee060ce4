use std::sync::Arc;

use resq_client::{AuthSession, RestSubmissionAdapter, SessionStore};
use resq_core::audit::{AuditSink, InMemoryAuditSink};
use resq_core::config::{AppConfig, BackendMode};
use resq_core::errors::ApplicationError;
use resq_core::forms::{
    ActionRequestForm, ComplaintForm, FormKind, VolunteerSignupForm, WizardForm,
};
use resq_core::wizard::{
    AdvanceOutcome, RecordingSubmissionAdapter, SubmissionAdapter, WizardController, WizardError,
};
use resq_db::{
    connect_config, migrations, DbPool, LocalSubmissionAdapter, SqlAuditRepository,
    SqlRequestRepository,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::commands::{current_thread_runtime, load_config, CommandFailure, CommandResult};

const COMMAND: &str = "submit";

#[derive(Clone, Debug)]
pub struct SubmitArgs {
    pub form: FormKind,
    pub values: Vec<(String, String)>,
    pub actor: Option<String>,
    pub dry_run: bool,
    pub retries: u32,
}

/// Parses `field=value`; the value may itself contain `=`.
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (field, value) =
        raw.split_once('=').ok_or_else(|| format!("expected `field=value`, got `{raw}`"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in `{raw}`"));
    }
    Ok((field.to_string(), value.to_string()))
}

pub fn run(args: SubmitArgs) -> CommandResult {
    let prepared = load_config().and_then(|config| Ok((config, current_thread_runtime()?)));
    match prepared {
        Ok((config, runtime)) => runtime.block_on(submit(&config, &args)),
        Err(failure) => CommandResult::from_failure(COMMAND, failure),
    }
}

enum Backend {
    DryRun(RecordingSubmissionAdapter),
    Local { adapter: LocalSubmissionAdapter<SqlRequestRepository>, pool: DbPool },
    Remote(RestSubmissionAdapter),
}

impl Backend {
    async fn build(
        config: &AppConfig,
        actor: Option<String>,
        dry_run: bool,
    ) -> Result<Self, ApplicationError> {
        if dry_run {
            return Ok(Self::DryRun(RecordingSubmissionAdapter::default()));
        }

        match config.backend.mode {
            BackendMode::Local => {
                let pool = connect_config(&config.database).await.map_err(|error| {
                    ApplicationError::Storage(format!(
                        "failed to connect to `{}`: {error}",
                        config.database.url
                    ))
                })?;
                migrations::run_pending(&pool).await.map_err(|error| {
                    ApplicationError::Storage(format!("failed to apply migrations: {error}"))
                })?;
                let adapter =
                    LocalSubmissionAdapter::new(SqlRequestRepository::new(pool.clone()), actor);
                Ok(Self::Local { adapter, pool })
            }
            BackendMode::Remote => {
                let mut backend = config.backend.clone();
                if actor.is_some() {
                    backend.user_id = actor;
                }
                let sessions = SessionStore::new(AuthSession::from_config(&backend));
                let adapter =
                    RestSubmissionAdapter::from_config(&backend, sessions).map_err(|error| {
                        ApplicationError::Misconfigured(format!("remote backend: {error}"))
                    })?;
                Ok(Self::Remote(adapter))
            }
        }
    }

    fn adapter(&self) -> &dyn SubmissionAdapter {
        match self {
            Self::DryRun(adapter) => adapter,
            Self::Local { adapter, .. } => adapter,
            Self::Remote(adapter) => adapter,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::DryRun(_) => "dry_run",
            Self::Local { .. } => "local",
            Self::Remote(_) => "remote",
        }
    }

    async fn persist_audit(&self, sink: &InMemoryAuditSink) {
        let Self::Local { pool, .. } = self else {
            return;
        };
        let events = sink.events();
        if let Err(error) = SqlAuditRepository::new(pool.clone()).append_all(&events).await {
            warn!(
                event_name = "cli.submit.audit_persist_failed",
                error = %error,
                "failed to persist wizard audit trail"
            );
        }
    }
}

async fn submit(config: &AppConfig, args: &SubmitArgs) -> CommandResult {
    let actor = args
        .actor
        .clone()
        .or_else(|| config.backend.user_id.clone())
        .filter(|actor| !actor.trim().is_empty());

    let backend = match Backend::build(config, actor.clone(), args.dry_run).await {
        Ok(backend) => backend,
        Err(error) => return refused(error, COMMAND, "backend_setup", 4, json!({})),
    };

    let sink = Arc::new(InMemoryAuditSink::default());
    let result = match args.form {
        FormKind::ActionRequest => {
            drive::<ActionRequestForm>(config, args, actor, &backend, sink.clone()).await
        }
        FormKind::VolunteerSignup => {
            drive::<VolunteerSignupForm>(config, args, actor, &backend, sink.clone()).await
        }
        FormKind::Complaint => {
            drive::<ComplaintForm>(config, args, actor, &backend, sink.clone()).await
        }
    };

    backend.persist_audit(&sink).await;
    if let Backend::Local { pool, .. } = &backend {
        pool.close().await;
    }
    result
}

async fn drive<T: WizardForm>(
    config: &AppConfig,
    args: &SubmitArgs,
    actor: Option<String>,
    backend: &Backend,
    sink: Arc<InMemoryAuditSink>,
) -> CommandResult {
    let controller = WizardController::<T>::new(|reason| {
        info!(event_name = "cli.submit.session_closed", reason = ?reason, "wizard closed");
    });
    let mut controller = match controller {
        Ok(controller) => controller,
        Err(error) => {
            return refused(ApplicationError::Wizard(error), COMMAND, "schema", 1, json!({}));
        }
    };
    controller = controller
        .with_submit_timeout(config.backend.submit_timeout())
        .with_audit_sink(sink as Arc<dyn AuditSink>);
    if let Some(actor) = actor {
        controller = controller.with_actor(actor);
    }

    let Some((session_id, submission_key)) = controller
        .session()
        .map(|session| (session.id().to_string(), session.submission_key().to_string()))
    else {
        return CommandResult::failure(COMMAND, "internal", "wizard did not open", 1);
    };

    for (field, value) in &args.values {
        if let Err(error) = controller.set_raw(field, value.clone()) {
            let error_class = match error {
                WizardError::UnknownField(_) => "unknown_field",
                _ => "validation",
            };
            let details = json!({ "form": T::FORM_KIND, "field": field });
            return refused(ApplicationError::Wizard(error), &session_id, error_class, 6, details);
        }
    }

    let mut retries_left = args.retries;
    let mut attempts = 0u32;
    let outcome = loop {
        let outcome = controller.advance(backend.adapter()).await;
        if matches!(outcome, AdvanceOutcome::Submitted(_) | AdvanceOutcome::Failed(_)) {
            attempts += 1;
        }
        match outcome {
            AdvanceOutcome::Moved { .. } => continue,
            AdvanceOutcome::Failed(failure)
                if failure.category.is_retryable() && retries_left > 0 =>
            {
                retries_left -= 1;
                warn!(
                    event_name = "cli.submit.retrying",
                    correlation_id = %session_id,
                    category = %failure.category,
                    retries_left,
                    "submission failed, retrying with the same submission key"
                );
            }
            other => break other,
        }
    };

    match outcome {
        AdvanceOutcome::Submitted(result) => {
            let record = controller
                .session()
                .and_then(|session| session.form().record_kind().ok())
                .map(|kind| kind.label());
            controller.dismiss();
            CommandResult::success_with_details(
                COMMAND,
                format!("{} submitted", T::FORM_KIND),
                Some(json!({
                    "form": T::FORM_KIND,
                    "record": record,
                    "id": result.id.to_string(),
                    "created_at": result.created_at.to_rfc3339(),
                    "submission_key": submission_key,
                    "session_id": session_id,
                    "backend": backend.label(),
                    "attempts": attempts,
                })),
            )
        }
        AdvanceOutcome::Blocked { step, violations } => {
            let errors = violations
                .iter()
                .map(|(field, message)| (field.to_string(), Value::String(message.clone())))
                .collect::<serde_json::Map<_, _>>();
            controller.cancel();
            let error = WizardError::StepInvalid { step, fields: errors.keys().cloned().collect() };
            refused(
                ApplicationError::Wizard(error),
                &session_id,
                "validation",
                6,
                json!({ "step": step, "errors": errors }),
            )
        }
        AdvanceOutcome::Failed(failure) => {
            let category = failure.category;
            let detail = failure.user_message();
            let interface = ApplicationError::Submission(failure).into_interface(&session_id);
            if controller.acknowledge_failure().is_ok() && controller.is_open() {
                controller.cancel();
            }
            CommandResult::failure_with_details(
                COMMAND,
                category.as_str(),
                interface.user_message(),
                7,
                Some(json!({
                    "detail": detail,
                    "correlation_id": interface.correlation_id(),
                    "submission_key": submission_key,
                    "attempts": attempts,
                })),
            )
        }
        other => {
            controller.cancel();
            CommandResult::failure(
                COMMAND,
                "internal",
                format!("wizard ended unexpectedly: {other:?}"),
                1,
            )
        }
    }
}

/// Reports an application error with the user-facing message. The detail and
/// correlation id are merged into `details`.
fn refused(
    error: ApplicationError,
    correlation_id: &str,
    class: &str,
    exit_code: u8,
    mut details: Value,
) -> CommandResult {
    let interface = error.into_interface(correlation_id);
    if let Value::Object(map) = &mut details {
        map.insert("kind".to_string(), json!(interface.kind.as_str()));
        map.insert("detail".to_string(), json!(interface.detail));
        map.insert("correlation_id".to_string(), json!(interface.correlation_id()));
    }
    CommandResult::from_failure(
        COMMAND,
        CommandFailure::new(class, interface.user_message(), exit_code).with_details(details),
    )
}

#[cfg(test)]
mod tests {
    use resq_core::errors::ApplicationError;
    use resq_core::wizard::WizardError;
    use serde_json::{json, Value};

    use super::{parse_assignment, refused};

    #[test]
    fn assignments_split_on_the_first_equals_sign() {
        assert_eq!(
            parse_assignment("details=bring water=yes"),
            Ok(("details".to_string(), "bring water=yes".to_string()))
        );
        assert_eq!(parse_assignment("urgency="), Ok(("urgency".to_string(), String::new())));
        assert!(parse_assignment("no-separator").is_err());
        assert!(parse_assignment(" =value").is_err());
    }

    #[test]
    fn refusals_carry_the_interface_kind_and_correlation_id() {
        let error = WizardError::StepInvalid { step: 2, fields: vec!["contact_phone".to_string()] };
        let result =
            refused(ApplicationError::Wizard(error), "session-9", "validation", 6, json!({ "step": 2 }));
        let payload: Value = serde_json::from_str(&result.output).expect("json");

        assert_eq!(result.exit_code, 6);
        assert_eq!(payload["error_class"], "validation");
        assert_eq!(payload["details"]["kind"], "bad_request");
        assert_eq!(payload["details"]["correlation_id"], "session-9");
        assert_eq!(payload["details"]["step"], 2);
        assert_eq!(payload["details"]["detail"], "request failed validation");
    }
}
