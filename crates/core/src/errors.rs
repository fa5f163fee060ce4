//! Error layering: wizard, submission and host failures are application
//! errors, folded into the small set of interface errors shown to end users.

use std::fmt;

use thiserror::Error;

use crate::wizard::{FailureCategory, SubmissionFailure, WizardError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Wizard(#[from] WizardError),
    #[error(transparent)]
    Submission(#[from] SubmissionFailure),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceErrorKind {
    BadRequest,
    Unauthorized,
    Unavailable,
    Internal,
}

impl InterfaceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    /// Copy safe to show to a citizen; never includes backend detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "The request could not be processed. Check inputs and try again.",
            Self::Unauthorized => "Please sign in to continue.",
            Self::Unavailable => "The service is temporarily unavailable. Please retry shortly.",
            Self::Internal => "An unexpected internal error occurred.",
        }
    }
}

impl fmt::Display for InterfaceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} ({correlation_id}): {detail}")]
pub struct InterfaceError {
    pub kind: InterfaceErrorKind,
    pub detail: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl ApplicationError {
    fn interface_kind(&self) -> InterfaceErrorKind {
        match self {
            Self::Wizard(WizardError::Schema(_)) => InterfaceErrorKind::Internal,
            Self::Wizard(_) => InterfaceErrorKind::BadRequest,
            Self::Submission(failure) => match failure.category {
                FailureCategory::Rejected => InterfaceErrorKind::BadRequest,
                FailureCategory::Unauthorized => InterfaceErrorKind::Unauthorized,
                FailureCategory::Network => InterfaceErrorKind::Unavailable,
            },
            Self::Storage(_) => InterfaceErrorKind::Unavailable,
            Self::Misconfigured(_) => InterfaceErrorKind::Internal,
        }
    }

    /// Folds the error into its user-facing form, tagged for log correlation.
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let kind = self.interface_kind();
        let detail = match &self {
            Self::Wizard(WizardError::StepInvalid { .. } | WizardError::Payload(_)) => {
                "request failed validation".to_string()
            }
            other => other.to_string(),
        };
        InterfaceError { kind, detail, correlation_id: correlation_id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApplicationError, InterfaceErrorKind};
    use crate::forms::UnknownField;
    use crate::wizard::{SchemaError, SubmissionFailure, WizardError};

    #[test]
    fn invalid_steps_surface_as_bad_requests_without_detail_leaks() {
        let error = ApplicationError::from(WizardError::StepInvalid {
            step: 1,
            fields: vec!["people_count".to_string()],
        })
        .into_interface("session-1");

        assert_eq!(error.kind, InterfaceErrorKind::BadRequest);
        assert_eq!(error.correlation_id(), "session-1");
        assert_eq!(error.detail, "request failed validation");
        assert!(!error.user_message().contains("people_count"));
    }

    #[test]
    fn broken_schemas_are_internal_errors() {
        let error = ApplicationError::from(WizardError::Schema(SchemaError::NoSteps))
            .into_interface("session-4");
        assert_eq!(error.kind, InterfaceErrorKind::Internal);
        assert!(error.detail.contains("at least one step"));
    }

    #[test]
    fn unknown_fields_keep_their_name_in_the_detail() {
        let error = ApplicationError::from(WizardError::UnknownField(UnknownField("helicopter".to_string())))
            .into_interface("session-5");
        assert_eq!(error.kind, InterfaceErrorKind::BadRequest);
        assert!(error.detail.contains("helicopter"));
    }

    #[test]
    fn submission_failures_follow_their_category() {
        let cases = [
            (SubmissionFailure::network("connection refused"), InterfaceErrorKind::Unavailable),
            (SubmissionFailure::unauthorized("token expired"), InterfaceErrorKind::Unauthorized),
            (SubmissionFailure::rejected(Some("duplicate".to_string())), InterfaceErrorKind::BadRequest),
        ];
        for (failure, expected) in cases {
            let error = ApplicationError::from(failure).into_interface("session-2");
            assert_eq!(error.kind, expected);
        }
    }

    #[test]
    fn unauthorized_asks_the_user_to_sign_in() {
        let error = ApplicationError::from(SubmissionFailure::unauthorized("expired"))
            .into_interface("session-3");
        assert_eq!(error.user_message(), "Please sign in to continue.");
        assert!(error.to_string().starts_with("unauthorized (session-3)"));
    }

    #[test]
    fn storage_and_config_problems_map_to_server_side_kinds() {
        let storage = ApplicationError::Storage("database is locked".to_string()).into_interface("s");
        assert_eq!(storage.kind, InterfaceErrorKind::Unavailable);
        assert!(storage.detail.contains("database is locked"));

        let config = ApplicationError::Misconfigured("missing api key".to_string()).into_interface("s");
        assert_eq!(config.user_message(), "An unexpected internal error occurred.");
    }
}
