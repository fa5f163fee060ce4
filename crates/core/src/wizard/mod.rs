pub mod controller;
pub mod engine;
pub mod states;
pub mod submission;
pub mod validation;

pub use controller::{
    AdvanceOutcome, CancelOutcome, CloseCallback, CloseReason, IgnoredReason, PendingSubmission,
    WizardController, WizardError, WizardSession, DEFAULT_SUBMIT_TIMEOUT,
};
pub use engine::{StepMachine, WizardTransitionError};
pub use states::{TransitionOutcome, WizardAction, WizardEvent, WizardState, WizardStatus};
pub use submission::{
    cancellation_pair, CancellationHandle, CancellationToken, CreateRequest, FailureCategory,
    RecordingSubmissionAdapter, SubmissionAdapter, SubmissionFailure, SubmissionResult,
};
pub use validation::{
    FieldCollector, FieldRule, Rule, SchemaError, StepDefinition, Violations, WizardSchema,
    REQUIRED_MESSAGE,
};
