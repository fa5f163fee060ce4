pub mod audit;
pub mod community;
pub mod config;
pub mod domain;
pub mod errors;
pub mod forms;
pub mod wizard;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use community::{haversine_km, rank, CitizenScore, Coordinate, LeaderboardEntry, RewardTier};
pub use config::{AppConfig, BackendMode, ConfigError, ConfigSource, LoadOptions, LogFormat};
pub use domain::{RecordId, RecordKind, RequestKind, SubmissionKey};
pub use errors::{ApplicationError, InterfaceError, InterfaceErrorKind};
pub use forms::{
    ActionField, ActionRequestForm, ComplaintField, ComplaintForm, FormKind, VolunteerField,
    VolunteerSignupForm, WizardForm,
};
pub use wizard::{
    AdvanceOutcome, CancelOutcome, CloseReason, CreateRequest, FailureCategory,
    SubmissionAdapter, SubmissionFailure, SubmissionResult, WizardController, WizardError,
    WizardState, WizardStatus,
};
