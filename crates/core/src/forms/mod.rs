//! Typed field records, one per wizard kind.
//!
//! Every wizard collects raw text per field and only converts it to typed
//! payload values once all steps have validated.

pub mod action;
pub mod complaint;
pub mod volunteer;

use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::RecordKind;
use crate::wizard::validation::{SchemaError, WizardSchema};

pub use action::{ActionField, ActionRequestForm};
pub use complaint::{ComplaintField, ComplaintForm};
pub use volunteer::{VolunteerField, VolunteerSignupForm};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormKind {
    ActionRequest,
    VolunteerSignup,
    Complaint,
}

impl FormKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionRequest => "action_request",
            Self::VolunteerSignup => "volunteer_signup",
            Self::Complaint => "complaint",
        }
    }
}

impl Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormKind {
    type Err = UnknownField;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "action" | "action_request" => Ok(Self::ActionRequest),
            "volunteer" | "volunteer_signup" => Ok(Self::VolunteerSignup),
            "complaint" => Ok(Self::Complaint),
            other => Err(UnknownField(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown field `{0}`")]
pub struct UnknownField(pub String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("field `{field}` is missing")]
    Missing { field: String },
    #[error("field `{field}` has invalid value `{value}`")]
    InvalidValue { field: String, value: String },
}

pub trait WizardForm: Clone + Debug + Default + Send + Sync + 'static {
    type Field: Copy
        + Debug
        + Display
        + Eq
        + Ord
        + Hash
        + FromStr<Err = UnknownField>
        + Send
        + Sync
        + 'static;

    const FORM_KIND: FormKind;

    fn schema() -> Result<WizardSchema<Self::Field>, SchemaError>;

    fn value(&self, field: Self::Field) -> Option<&str>;

    fn set_value(&mut self, field: Self::Field, value: String);

    fn clear_value(&mut self, field: Self::Field);

    fn record_kind(&self) -> Result<RecordKind, PayloadError>;

    fn payload(&self) -> Result<Map<String, Value>, PayloadError>;
}

/// Discriminated union of every form record, for hosts that hold sessions of
/// mixed kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum FormFields {
    ActionRequest(ActionRequestForm),
    VolunteerSignup(VolunteerSignupForm),
    Complaint(ComplaintForm),
}

impl FormFields {
    pub fn kind(&self) -> FormKind {
        match self {
            Self::ActionRequest(_) => FormKind::ActionRequest,
            Self::VolunteerSignup(_) => FormKind::VolunteerSignup,
            Self::Complaint(_) => FormKind::Complaint,
        }
    }
}

pub(crate) fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

pub(crate) fn required_text(value: &Option<String>, field: &str) -> Result<String, PayloadError> {
    trimmed(value)
        .map(str::to_string)
        .ok_or_else(|| PayloadError::Missing { field: field.to_string() })
}

pub(crate) fn insert_text(payload: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = trimmed(value) {
        payload.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub(crate) fn parse_optional<N>(value: &Option<String>, field: &str) -> Result<Option<N>, PayloadError>
where
    N: FromStr,
{
    trimmed(value)
        .map(|raw| {
            raw.parse::<N>().map_err(|_| PayloadError::InvalidValue {
                field: field.to_string(),
                value: raw.to_string(),
            })
        })
        .transpose()
}
