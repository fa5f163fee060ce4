use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Emergency action a citizen can request or offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Rescue,
    HazardReport,
    TransportOffer,
    ShelterOffer,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] =
        [Self::Rescue, Self::HazardReport, Self::TransportOffer, Self::ShelterOffer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rescue => "Rescue",
            Self::HazardReport => "HazardReport",
            Self::TransportOffer => "TransportOffer",
            Self::ShelterOffer => "ShelterOffer",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown kind `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for RequestKind {
    type Err = UnknownKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownKind(trimmed.to_string()))
    }
}

/// What a finished wizard creates on the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "record", content = "kind", rename_all = "snake_case")]
pub enum RecordKind {
    Action(RequestKind),
    VolunteerSignup,
    Complaint,
}

impl RecordKind {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Action(_) => "action_requests",
            Self::VolunteerSignup => "volunteer_signups",
            Self::Complaint => "complaints",
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Action(kind) => format!("action:{kind}"),
            Self::VolunteerSignup => "volunteer_signup".to_string(),
            Self::Complaint => "complaint".to_string(),
        }
    }
}

impl FromStr for RecordKind {
    type Err = UnknownKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed {
            "volunteer_signup" => Ok(Self::VolunteerSignup),
            "complaint" => Ok(Self::Complaint),
            other => match other.strip_prefix("action:") {
                Some(kind) => kind.parse().map(Self::Action),
                None => Err(UnknownKind(other.to_string())),
            },
        }
    }
}

/// Opaque id assigned by the persistence collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated key shared by every attempt of one wizard session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionKey(pub String);

impl SubmissionKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
