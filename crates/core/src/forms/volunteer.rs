use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::action::PHONE_PATTERN;
use super::{insert_text, required_text, FormKind, PayloadError, UnknownField, WizardForm};
use crate::domain::RecordKind;
use crate::wizard::validation::{Rule, SchemaError, StepDefinition, WizardSchema};

pub(crate) const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$";
const AVAILABILITY: [&str; 3] = ["weekdays", "weekends", "anytime"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VolunteerField {
    FullName,
    Email,
    Phone,
    Skills,
    Availability,
    EventId,
}

impl VolunteerField {
    pub const ALL: [VolunteerField; 6] = [
        Self::FullName,
        Self::Email,
        Self::Phone,
        Self::Skills,
        Self::Availability,
        Self::EventId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullName => "full_name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Skills => "skills",
            Self::Availability => "availability",
            Self::EventId => "event_id",
        }
    }
}

impl fmt::Display for VolunteerField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolunteerField {
    type Err = UnknownField;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == trimmed)
            .ok_or_else(|| UnknownField(trimmed.to_string()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolunteerSignupForm {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub skills: Option<String>,
    pub availability: Option<String>,
    pub event_id: Option<String>,
}

impl VolunteerSignupForm {
    fn slot(&mut self, field: VolunteerField) -> &mut Option<String> {
        match field {
            VolunteerField::FullName => &mut self.full_name,
            VolunteerField::Email => &mut self.email,
            VolunteerField::Phone => &mut self.phone,
            VolunteerField::Skills => &mut self.skills,
            VolunteerField::Availability => &mut self.availability,
            VolunteerField::EventId => &mut self.event_id,
        }
    }
}

impl WizardForm for VolunteerSignupForm {
    type Field = VolunteerField;

    const FORM_KIND: FormKind = FormKind::VolunteerSignup;

    fn schema() -> Result<WizardSchema<VolunteerField>, SchemaError> {
        WizardSchema::new(vec![
            StepDefinition::new(0, "About you")
                .field(VolunteerField::FullName, vec![Rule::Required, Rule::MinLength(2)])
                .field(
                    VolunteerField::Email,
                    vec![Rule::Required, Rule::pattern(EMAIL_PATTERN, "must be a valid email address")?],
                )
                .field(
                    VolunteerField::Phone,
                    vec![Rule::Required, Rule::pattern(PHONE_PATTERN, "must be a valid phone number")?],
                ),
            StepDefinition::new(1, "How you can help")
                .field(VolunteerField::Skills, vec![Rule::Required, Rule::MinLength(2)])
                .field(VolunteerField::Availability, vec![Rule::Required, Rule::one_of(AVAILABILITY)])
                .field(VolunteerField::EventId, vec![Rule::MaxLength(64)]),
        ])
    }

    fn value(&self, field: VolunteerField) -> Option<&str> {
        match field {
            VolunteerField::FullName => self.full_name.as_deref(),
            VolunteerField::Email => self.email.as_deref(),
            VolunteerField::Phone => self.phone.as_deref(),
            VolunteerField::Skills => self.skills.as_deref(),
            VolunteerField::Availability => self.availability.as_deref(),
            VolunteerField::EventId => self.event_id.as_deref(),
        }
    }

    fn set_value(&mut self, field: VolunteerField, value: String) {
        *self.slot(field) = Some(value);
    }

    fn clear_value(&mut self, field: VolunteerField) {
        *self.slot(field) = None;
    }

    fn record_kind(&self) -> Result<RecordKind, PayloadError> {
        Ok(RecordKind::VolunteerSignup)
    }

    fn payload(&self) -> Result<Map<String, Value>, PayloadError> {
        let mut payload = Map::new();
        payload.insert("full_name".to_string(), Value::String(required_text(&self.full_name, "full_name")?));
        payload.insert(
            "email".to_string(),
            Value::String(required_text(&self.email, "email")?.to_ascii_lowercase()),
        );
        payload.insert("phone".to_string(), Value::String(required_text(&self.phone, "phone")?));

        let skills = required_text(&self.skills, "skills")?
            .split(',')
            .map(str::trim)
            .filter(|skill| !skill.is_empty())
            .map(|skill| Value::String(skill.to_string()))
            .collect::<Vec<_>>();
        payload.insert("skills".to_string(), Value::Array(skills));
        payload.insert(
            "availability".to_string(),
            Value::String(required_text(&self.availability, "availability")?.to_ascii_lowercase()),
        );
        insert_text(&mut payload, "event_id", &self.event_id);
        Ok(payload)
    }
}
