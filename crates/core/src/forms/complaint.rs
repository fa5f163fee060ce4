use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::volunteer::EMAIL_PATTERN;
use super::{insert_text, required_text, FormKind, PayloadError, UnknownField, WizardForm};
use crate::domain::RecordKind;
use crate::wizard::validation::{Rule, SchemaError, StepDefinition, WizardSchema};

const CATEGORIES: [&str; 6] = ["pothole", "streetlight", "garbage", "water", "noise", "other"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComplaintField {
    Category,
    Title,
    Location,
    Description,
    ContactEmail,
    ImageUrl,
}

impl ComplaintField {
    pub const ALL: [ComplaintField; 6] = [
        Self::Category,
        Self::Title,
        Self::Location,
        Self::Description,
        Self::ContactEmail,
        Self::ImageUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Title => "title",
            Self::Location => "location",
            Self::Description => "description",
            Self::ContactEmail => "contact_email",
            Self::ImageUrl => "image_url",
        }
    }
}

impl fmt::Display for ComplaintField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintField {
    type Err = UnknownField;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == trimmed)
            .ok_or_else(|| UnknownField(trimmed.to_string()))
    }
}

/// Municipal issue report (pothole, broken streetlight, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintForm {
    pub category: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub image_url: Option<String>,
}

impl ComplaintForm {
    fn slot(&mut self, field: ComplaintField) -> &mut Option<String> {
        match field {
            ComplaintField::Category => &mut self.category,
            ComplaintField::Title => &mut self.title,
            ComplaintField::Location => &mut self.location,
            ComplaintField::Description => &mut self.description,
            ComplaintField::ContactEmail => &mut self.contact_email,
            ComplaintField::ImageUrl => &mut self.image_url,
        }
    }
}

impl WizardForm for ComplaintForm {
    type Field = ComplaintField;

    const FORM_KIND: FormKind = FormKind::Complaint;

    fn schema() -> Result<WizardSchema<ComplaintField>, SchemaError> {
        WizardSchema::new(vec![
            StepDefinition::new(0, "What is the problem?")
                .field(ComplaintField::Category, vec![Rule::Required, Rule::one_of(CATEGORIES)])
                .field(ComplaintField::Title, vec![Rule::Required, Rule::MinLength(5), Rule::MaxLength(120)]),
            StepDefinition::new(1, "Where and what happened")
                .field(ComplaintField::Location, vec![Rule::Required, Rule::MinLength(3)])
                .field(
                    ComplaintField::Description,
                    vec![Rule::Required, Rule::MinLength(20), Rule::MaxLength(2000)],
                ),
            StepDefinition::new(2, "Follow-up")
                .field(
                    ComplaintField::ContactEmail,
                    vec![Rule::pattern(EMAIL_PATTERN, "must be a valid email address")?],
                )
                .field(
                    ComplaintField::ImageUrl,
                    vec![Rule::pattern(r"^https?://\S+$", "must be an http(s) link")?],
                ),
        ])
    }

    fn value(&self, field: ComplaintField) -> Option<&str> {
        match field {
            ComplaintField::Category => self.category.as_deref(),
            ComplaintField::Title => self.title.as_deref(),
            ComplaintField::Location => self.location.as_deref(),
            ComplaintField::Description => self.description.as_deref(),
            ComplaintField::ContactEmail => self.contact_email.as_deref(),
            ComplaintField::ImageUrl => self.image_url.as_deref(),
        }
    }

    fn set_value(&mut self, field: ComplaintField, value: String) {
        *self.slot(field) = Some(value);
    }

    fn clear_value(&mut self, field: ComplaintField) {
        *self.slot(field) = None;
    }

    fn record_kind(&self) -> Result<RecordKind, PayloadError> {
        Ok(RecordKind::Complaint)
    }

    fn payload(&self) -> Result<Map<String, Value>, PayloadError> {
        let mut payload = Map::new();
        payload.insert(
            "category".to_string(),
            Value::String(required_text(&self.category, "category")?.to_ascii_lowercase()),
        );
        payload.insert("title".to_string(), Value::String(required_text(&self.title, "title")?));
        payload.insert("location".to_string(), Value::String(required_text(&self.location, "location")?));
        payload.insert(
            "description".to_string(),
            Value::String(required_text(&self.description, "description")?),
        );
        insert_text(&mut payload, "contact_email", &self.contact_email);
        insert_text(&mut payload, "image_url", &self.image_url);
        payload.insert("status".to_string(), Value::String("open".to_string()));
        Ok(payload)
    }
}
