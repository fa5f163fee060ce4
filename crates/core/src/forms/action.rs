use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    insert_text, parse_optional, required_text, trimmed, FormKind, PayloadError, UnknownField,
    WizardForm,
};
use crate::community::geo::{Coordinate, GeoError};
use crate::domain::{RecordKind, RequestKind};
use crate::wizard::validation::{Rule, SchemaError, StepDefinition, WizardSchema};

pub(crate) const PHONE_PATTERN: &str = r"^\+?[0-9]{7,15}$";
const URGENCY_LEVELS: [&str; 4] = ["low", "medium", "high", "critical"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionField {
    Type,
    Urgency,
    Location,
    Latitude,
    Longitude,
    PeopleCount,
    ContactName,
    ContactPhone,
    Details,
}

impl ActionField {
    pub const ALL: [ActionField; 9] = [
        Self::Type,
        Self::Urgency,
        Self::Location,
        Self::Latitude,
        Self::Longitude,
        Self::PeopleCount,
        Self::ContactName,
        Self::ContactPhone,
        Self::Details,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Urgency => "urgency",
            Self::Location => "location",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::PeopleCount => "people_count",
            Self::ContactName => "contact_name",
            Self::ContactPhone => "contact_phone",
            Self::Details => "details",
        }
    }
}

impl fmt::Display for ActionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionField {
    type Err = UnknownField;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == trimmed)
            .ok_or_else(|| UnknownField(trimmed.to_string()))
    }
}

/// Rescue, hazard report, transport offer or shelter offer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequestForm {
    #[serde(rename = "type")]
    pub request_type: Option<String>,
    pub urgency: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    pub people_count: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub details: Option<String>,
}

impl ActionRequestForm {
    fn slot(&mut self, field: ActionField) -> &mut Option<String> {
        match field {
            ActionField::Type => &mut self.request_type,
            ActionField::Urgency => &mut self.urgency,
            ActionField::Location => &mut self.location,
            ActionField::Latitude => &mut self.latitude,
            ActionField::Longitude => &mut self.longitude,
            ActionField::PeopleCount => &mut self.people_count,
            ActionField::ContactName => &mut self.contact_name,
            ActionField::ContactPhone => &mut self.contact_phone,
            ActionField::Details => &mut self.details,
        }
    }
}

impl ActionRequestForm {
    /// Both halves or neither; a lone or out-of-range value is an error.
    pub fn coordinate(&self) -> Result<Option<Coordinate>, PayloadError> {
        let latitude = parse_optional::<f64>(&self.latitude, "latitude")?;
        let longitude = parse_optional::<f64>(&self.longitude, "longitude")?;
        let (latitude, longitude) = match (latitude, longitude) {
            (None, None) => return Ok(None),
            (Some(_), None) => return Err(PayloadError::Missing { field: "longitude".to_string() }),
            (None, Some(_)) => return Err(PayloadError::Missing { field: "latitude".to_string() }),
            (Some(latitude), Some(longitude)) => (latitude, longitude),
        };
        Coordinate::new(latitude, longitude).map(Some).map_err(|error| {
            let (field, value) = match error {
                GeoError::LongitudeOutOfRange(value) => ("longitude", value),
                _ => ("latitude", latitude),
            };
            PayloadError::InvalidValue { field: field.to_string(), value: value.to_string() }
        })
    }
}

impl WizardForm for ActionRequestForm {
    type Field = ActionField;

    const FORM_KIND: FormKind = FormKind::ActionRequest;

    fn schema() -> Result<WizardSchema<ActionField>, SchemaError> {
        let kinds = RequestKind::ALL.map(|kind| kind.as_str());
        WizardSchema::new(vec![
            StepDefinition::new(0, "What do you need?")
                .field(ActionField::Type, vec![Rule::Required, Rule::one_of(kinds)])
                .field(ActionField::Urgency, vec![Rule::one_of(URGENCY_LEVELS)]),
            StepDefinition::new(1, "Where?")
                .field(ActionField::Location, vec![Rule::Required, Rule::MinLength(3)])
                .field(ActionField::Latitude, vec![Rule::Range { min: -90.0, max: 90.0 }])
                .field(ActionField::Longitude, vec![Rule::Range { min: -180.0, max: 180.0 }])
                .paired(ActionField::Latitude, ActionField::Longitude)
                .field(
                    ActionField::PeopleCount,
                    vec![Rule::pattern(r"^[0-9]{1,5}$", "must be a whole number")?],
                ),
            StepDefinition::new(2, "How can responders reach you?")
                .field(ActionField::ContactName, vec![Rule::Required, Rule::MinLength(2)])
                .field(
                    ActionField::ContactPhone,
                    vec![Rule::Required, Rule::pattern(PHONE_PATTERN, "must be a valid phone number")?],
                )
                .field(ActionField::Details, vec![Rule::MaxLength(1000)]),
        ])
    }

    fn value(&self, field: ActionField) -> Option<&str> {
        match field {
            ActionField::Type => self.request_type.as_deref(),
            ActionField::Urgency => self.urgency.as_deref(),
            ActionField::Location => self.location.as_deref(),
            ActionField::Latitude => self.latitude.as_deref(),
            ActionField::Longitude => self.longitude.as_deref(),
            ActionField::PeopleCount => self.people_count.as_deref(),
            ActionField::ContactName => self.contact_name.as_deref(),
            ActionField::ContactPhone => self.contact_phone.as_deref(),
            ActionField::Details => self.details.as_deref(),
        }
    }

    fn set_value(&mut self, field: ActionField, value: String) {
        *self.slot(field) = Some(value);
    }

    fn clear_value(&mut self, field: ActionField) {
        *self.slot(field) = None;
    }

    fn record_kind(&self) -> Result<RecordKind, PayloadError> {
        let raw = required_text(&self.request_type, "type")?;
        raw.parse::<RequestKind>()
            .map(RecordKind::Action)
            .map_err(|_| PayloadError::InvalidValue { field: "type".to_string(), value: raw })
    }

    fn payload(&self) -> Result<Map<String, Value>, PayloadError> {
        let mut payload = Map::new();
        let kind = match self.record_kind()? {
            RecordKind::Action(kind) => kind,
            other => {
                return Err(PayloadError::InvalidValue {
                    field: "type".to_string(),
                    value: other.label(),
                })
            }
        };
        payload.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        if let Some(urgency) = trimmed(&self.urgency) {
            payload.insert("urgency".to_string(), Value::String(urgency.to_ascii_lowercase()));
        }
        payload.insert("location".to_string(), Value::String(required_text(&self.location, "location")?));

        if let Some(point) = self.coordinate()? {
            payload.insert("latitude".to_string(), Value::from(point.latitude));
            payload.insert("longitude".to_string(), Value::from(point.longitude));
        }
        if let Some(count) = parse_optional::<u32>(&self.people_count, "people_count")? {
            payload.insert("people_count".to_string(), Value::from(count));
        }

        payload.insert(
            "contact_name".to_string(),
            Value::String(required_text(&self.contact_name, "contact_name")?),
        );
        payload.insert(
            "contact_phone".to_string(),
            Value::String(required_text(&self.contact_phone, "contact_phone")?),
        );
        insert_text(&mut payload, "details", &self.details);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ActionField, ActionRequestForm};
    use crate::domain::{RecordKind, RequestKind};
    use crate::forms::{PayloadError, WizardForm};

    fn filled() -> ActionRequestForm {
        let mut form = ActionRequestForm::default();
        form.set_value(ActionField::Type, "rescue".to_string());
        form.set_value(ActionField::Urgency, "HIGH".to_string());
        form.set_value(ActionField::Location, "Riverside Rd 12".to_string());
        form.set_value(ActionField::Latitude, "52.37".to_string());
        form.set_value(ActionField::Longitude, "4.89".to_string());
        form.set_value(ActionField::PeopleCount, "3".to_string());
        form.set_value(ActionField::ContactName, "Sam".to_string());
        form.set_value(ActionField::ContactPhone, "+31612345678".to_string());
        form
    }

    #[test]
    fn schema_has_three_steps_with_type_required_first() {
        let schema = ActionRequestForm::schema().expect("schema");
        assert_eq!(schema.total_steps(), 3);
        let first = schema.step(0).expect("first step");
        assert!(first.required_fields().contains(&ActionField::Type));
        assert_eq!(schema.step_of(ActionField::ContactPhone), Some(2));
    }

    #[test]
    fn field_names_parse_from_wire_names() {
        for field in ActionField::ALL {
            assert_eq!(field.as_str().parse::<ActionField>(), Ok(field));
        }
        assert!("kind".parse::<ActionField>().is_err());
    }

    #[test]
    fn payload_carries_typed_values() {
        let form = filled();
        assert_eq!(form.record_kind(), Ok(RecordKind::Action(RequestKind::Rescue)));

        let payload = form.payload().expect("payload");
        assert_eq!(payload["type"], json!("Rescue"));
        assert_eq!(payload["urgency"], json!("high"));
        assert_eq!(payload["people_count"], json!(3));
        assert_eq!(payload["latitude"], json!(52.37));
        assert!(!payload.contains_key("details"));
    }

    #[test]
    fn payload_never_drops_half_a_coordinate() {
        let mut form = filled();
        form.clear_value(ActionField::Longitude);
        assert_eq!(form.payload(), Err(PayloadError::Missing { field: "longitude".to_string() }));

        form.clear_value(ActionField::Latitude);
        let payload = form.payload().expect("payload without coordinates");
        assert!(!payload.contains_key("latitude"));
        assert!(!payload.contains_key("longitude"));
    }

    #[test]
    fn payload_rejects_coordinates_off_the_globe() {
        let mut form = filled();
        form.set_value(ActionField::Longitude, "-181".to_string());
        assert_eq!(
            form.payload(),
            Err(PayloadError::InvalidValue { field: "longitude".to_string(), value: "-181".to_string() })
        );

        form.set_value(ActionField::Longitude, "4.89".to_string());
        form.set_value(ActionField::Latitude, "91".to_string());
        assert!(matches!(
            form.payload(),
            Err(PayloadError::InvalidValue { ref field, .. }) if field == "latitude"
        ));
    }

    #[test]
    fn payload_reports_missing_required_values() {
        let mut form = filled();
        form.clear_value(ActionField::ContactName);
        assert_eq!(
            form.payload(),
            Err(PayloadError::Missing { field: "contact_name".to_string() })
        );
    }
}
