use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use thiserror::Error;

use crate::forms::WizardForm;

pub const REQUIRED_MESSAGE: &str = "required";

/// Field-scoped violations, ordered by field so repeated runs compare equal.
pub type Violations<F> = BTreeMap<F, String>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("wizard schema must declare at least one step")]
    NoSteps,
    #[error("step at position {position} declares index {declared}")]
    StepIndexMismatch { position: usize, declared: usize },
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("rule set for `{field}` is empty")]
    EmptyRuleSet { field: String },
}

#[derive(Clone, Debug)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Pattern { regex: Regex, message: String },
    OneOf(Vec<String>),
    /// Inclusive numeric bounds; non-numeric input fails too.
    Range { min: f64, max: f64 },
}

impl Rule {
    pub fn pattern(pattern: &str, message: impl Into<String>) -> Result<Self, SchemaError> {
        let regex = Regex::new(pattern).map_err(|error| SchemaError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: error.to_string(),
        })?;
        Ok(Self::Pattern { regex, message: message.into() })
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Checks a present, non-blank value. `Required` always passes here.
    fn check(&self, value: &str) -> Result<(), String> {
        let length = value.chars().count();
        match self {
            Self::Required => Ok(()),
            Self::MinLength(min) if length < *min => {
                Err(format!("must be at least {min} characters"))
            }
            Self::MaxLength(max) if length > *max => {
                Err(format!("must be at most {max} characters"))
            }
            Self::MinLength(_) | Self::MaxLength(_) => Ok(()),
            Self::Pattern { regex, message } => {
                if regex.is_match(value) {
                    Ok(())
                } else {
                    Err(message.clone())
                }
            }
            Self::OneOf(allowed) => {
                if allowed.iter().any(|candidate| candidate.eq_ignore_ascii_case(value)) {
                    Ok(())
                } else {
                    Err(format!("must be one of: {}", allowed.join(", ")))
                }
            }
            Self::Range { min, max } => match value.parse::<f64>() {
                Ok(number) if (*min..=*max).contains(&number) => Ok(()),
                _ => Err(format!("must be a number between {min} and {max}")),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldRule<F> {
    pub field: F,
    pub rules: Vec<Rule>,
}

impl<F> FieldRule<F> {
    pub fn is_required(&self) -> bool {
        self.rules.iter().any(|rule| matches!(rule, Rule::Required))
    }

    /// First violated rule wins; optional fields are only checked when present.
    fn evaluate(&self, value: Option<&str>) -> Option<String> {
        let present = value.map(str::trim).filter(|value| !value.is_empty());
        match present {
            None if self.is_required() => Some(REQUIRED_MESSAGE.to_string()),
            None => None,
            Some(value) => self.rules.iter().find_map(|rule| rule.check(value).err()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StepDefinition<F> {
    pub index: usize,
    pub title: String,
    pub fields: Vec<FieldRule<F>>,
    /// Fields that must be given together or not at all.
    pub pairs: Vec<(F, F)>,
}

impl<F> StepDefinition<F>
where
    F: Copy + Ord + std::fmt::Display,
{
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self { index, title: title.into(), fields: Vec::new(), pairs: Vec::new() }
    }

    pub fn field(mut self, field: F, rules: Vec<Rule>) -> Self {
        self.fields.push(FieldRule { field, rules });
        self
    }

    pub fn paired(mut self, first: F, second: F) -> Self {
        self.pairs.push((first, second));
        self
    }

    pub fn required_fields(&self) -> BTreeSet<F> {
        self.fields.iter().filter(|rule| rule.is_required()).map(|rule| rule.field).collect()
    }

    pub fn declares(&self, field: F) -> bool {
        self.fields.iter().any(|rule| rule.field == field)
    }
}

/// Ordered steps of one wizard kind, checked once at construction.
#[derive(Clone, Debug)]
pub struct WizardSchema<F> {
    steps: Vec<StepDefinition<F>>,
}

impl<F> WizardSchema<F>
where
    F: Copy + Ord + std::fmt::Display,
{
    pub fn new(steps: Vec<StepDefinition<F>>) -> Result<Self, SchemaError> {
        if steps.is_empty() {
            return Err(SchemaError::NoSteps);
        }
        for (position, step) in steps.iter().enumerate() {
            if step.index != position {
                return Err(SchemaError::StepIndexMismatch { position, declared: step.index });
            }
            if let Some(empty) = step.fields.iter().find(|rule| rule.rules.is_empty()) {
                return Err(SchemaError::EmptyRuleSet { field: empty.field.to_string() });
            }
        }
        Ok(Self { steps })
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn last_step(&self) -> usize {
        self.steps.len() - 1
    }

    pub fn step(&self, index: usize) -> Option<&StepDefinition<F>> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[StepDefinition<F>] {
        &self.steps
    }

    pub fn step_of(&self, field: F) -> Option<usize> {
        self.steps.iter().position(|step| step.declares(field))
    }
}

/// Per-step input capture over a typed form record.
#[derive(Clone, Debug)]
pub struct FieldCollector<T: WizardForm> {
    schema: WizardSchema<T::Field>,
    form: T,
    errors: Violations<T::Field>,
}

impl<T: WizardForm> FieldCollector<T> {
    pub fn new(schema: WizardSchema<T::Field>) -> Self {
        Self { schema, form: T::default(), errors: Violations::new() }
    }

    pub fn schema(&self) -> &WizardSchema<T::Field> {
        &self.schema
    }

    pub fn form(&self) -> &T {
        &self.form
    }

    pub fn errors(&self) -> &Violations<T::Field> {
        &self.errors
    }

    pub fn set_value(&mut self, field: T::Field, value: impl Into<String>) {
        self.form.set_value(field, value.into());
        self.errors.remove(&field);
    }

    pub fn clear_value(&mut self, field: T::Field) {
        self.form.clear_value(field);
        self.errors.remove(&field);
    }

    /// Pure: no state is touched, so repeated calls agree.
    pub fn validate_step(&self, step: usize) -> Violations<T::Field> {
        let Some(definition) = self.schema.step(step) else {
            return Violations::new();
        };

        let mut violations: Violations<T::Field> = definition
            .fields
            .iter()
            .filter_map(|rule| {
                rule.evaluate(self.form.value(rule.field)).map(|message| (rule.field, message))
            })
            .collect();

        let present = |field| self.form.value(field).is_some_and(|value| !value.trim().is_empty());
        for &(first, second) in &definition.pairs {
            let missing = match (present(first), present(second)) {
                (true, false) => Some((second, first)),
                (false, true) => Some((first, second)),
                _ => None,
            };
            if let Some((missing, given)) = missing {
                violations.entry(missing).or_insert_with(|| format!("required when {given} is set"));
            }
        }
        violations
    }

    /// Validates and records the violations for inline display.
    pub fn check_step(&mut self, step: usize) -> Violations<T::Field> {
        let violations = self.validate_step(step);
        if let Some(definition) = self.schema.step(step) {
            for rule in &definition.fields {
                self.errors.remove(&rule.field);
            }
        }
        self.errors.extend(violations.iter().map(|(field, message)| (*field, message.clone())));
        violations
    }
}
