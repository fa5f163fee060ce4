pub mod community;
pub mod config;
pub mod doctor;
pub mod migrate;
pub mod submit;

use resq_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use serde_json::Value;

/// What a command prints to stdout, plus the process exit code.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// A command that stopped early, classified for scripts reading the JSON.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub class: String,
    pub message: String,
    pub exit_code: u8,
    pub details: Option<Value>,
}

impl CommandFailure {
    pub fn new(class: impl Into<String>, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class: class.into(), message: message.into(), exit_code, details: None }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'a str>,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl Envelope<'_> {
    fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|error| {
            serde_json::json!({
                "command": self.command,
                "status": "error",
                "error_class": "serialization",
                "message": error.to_string(),
            })
            .to_string()
        })
    }
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_details(command, message, None)
    }

    pub fn success_with_details(
        command: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        let message = message.into();
        let envelope = Envelope {
            command,
            status: "ok",
            error_class: None,
            message: &message,
            details: details.as_ref(),
        };
        Self { exit_code: 0, output: envelope.render() }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::from_failure(command, CommandFailure::new(error_class, message, exit_code))
    }

    pub fn failure_with_details(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
        details: Option<Value>,
    ) -> Self {
        let mut failure = CommandFailure::new(error_class, message, exit_code);
        failure.details = details;
        Self::from_failure(command, failure)
    }

    pub fn from_failure(command: &str, failure: CommandFailure) -> Self {
        let envelope = Envelope {
            command,
            status: "error",
            error_class: Some(failure.class.as_str()),
            message: &failure.message,
            details: failure.details.as_ref(),
        };
        Self { exit_code: failure.exit_code, output: envelope.render() }
    }
}

/// Loads layered configuration; a bad config exits with code 2.
pub(crate) fn load_config() -> Result<AppConfig, CommandFailure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandFailure::new("config_validation", format!("configuration issue: {error}"), 2)
    })
}

/// Each command drives its async work on a single-threaded runtime.
pub(crate) fn current_thread_runtime() -> Result<tokio::runtime::Runtime, CommandFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandFailure::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
    })
}
