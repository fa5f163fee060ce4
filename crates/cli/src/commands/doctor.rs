use std::fmt;

use resq_core::config::{AppConfig, BackendMode, LoadOptions};
use resq_db::{connect_config, migrations};
use serde::Serialize;

use crate::commands::current_thread_runtime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, details)
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, details)
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Skipped, details)
    }
}

/// Skipped checks never fail the report.
#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let failed = checks.iter().filter(|check| check.status == CheckStatus::Fail).count();
        let (overall_status, summary) = match failed {
            0 => (CheckStatus::Pass, "doctor: all readiness checks passed".to_string()),
            n => (CheckStatus::Fail, format!("doctor: {n} of {} readiness checks failed", checks.len())),
        };
        Self { overall_status, summary, checks }
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)?;
        for check in &self.checks {
            let marker = match check.status {
                CheckStatus::Pass => "ok",
                CheckStatus::Fail => "fail",
                CheckStatus::Skipped => "skip",
            };
            write!(f, "\n- [{marker}] {}: {}", check.name, check.details)?;
        }
        Ok(())
    }
}

/// Runs every readiness check; `json_output` selects pretty JSON over text.
pub fn run(json_output: bool) -> String {
    let report = DoctorReport::from_checks(collect_checks());
    if !json_output {
        return report.to_string();
    }
    serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
        serde_json::json!({
            "overall_status": "fail",
            "summary": "doctor report could not be serialized",
            "error": error.to_string(),
        })
        .to_string()
    })
}

fn collect_checks() -> Vec<DoctorCheck> {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail("config_validation", error.to_string())];
            checks.extend(["signed_in_user", "backend_readiness", "database_schema"].map(|name| {
                DoctorCheck::skipped(name, "skipped because configuration did not load")
            }));
            return checks;
        }
    };

    let mut checks = vec![
        DoctorCheck::pass("config_validation", "configuration loaded and validated"),
        check_signed_in_user(&config),
    ];
    match config.backend.mode {
        BackendMode::Local => checks.extend(check_local_database(&config)),
        BackendMode::Remote => {
            checks.push(check_remote_backend(&config));
            checks.push(DoctorCheck::skipped(
                "database_schema",
                "remote backend mode does not use the local database",
            ));
        }
    }
    checks
}

fn check_signed_in_user(config: &AppConfig) -> DoctorCheck {
    let user_id = config.backend.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
    match (config.backend.mode, user_id) {
        (_, None) => DoctorCheck::fail(
            "signed_in_user",
            "no user id configured; submissions will be refused as unauthorized",
        ),
        (BackendMode::Remote, Some(user_id)) if !config.backend.has_access_token() => {
            DoctorCheck::fail(
                "signed_in_user",
                format!("user `{user_id}` has no access token configured"),
            )
        }
        (_, Some(user_id)) => DoctorCheck::pass("signed_in_user", format!("signed in as `{user_id}`")),
    }
}

fn check_remote_backend(config: &AppConfig) -> DoctorCheck {
    match config.backend.base_url.as_deref() {
        Some(base_url) if base_url.starts_with("https://") || base_url.starts_with("http://") => {
            DoctorCheck::pass("backend_readiness", format!("remote backend at `{base_url}`"))
        }
        Some(base_url) => DoctorCheck::fail(
            "backend_readiness",
            format!("base url `{base_url}` must start with http:// or https://"),
        ),
        None => DoctorCheck::fail("backend_readiness", "remote mode requires backend.base_url"),
    }
}

fn check_local_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => {
            return vec![
                DoctorCheck::fail("backend_readiness", failure.message),
                DoctorCheck::skipped("database_schema", "skipped because the runtime did not start"),
            ];
        }
    };

    let checked = runtime.block_on(async {
        let pool = connect_config(&config.database).await.map_err(|error| error.to_string())?;
        let status = migrations::schema_status(&pool).await;
        pool.close().await;
        Ok::<_, String>(status)
    });

    match checked {
        Err(error) => vec![
            DoctorCheck::fail("backend_readiness", format!("failed to connect to database: {error}")),
            DoctorCheck::skipped("database_schema", "skipped because the database is unreachable"),
        ],
        Ok(status) => {
            let reachable = DoctorCheck::pass(
                "backend_readiness",
                format!("connected using `{}`", config.database.url),
            );
            let schema = match status {
                Ok(status) if status.is_current() => DoctorCheck::pass(
                    "database_schema",
                    format!("schema up to date (versions {:?})", status.applied),
                ),
                Ok(status) => DoctorCheck::fail(
                    "database_schema",
                    format!(
                        "{} pending migration(s) {:?}; run `resq migrate`",
                        status.pending.len(),
                        status.pending
                    ),
                ),
                Err(error) => DoctorCheck::fail("database_schema", error.to_string()),
            };
            vec![reachable, schema]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn skipped_checks_do_not_fail_the_report() {
        let report = DoctorReport::from_checks(vec![
            DoctorCheck::pass("config_validation", "ok"),
            DoctorCheck::skipped("database_schema", "remote"),
        ]);
        assert_eq!(report.overall_status, CheckStatus::Pass);
    }

    #[test]
    fn text_rendering_lists_each_check_with_a_marker() {
        let report = DoctorReport::from_checks(vec![
            DoctorCheck::pass("config_validation", "loaded"),
            DoctorCheck::fail("signed_in_user", "no user id configured"),
        ]);

        let text = report.to_string();
        assert!(text.starts_with("doctor: 1 of 2 readiness checks failed"));
        assert!(text.contains("- [fail] signed_in_user: no user id configured"));
    }
}
