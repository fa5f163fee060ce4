pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use resq_core::config::{AppConfig, LoadOptions, LogFormat};
use resq_core::forms::FormKind;

use crate::commands::submit::{parse_assignment, SubmitArgs};

#[derive(Debug, Parser)]
#[command(
    name = "resq",
    about = "ResQ action-request CLI",
    long_about = "Fill in and submit ResQ wizards, inspect configuration, and manage the local database.",
    after_help = "Examples:\n  resq submit action --set type=Rescue --set location=\"Main St 4\" ...\n  resq doctor --json\n  resq leaderboard --file scores.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, signed-in user, backend readiness and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run a wizard to completion from field assignments and submit it")]
    Submit {
        #[arg(help = "Wizard to run: action, volunteer or complaint")]
        form: FormKind,
        #[arg(
            long = "set",
            value_name = "FIELD=VALUE",
            value_parser = parse_assignment,
            help = "Field assignment, repeatable"
        )]
        values: Vec<(String, String)>,
        #[arg(long, help = "Submit as this user instead of the configured one")]
        actor: Option<String>,
        #[arg(long, help = "Validate and build the request without persisting it")]
        dry_run: bool,
        #[arg(long, default_value_t = 0, help = "Extra attempts after a retryable failure")]
        retries: u32,
    },
    #[command(about = "Rank citizens from a JSON file of scores")]
    Leaderboard {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    #[command(about = "List places from a JSON file within a radius of a point")]
    Nearby {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, default_value_t = 5.0)]
        radius_km: f64,
    },
}

/// Sends logs to stderr so command payloads on stdout stay machine-readable.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(std::io::stderr);

    // Ignore the error when a subscriber is already installed.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Submit { form, values, actor, dry_run, retries } => {
            commands::submit::run(SubmitArgs { form, values, actor, dry_run, retries })
        }
        Command::Leaderboard { file, limit } => commands::community::leaderboard(&file, limit),
        Command::Nearby { file, lat, lon, radius_km } => {
            commands::community::nearby(&file, lat, lon, radius_km)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
