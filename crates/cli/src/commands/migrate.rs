use resq_db::{connect_config, migrations};
use tracing::info;

use crate::commands::{current_thread_runtime, load_config, CommandFailure, CommandResult};

const COMMAND: &str = "migrate";

pub fn run() -> CommandResult {
    match apply() {
        Ok(applied) => CommandResult::success(
            COMMAND,
            format!("applied pending migrations (schema versions: {applied:?})"),
        ),
        Err(failure) => CommandResult::from_failure(COMMAND, failure),
    }
}

fn apply() -> Result<Vec<i64>, CommandFailure> {
    let config = load_config()?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = connect_config(&config.database)
            .await
            .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;
        let migrated = async {
            migrations::run_pending(&pool).await.map_err(|error| error.to_string())?;
            migrations::applied_versions(&pool).await.map_err(|error| error.to_string())
        }
        .await;
        pool.close().await;

        let applied = migrated.map_err(|message| CommandFailure::new("migration", message, 5))?;
        info!(event_name = "cli.migrate.completed", versions = ?applied, "schema migrated");
        Ok(applied)
    })
}
