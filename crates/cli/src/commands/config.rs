use resq_core::config::{AppConfig, LoadOptions, CONFIG_KEYS};
use secrecy::{ExposeSecret, SecretString};

const UNSET: &str = "<unset>";

/// Prints every effective setting with the layer it came from. Secrets are
/// masked.
pub fn run() -> String {
    let (config, sources) = match AppConfig::load_traced(LoadOptions::default()) {
        Ok(loaded) => loaded,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut lines = vec!["effective config (precedence: override > env > file > default):".to_string()];
    lines.extend(CONFIG_KEYS.iter().map(|(key, _)| {
        let source = sources.get(key).map(ToString::to_string).unwrap_or_else(|| "default".to_string());
        format!("- {key} = {} (source: {source})", display_value(&config, key))
    }));
    lines.join("\n")
}

fn display_value(config: &AppConfig, key: &str) -> String {
    let (backend, database, logging) = (&config.backend, &config.database, &config.logging);
    match key {
        "backend.mode" => format!("{:?}", backend.mode),
        "backend.base_url" => backend.base_url.clone().unwrap_or_else(|| UNSET.to_string()),
        "backend.api_key" => mask(backend.api_key.as_ref()),
        "backend.access_token" => mask(backend.access_token.as_ref()),
        "backend.user_id" => backend.user_id.clone().unwrap_or_else(|| UNSET.to_string()),
        "backend.submit_timeout_secs" => backend.submit_timeout_secs.to_string(),
        "database.url" => database.url.clone(),
        "database.max_connections" => database.max_connections.to_string(),
        "database.timeout_secs" => database.timeout_secs.to_string(),
        "logging.level" => logging.level.clone(),
        "logging.format" => format!("{:?}", logging.format),
        _ => UNSET.to_string(),
    }
}

/// Shows at most the last four characters, and only for secrets long enough
/// that the tail does not give them away.
fn mask(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret.map(|secret| secret.expose_secret().trim()) else {
        return UNSET.to_string();
    };
    let chars = secret.chars().collect::<Vec<_>>();
    match chars.len() {
        0 => "<empty>".to_string(),
        1..=8 => "<redacted>".to_string(),
        len => format!("***{}", chars[len - 4..].iter().collect::<String>()),
    }
}
