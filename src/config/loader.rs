use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Prefix for environment overrides, e.g. `GANTRY__PORT=9000`.
pub const ENV_PREFIX: &str = "GANTRY";

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}

/// Defaults plus environment overrides, for running without a config file.
pub fn load_defaults() -> Result<ServerConfig> {
    let settings = Config::builder()
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .wrap_err("Failed to read environment overrides")?;

    settings
        .try_deserialize()
        .wrap_err("Failed to deserialize environment overrides")
}
