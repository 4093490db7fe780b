//! Config file and state path resolution.

use std::env;
use std::path::{Path, PathBuf};

use murmur_core::config::ClientConfig;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const STATE_FILE_NAME: &str = "state.db";
const STATE_PATH_ENV: &str = "MURMUR_STATE_PATH";

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("murmur")
        .join(CONFIG_FILE_NAME)
}

/// Load the client config. A missing file means defaults; the environment
/// overrides either.
pub fn load_client_config(explicit: Option<&Path>) -> Result<ClientConfig, CliError> {
    let path = explicit.map_or_else(default_config_path, Path::to_path_buf);
    let config = read_config_file(&path)?.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ClientConfig, CliError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(ClientConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|error| CliError::ConfigFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    ClientConfig::parse(&raw).map_err(|error| CliError::ConfigFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

pub fn resolve_state_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var_os(STATE_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_state_path)
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("murmur")
        .join(STATE_FILE_NAME)
}
