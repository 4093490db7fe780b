use std::io;

use murmur_core::api::ApiError;
use murmur_core::auth::AuthError;
use murmur_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] murmur_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to read config at {path}: {message}")]
    ConfigFile { path: String, message: String },
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Not signed in. Run `murmur login` first.")]
    NotSignedIn,
    #[error("No password provided")]
    EmptyPassword,
    #[error("Page count must be at least 1")]
    InvalidPageCount,
}
