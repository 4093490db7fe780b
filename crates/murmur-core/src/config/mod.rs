//! Client configuration.
//!
//! Provides `ClientConfig`, the endpoint and timing settings shared by the
//! sync engine and the CLI. Every field has a default so an empty JSON object
//! is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ReconnectPolicy;
use crate::engine::EngineConfig;
use crate::history::ScrollAnchor;
use crate::read::ReadPolicy;
use crate::util::{is_http_url, is_ws_url, normalize_text_option};

/// Environment variable overriding the REST base URL
pub const API_URL_ENV: &str = "MURMUR_API_URL";
/// Environment variable overriding the socket base URL
pub const WS_URL_ENV: &str = "MURMUR_WS_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config field '{field}' must include {expected}")]
    InvalidUrl {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Config field '{0}' must be greater than zero")]
    Zero(&'static str),
}

/// Endpoint and timing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Socket base; derived from `api_base_url` when unset
    pub ws_base_url: Option<String>,
    pub page_size: usize,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub mark_read_refresh_delay_ms: u64,
    pub mark_read_failsafe_delay_ms: u64,
    pub token_refresh_lead_secs: u64,
    pub scroll_load_threshold_px: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_base_url: None,
            page_size: crate::history::DEFAULT_PAGE_SIZE,
            reconnect_delay_ms: 3_000,
            connect_timeout_ms: 10_000,
            mark_read_refresh_delay_ms: 500,
            mark_read_failsafe_delay_ms: 3_000,
            token_refresh_lead_secs: 10,
            scroll_load_threshold_px: 50,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON config document.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `MURMUR_API_URL` / `MURMUR_WS_URL` from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary lookup (environment in production).
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(API_URL_ENV)) {
            self.api_base_url = url;
        }
        if let Some(url) = normalize_text_option(lookup(WS_URL_ENV)) {
            self.ws_base_url = Some(url);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base_url()?;
        self.ws_base_url()?;
        if self.page_size == 0 {
            return Err(ConfigError::Zero("page_size"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Zero("connect_timeout_ms"));
        }
        Ok(())
    }

    /// Normalized REST base URL, without a trailing slash.
    pub fn api_base_url(&self) -> Result<String, ConfigError> {
        let value = self.api_base_url.trim();
        if !is_http_url(value) {
            return Err(ConfigError::InvalidUrl {
                field: "api_base_url",
                expected: "http:// or https://",
            });
        }
        Ok(value.trim_end_matches('/').to_string())
    }

    /// Normalized socket base URL.
    ///
    /// When not configured explicitly it is derived from the API base by
    /// swapping the scheme and dropping a trailing `/api` segment.
    pub fn ws_base_url(&self) -> Result<String, ConfigError> {
        if let Some(explicit) = normalize_text_option(self.ws_base_url.clone()) {
            if !is_ws_url(&explicit) {
                return Err(ConfigError::InvalidUrl {
                    field: "ws_base_url",
                    expected: "ws:// or wss://",
                });
            }
            return Ok(explicit.trim_end_matches('/').to_string());
        }

        let api = self.api_base_url()?;
        let swapped = if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            api
        };
        Ok(swapped
            .strip_suffix("/api")
            .map_or_else(|| swapped.clone(), str::to_string))
    }

    pub const fn token_refresh_lead(&self) -> Duration {
        Duration::from_secs(self.token_refresh_lead_secs)
    }

    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            open_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub const fn read_policy(&self) -> ReadPolicy {
        ReadPolicy {
            refresh_delay: Duration::from_millis(self.mark_read_refresh_delay_ms),
            failsafe_delay: Duration::from_millis(self.mark_read_failsafe_delay_ms),
        }
    }

    /// Engine settings derived from this config.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            ws_base_url: self.ws_base_url()?,
            page_size: self.page_size,
            reconnect: self.reconnect_policy(),
            read: self.read_policy(),
            scroll: ScrollAnchor {
                threshold_px: self.scroll_load_threshold_px,
            },
        })
    }
}
