//! Provider configuration.
//!
//! The configuration document handed to `configure` is deserialized with
//! serde. Unset fields fall back to the environment:
//!
//! - `HCLOUD_TOKEN`: API token (64 characters)
//! - `HCLOUD_ENDPOINT`: API base URL
//! - `HCLOUD_POLL_INTERVAL`: action poll interval, e.g. `500ms`, `1s`, `2m`

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Default API base URL.
pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

/// Default interval between two action polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Required token length.
pub const TOKEN_LENGTH: usize = 64;

/// Validated provider settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// API token.
    pub token: String,
    /// API base URL.
    pub endpoint: String,
    /// Interval between two action polls.
    pub poll_interval: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    token: Option<String>,
    endpoint: Option<String>,
    poll_interval: Option<String>,
}

impl ProviderConfig {
    /// Build the configuration from a `configure` document and the process
    /// environment.
    pub fn from_value(config: Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(config, |key| std::env::var(key).ok())
    }

    /// Like [`ProviderConfig::from_value`], reading fallbacks from `env`.
    pub fn from_value_with_env<F>(config: Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = match config {
            Value::Null => RawConfig::default(),
            other => serde_json::from_value(other)
                .map_err(|e| ProviderError::Configuration(e.to_string()))?,
        };

        let token = non_empty(raw.token)
            .or_else(|| non_empty(env("HCLOUD_TOKEN")))
            .ok_or_else(|| {
                ProviderError::Configuration(
                    "a token is required (set `token` or HCLOUD_TOKEN)".to_string(),
                )
            })?;
        if token.chars().count() != TOKEN_LENGTH {
            return Err(ProviderError::Configuration(format!(
                "entered token is invalid (must be exactly {} characters long)",
                TOKEN_LENGTH
            )));
        }

        let endpoint = non_empty(raw.endpoint)
            .or_else(|| non_empty(env("HCLOUD_ENDPOINT")))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let poll_interval = match non_empty(raw.poll_interval)
            .or_else(|| non_empty(env("HCLOUD_POLL_INTERVAL")))
        {
            Some(value) => parse_duration(&value)?,
            None => DEFAULT_POLL_INTERVAL,
        };
        if poll_interval.is_zero() {
            return Err(ProviderError::Configuration(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            token,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Hetzner Cloud API token, falls back to HCLOUD_TOKEN"),
            )
            .with_attribute(
                "endpoint",
                Attribute::optional_string()
                    .with_description("API base URL")
                    .with_default(Value::String(DEFAULT_ENDPOINT.to_string())),
            )
            .with_attribute(
                "poll_interval",
                Attribute::optional_string()
                    .with_description("Interval between action polls, e.g. 500ms")
                    .with_default(Value::String("500ms".to_string())),
            )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse durations such as `250ms`, `1s` or `2m`.
pub fn parse_duration(value: &str) -> Result<Duration, ProviderError> {
    let value = value.trim();
    let invalid = || {
        ProviderError::Configuration(format!(
            "invalid duration {:?} (expected e.g. 500ms, 1s, 2m)",
            value
        ))
    };

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(
            amount.checked_mul(60).ok_or_else(invalid)?,
        )),
        _ => Err(invalid()),
    }
}
