//! Runtime configuration loaded from the environment

use std::env;
use std::str::FromStr;
use std::time::Duration;

use parley_context::window::DEFAULT_SAFETY_MARGIN;
use thiserror::Error;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Settings shared by the orchestrator and the OpenAI backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Credential used when the caller does not supply one
    pub api_key: Option<String>,
    pub api_base: String,
    /// Deadline for a non-streaming completion
    pub completion_timeout: Duration,
    pub connect_timeout: Duration,
    pub safety_margin: usize,
    /// Tokens held back for the reply when deriving a prompt budget
    pub reserved_output: usize,
    pub default_max_output: usize,
    /// Context size assumed for models missing from the catalog
    pub fallback_context_tokens: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: OPENAI_API_BASE.to_string(),
            completion_timeout: Duration::from_secs(480),
            connect_timeout: Duration::from_secs(60),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            reserved_output: 0,
            default_max_output: 4000,
            fallback_context_tokens: 4000,
        }
    }
}

impl RuntimeConfig {
    /// Read settings from the process environment, loading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            api_key: lookup("OPENAI_API_KEY").filter(|key| !key.is_empty()),
            api_base: lookup("OPENAI_API_BASE").unwrap_or(defaults.api_base),
            completion_timeout: parse(&lookup, "PARLEY_COMPLETION_TIMEOUT_SECS")?
                .map_or(defaults.completion_timeout, Duration::from_secs),
            connect_timeout: parse(&lookup, "PARLEY_CONNECT_TIMEOUT_SECS")?
                .map_or(defaults.connect_timeout, Duration::from_secs),
            safety_margin: parse(&lookup, "PARLEY_SAFETY_MARGIN")?
                .unwrap_or(defaults.safety_margin),
            reserved_output: parse(&lookup, "PARLEY_RESERVED_OUTPUT")?
                .unwrap_or(defaults.reserved_output),
            default_max_output: parse(&lookup, "PARLEY_DEFAULT_MAX_OUTPUT")?
                .unwrap_or(defaults.default_max_output),
            fallback_context_tokens: parse(&lookup, "PARLEY_FALLBACK_CONTEXT")?
                .unwrap_or(defaults.fallback_context_tokens),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}
