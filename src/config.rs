//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, LlmConfig};

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of completion calls in flight at once.
    pub max_concurrency: usize,
    /// Estimated token count at or above which a thread is skipped.
    pub token_threshold: usize,
    /// Characters per estimated token.
    pub chars_per_token: f64,
    /// Company the assistant works for, named in the instruction preamble.
    pub company_name: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            token_threshold: 3000,
            chars_per_token: 4.0,
            company_name: None,
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    /// Directory for a daily-rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

impl EnrichConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let defaults = PipelineConfig::default();

        let max_concurrency: usize =
            parse_or(&lookup, "ENRICH_MAX_CONCURRENCY", defaults.max_concurrency)?;
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ENRICH_MAX_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let chars_per_token: f64 =
            parse_or(&lookup, "ENRICH_CHARS_PER_TOKEN", defaults.chars_per_token)?;
        if chars_per_token.is_nan() || chars_per_token <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "ENRICH_CHARS_PER_TOKEN".to_string(),
                message: "must be a positive number".to_string(),
            });
        }

        let pipeline = PipelineConfig {
            max_concurrency,
            token_threshold: parse_or(&lookup, "ENRICH_TOKEN_THRESHOLD", defaults.token_threshold)?,
            chars_per_token,
            company_name: lookup("ENRICH_COMPANY_NAME").filter(|n| !n.trim().is_empty()),
        };

        let llm = LlmConfig {
            api_key: secrecy::SecretString::from(api_key),
            model: lookup("ENRICH_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            temperature: parse_or(&lookup, "ENRICH_TEMPERATURE", 0.1)?,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "ENRICH_REQUEST_TIMEOUT_SECS",
                60,
            )?),
            max_retries: parse_or(&lookup, "ENRICH_MAX_RETRIES", 3)?,
        };

        Ok(Self {
            llm,
            pipeline,
            log_dir: lookup("ENRICH_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
