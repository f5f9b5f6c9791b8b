//! Error types for thread enrichment.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned HTTP {status}: {body}")]
    ServerError {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Transport error talking to {provider}: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

impl LlmError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::ServerError { status, .. } => *status >= 500,
            Self::RequestFailed { .. }
            | Self::InvalidResponse { .. }
            | Self::AuthFailed { .. } => false,
        }
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Completion failed for thread {id}: {source}")]
    Completion {
        id: String,
        #[source]
        source: LlmError,
    },

    #[error("Unit of work failed: {0}")]
    TaskFailed(String),

    #[error("Invalid input on line {line}: {reason}")]
    Input { line: usize, reason: String },

    #[error("Output error: {0}")]
    Output(String),
}
