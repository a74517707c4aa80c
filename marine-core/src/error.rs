use std::time::Duration;

use thiserror::Error;

use crate::model::DroppedProvider;

/// A single provider's fetch, parse or empty-data failure.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{provider}: {kind}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderErrorKind {
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("empty: no usable forecast entries")]
    Empty,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("did not report before the aggregation finished")]
    DidNotReport,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind) -> Self {
        Self {
            provider: provider.into(),
            kind,
        }
    }

    pub fn empty(provider: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Empty)
    }

    pub fn http_status(&self) -> Option<u16> {
        match self.kind {
            ProviderErrorKind::Status { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// Startup-time configuration problems. Never retryable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "No weather providers configured.\n\
         Hint: run `marine configure <provider>` or set MARINE_PROVIDERS."
    )]
    NoProviders,

    #[error(
        "No API key configured for provider '{provider}'.\n\
         Hint: run `marine configure {provider}` or set {env_var}."
    )]
    MissingCredential { provider: String, env_var: String },

    #[error("Unknown provider '{0}'. Supported providers: stormglass, weatherapi, openmeteo.")]
    UnknownProvider(String),

    #[error("Provider '{0}' is configured more than once.")]
    DuplicateProvider(String),

    #[error("Invalid weight {weight} for provider '{provider}': must be a positive number.")]
    InvalidWeight { provider: String, weight: f64 },

    #[error("Invalid pipeline setting `{setting}`: {reason}.")]
    InvalidPipelineSetting {
        setting: &'static str,
        reason: &'static str,
    },
}

/// Errors that escape the pipeline to its caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("weather data unavailable: all {} providers failed", .dropped.len())]
    AllProvidersFailed { dropped: Vec<DroppedProvider> },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
