use crate::{
    Config, ConfigError, ProviderError, RawSample,
    error::ProviderErrorKind,
    provider::{
        cache::CachedProvider, openmeteo::OpenMeteoProvider, stormglass::StormglassProvider,
        weatherapi::WeatherApiProvider,
    },
};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use std::{fmt::Debug, sync::Arc};

pub mod cache;
pub mod openmeteo;
pub mod stormglass;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Stormglass,
    WeatherApi,
    OpenMeteo,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Stormglass => "stormglass",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::OpenMeteo => "openmeteo",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::Stormglass, ProviderId::WeatherApi, ProviderId::OpenMeteo]
    }

    /// Reliability weight used when no override is configured.
    pub fn default_weight(&self) -> f64 {
        match self {
            ProviderId::Stormglass => 1.2,
            ProviderId::WeatherApi => 1.0,
            ProviderId::OpenMeteo => 0.8,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.api_key_env().is_some()
    }

    /// Environment variable that overrides the stored API key; `None` for
    /// keyless providers.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderId::Stormglass => Some("STORMGLASS_API_KEY"),
            ProviderId::WeatherApi => Some("WEATHERAPI_API_KEY"),
            ProviderId::OpenMeteo => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "stormglass" => Ok(ProviderId::Stormglass),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "openmeteo" | "open-meteo" => Ok(ProviderId::OpenMeteo),
            _ => Err(ConfigError::UnknownProvider(value.to_string())),
        }
    }
}

/// Contract every upstream marine-weather source implements.
///
/// Adapters never retry; the aggregator owns retry and timeout policy.
/// A fetch that yields no usable entries fails with
/// [`ProviderErrorKind::Empty`] instead of returning an empty list.
#[async_trait]
pub trait MarineProvider: Send + Sync + Debug {
    /// Stable identifier, also the key for the provider's merge weight.
    fn name(&self) -> &str;

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<RawSample>, ProviderError>;
}

/// Construct a provider from config and explicit ProviderId.
///
/// The adapter is wrapped in its own response cache unless the configured
/// TTL is zero.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> Result<Arc<dyn MarineProvider>, ConfigError> {
    let api_key = config.provider_api_key(id).map(str::to_owned);
    let horizon = config.pipeline.horizon_hours;
    let ttl = config.pipeline.cache_ttl();

    let provider: Arc<dyn MarineProvider> = match (id, api_key) {
        (ProviderId::Stormglass, Some(key)) => {
            wrap(StormglassProvider::new(key).with_horizon(horizon), ttl)
        }
        (ProviderId::WeatherApi, Some(key)) => {
            wrap(WeatherApiProvider::new(key).with_horizon(horizon), ttl)
        }
        (ProviderId::OpenMeteo, _) => wrap(OpenMeteoProvider::new().with_horizon(horizon), ttl),
        (id, None) => {
            return Err(ConfigError::MissingCredential {
                provider: id.to_string(),
                env_var: id.api_key_env().unwrap_or_default().to_string(),
            });
        }
    };

    Ok(provider)
}

fn wrap<P: MarineProvider + 'static>(
    provider: P,
    ttl: std::time::Duration,
) -> Arc<dyn MarineProvider> {
    if ttl.is_zero() {
        Arc::new(provider)
    } else {
        Arc::new(CachedProvider::new(provider, ttl))
    }
}

/// Send a request and return the body, mapping transport and non-2xx
/// responses to provider errors.
pub(crate) async fn fetch_body(
    provider: &str,
    request: RequestBuilder,
) -> Result<String, ProviderError> {
    let res = request
        .send()
        .await
        .map_err(|e| ProviderError::new(provider, ProviderErrorKind::Transport(e.to_string())))?;

    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| ProviderError::new(provider, ProviderErrorKind::Transport(e.to_string())))?;

    if !status.is_success() {
        return Err(ProviderError::new(
            provider,
            ProviderErrorKind::Status {
                status: status.as_u16(),
                message: truncate_body(&body),
            },
        ));
    }

    Ok(body)
}

pub(crate) fn parse_json(provider: &str, body: &str) -> Result<serde_json::Value, ProviderError> {
    serde_json::from_str(body)
        .map_err(|e| ProviderError::new(provider, ProviderErrorKind::Malformed(e.to_string())))
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
