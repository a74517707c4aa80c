use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::{ConfigError, aggregator::RetryPolicy, provider::ProviderId};

/// Environment variable holding a comma-separated list of enabled providers.
pub const PROVIDERS_ENV: &str = "MARINE_PROVIDERS";

/// Configuration for a single provider (API key, weight override).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Timeout, retry, cache and horizon settings for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Zero disables the per-adapter cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u32,
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_horizon_hours() -> u32 {
    72
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            horizon_hours: default_horizon_hours(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Reject settings under which no provider could ever succeed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidPipelineSetting {
                setting: "timeout_secs",
                reason: "must be at least 1 second",
            });
        }
        if self.horizon_hours == 0 {
            return Err(ConfigError::InvalidPipelineSetting {
                setting: "horizon_hours",
                reason: "must be at least 1 hour",
            });
        }
        Ok(())
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Providers to query, e.g. `["stormglass", "openmeteo"]`. When absent,
    /// every provider usable with the current credentials is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Vec<String>>,

    /// Example TOML:
    /// [providers.stormglass]
    /// api_key = "..."
    /// weight = 1.2
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "marine-forecast", "marine-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay credentials and the enabled list from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay from an arbitrary lookup, so callers and tests can supply
    /// their own environment.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for id in ProviderId::all() {
            let Some(env_var) = id.api_key_env() else {
                continue;
            };
            if let Some(key) = lookup(env_var).filter(|k| !k.trim().is_empty()) {
                self.providers.entry(id.as_str().to_string()).or_default().api_key =
                    Some(key.trim().to_string());
            }
        }

        if let Some(list) = lookup(PROVIDERS_ENV) {
            let names: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            self.enabled = Some(names);
        }
    }

    /// Convenience helper: set/replace a provider API key.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .or_default()
            .api_key = Some(api_key);
    }

    pub fn set_provider_weight(&mut self, provider_id: ProviderId, weight: f64) -> Result<(), ConfigError> {
        validate_weight(provider_id, weight)?;
        self.providers
            .entry(provider_id.as_str().to_string())
            .or_default()
            .weight = Some(weight);
        Ok(())
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Returns API key for a provider, if present and non-empty.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id)
            .and_then(|cfg| cfg.api_key.as_deref())
            .filter(|key| !key.trim().is_empty())
    }

    /// Configured weight, or the provider's default.
    pub fn provider_weight(&self, provider_id: ProviderId) -> Result<f64, ConfigError> {
        match self.provider_config(provider_id).and_then(|cfg| cfg.weight) {
            Some(weight) => validate_weight(provider_id, weight).map(|_| weight),
            None => Ok(provider_id.default_weight()),
        }
    }

    /// True when the provider can be built with the current credentials.
    pub fn is_provider_usable(&self, provider_id: ProviderId) -> bool {
        !provider_id.requires_api_key() || self.provider_api_key(provider_id).is_some()
    }

    /// Providers to query, in configuration order.
    ///
    /// An explicit list is taken as-is (credentials are checked when the
    /// providers are built); otherwise every usable provider is enabled.
    pub fn enabled_provider_ids(&self) -> Result<Vec<ProviderId>, ConfigError> {
        let ids = match &self.enabled {
            Some(names) => {
                let mut ids = Vec::with_capacity(names.len());
                for name in names {
                    let id = ProviderId::try_from(name.as_str())?;
                    if ids.contains(&id) {
                        return Err(ConfigError::DuplicateProvider(id.to_string()));
                    }
                    ids.push(id);
                }
                ids
            }
            None => ProviderId::all()
                .iter()
                .copied()
                .filter(|id| self.is_provider_usable(*id))
                .collect(),
        };

        if ids.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        Ok(ids)
    }
}

fn validate_weight(provider_id: ProviderId, weight: f64) -> Result<(), ConfigError> {
    if weight.is_finite() && weight > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidWeight {
            provider: provider_id.to_string(),
            weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_enables_only_keyless_providers() {
        let cfg = Config::default();
        assert_eq!(cfg.enabled_provider_ids().unwrap(), vec![ProviderId::OpenMeteo]);
    }

    #[test]
    fn set_api_key_enables_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::Stormglass, "SG_KEY".into());

        assert_eq!(cfg.provider_api_key(ProviderId::Stormglass), Some("SG_KEY"));
        assert!(cfg.is_provider_usable(ProviderId::Stormglass));
        assert_eq!(
            cfg.enabled_provider_ids().unwrap(),
            vec![ProviderId::Stormglass, ProviderId::OpenMeteo]
        );
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "   ".into());
        assert_eq!(cfg.provider_api_key(ProviderId::WeatherApi), None);
        assert!(!cfg.is_provider_usable(ProviderId::WeatherApi));
    }

    #[test]
    fn explicit_enabled_list_is_validated() {
        let mut cfg = Config {
            enabled: Some(vec!["stormglass".into(), "nope".into()]),
            ..Config::default()
        };
        assert_eq!(
            cfg.enabled_provider_ids().unwrap_err(),
            ConfigError::UnknownProvider("nope".into())
        );

        cfg.enabled = Some(vec!["openmeteo".into(), "OpenMeteo".into()]);
        assert_eq!(
            cfg.enabled_provider_ids().unwrap_err(),
            ConfigError::DuplicateProvider("openmeteo".into())
        );

        cfg.enabled = Some(Vec::new());
        assert_eq!(cfg.enabled_provider_ids().unwrap_err(), ConfigError::NoProviders);
    }

    #[test]
    fn weights_default_and_override() {
        let mut cfg = Config::default();
        assert_eq!(cfg.provider_weight(ProviderId::Stormglass).unwrap(), 1.2);

        cfg.set_provider_weight(ProviderId::Stormglass, 2.0).unwrap();
        assert_eq!(cfg.provider_weight(ProviderId::Stormglass).unwrap(), 2.0);

        let err = cfg.set_provider_weight(ProviderId::OpenMeteo, -1.0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWeight { .. }));
    }

    #[test]
    fn env_overrides_keys_and_enabled_list() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::Stormglass, "FROM_FILE".into());

        cfg.apply_env_from(env(&[
            ("STORMGLASS_API_KEY", "FROM_ENV"),
            ("WEATHERAPI_API_KEY", ""),
            ("MARINE_PROVIDERS", "stormglass, openmeteo ,"),
        ]));

        assert_eq!(cfg.provider_api_key(ProviderId::Stormglass), Some("FROM_ENV"));
        assert_eq!(cfg.provider_api_key(ProviderId::WeatherApi), None);
        assert_eq!(
            cfg.enabled_provider_ids().unwrap(),
            vec![ProviderId::Stormglass, ProviderId::OpenMeteo]
        );
    }

    #[test]
    fn keyless_provider_ignores_key_variable() {
        let mut cfg = Config::default();
        cfg.apply_env_from(env(&[("OPENMETEO_API_KEY", "unused")]));
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn zero_timeout_and_horizon_are_rejected() {
        assert!(PipelineConfig::default().validate().is_ok());

        let cfg = Config::from_toml("[pipeline]\ntimeout_secs = 0").unwrap();
        assert_eq!(
            cfg.pipeline.validate().unwrap_err(),
            ConfigError::InvalidPipelineSetting {
                setting: "timeout_secs",
                reason: "must be at least 1 second",
            }
        );

        let pipeline = PipelineConfig {
            horizon_hours: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            pipeline.validate(),
            Err(ConfigError::InvalidPipelineSetting { setting: "horizon_hours", .. })
        ));
    }

    #[test]
    fn parses_toml_with_pipeline_defaults() {
        let cfg = Config::from_toml(
            r#"
            enabled = ["weatherapi"]

            [providers.weatherapi]
            api_key = "WA"
            weight = 0.9

            [pipeline]
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.provider_api_key(ProviderId::WeatherApi), Some("WA"));
        assert_eq!(cfg.provider_weight(ProviderId::WeatherApi).unwrap(), 0.9);

        let policy = cfg.pipeline.retry_policy();
        assert_eq!(policy.timeout, Duration::from_secs(5));
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.retry_delay, Duration::from_secs(1));
        assert_eq!(cfg.pipeline.cache_ttl(), Duration::from_secs(7200));
        assert_eq!(cfg.pipeline.horizon_hours, 72);
    }

    #[test]
    fn toml_roundtrip_keeps_settings() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::Stormglass, "SG".into());
        cfg.set_provider_weight(ProviderId::OpenMeteo, 0.5).unwrap();

        let text = toml::to_string_pretty(&cfg).unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
