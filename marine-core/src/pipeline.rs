use tracing::{info, warn};

use crate::{
    Config, ConfigError, MergedForecast, PipelineError,
    aggregator::Aggregator,
    merger::Merger,
    provider::provider_from_config,
};

/// Fan-out, normalize and merge for one location at a time.
#[derive(Debug)]
pub struct ForecastPipeline {
    aggregator: Aggregator,
    merger: Merger,
}

impl ForecastPipeline {
    pub fn new(aggregator: Aggregator, merger: Merger) -> Self {
        Self { aggregator, merger }
    }

    /// Build every enabled provider with its weight and cache.
    ///
    /// Missing credentials, unknown names and an empty provider set are
    /// reported here rather than on the first fetch.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.pipeline.validate()?;
        let ids = config.enabled_provider_ids()?;

        let mut providers = Vec::with_capacity(ids.len());
        let mut weights = Vec::with_capacity(ids.len());
        for id in ids {
            providers.push(provider_from_config(id, config)?);
            weights.push((id.as_str(), config.provider_weight(id)?));
        }

        let aggregator = Aggregator::new(providers, config.pipeline.retry_policy())?;
        info!(providers = ?aggregator.provider_names(), "Forecast pipeline ready");

        Ok(Self::new(aggregator, Merger::with_weights(weights)))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.aggregator.provider_names()
    }

    /// Query all providers for one location and merge what they return.
    ///
    /// Partial failures are reported in `dropped_providers`; only a run in
    /// which every provider failed is an error. Dropping the future cancels
    /// outstanding provider requests.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_and_merge(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<MergedForecast, PipelineError> {
        let results = self.aggregator.fetch_all(latitude, longitude).await;
        let merged = self.merger.merge(&results);

        if !results.iter().any(|r| r.is_success()) {
            warn!(dropped = merged.dropped_providers.len(), "Every provider failed");
            return Err(PipelineError::AllProvidersFailed {
                dropped: merged.dropped_providers,
            });
        }

        info!(
            samples = merged.samples.len(),
            dropped = merged.dropped_providers.len(),
            "Forecast merged"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ProviderError, RawSample,
        aggregator::RetryPolicy,
        error::ProviderErrorKind,
        model::WaveHeight,
        provider::{MarineProvider, ProviderId},
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::{sync::Arc, time::Duration};

    #[derive(Debug)]
    struct Fixed {
        name: &'static str,
        samples: Option<Vec<RawSample>>,
        delay: Duration,
    }

    #[async_trait]
    impl MarineProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_forecast(&self, _: f64, _: f64) -> Result<Vec<RawSample>, ProviderError> {
            tokio::time::sleep(self.delay).await;
            self.samples.clone().ok_or_else(|| {
                ProviderError::new(
                    self.name,
                    ProviderErrorKind::Status {
                        status: 500,
                        message: "boom".into(),
                    },
                )
            })
        }
    }

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 4, 12, 0, 0).unwrap()
    }

    fn wave(height: f64) -> Vec<RawSample> {
        vec![RawSample {
            wave_height: Some(WaveHeight::Single(height)),
            ..RawSample::at(t())
        }]
    }

    fn pipeline(providers: Vec<Fixed>, weights: &[(&str, f64)]) -> ForecastPipeline {
        let providers = providers
            .into_iter()
            .map(|p| Arc::new(p) as Arc<dyn MarineProvider>)
            .collect();
        let aggregator = Aggregator::new(providers, RetryPolicy::default()).unwrap();
        ForecastPipeline::new(aggregator, Merger::with_weights(weights.iter().copied()))
    }

    fn fixed(name: &'static str, samples: Option<Vec<RawSample>>) -> Fixed {
        Fixed {
            name,
            samples,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_weighted_merge() {
        let p = pipeline(
            vec![fixed("a", Some(wave(1.5))), fixed("b", Some(wave(1.8)))],
            &[("a", 1.2), ("b", 1.0)],
        );

        let merged = p.fetch_and_merge(43.5, -1.5).await.unwrap();

        assert_eq!(merged.samples.len(), 1);
        let s = &merged.samples[0];
        assert_eq!(s.timestamp, t());
        assert!((s.wave_height_min_m.unwrap() - 1.473).abs() < 1e-3);
        assert!((s.wave_height_max_m.unwrap() - 1.800).abs() < 1e-3);
        assert!(merged.dropped_providers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_is_metadata() {
        let p = pipeline(
            vec![fixed("a", Some(wave(2.0))), fixed("broken", None)],
            &[("a", 1.2)],
        );

        let merged = p.fetch_and_merge(0.0, 0.0).await.unwrap();

        assert_eq!(merged.samples.len(), 1);
        assert!((merged.samples[0].wave_height_max_m.unwrap() - 2.2).abs() < 1e-9);
        assert_eq!(merged.dropped_providers.len(), 1);
        assert_eq!(merged.dropped_providers[0].name, "broken");
        assert!(merged.dropped_providers[0].reason.contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_is_a_distinct_error() {
        let p = pipeline(vec![fixed("a", None), fixed("b", None)], &[]);

        match p.fetch_and_merge(0.0, 0.0).await {
            Err(PipelineError::AllProvidersFailed { dropped }) => {
                let names: Vec<_> = dropped.iter().map(|d| d.name.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("expected total failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_when_one_provider_never_answers() {
        let hung = Fixed {
            name: "hung",
            samples: Some(wave(9.0)),
            delay: Duration::from_secs(24 * 3600),
        };
        let p = pipeline(vec![hung, fixed("a", Some(wave(1.0)))], &[]);

        let started = tokio::time::Instant::now();
        let merged = p.fetch_and_merge(0.0, 0.0).await.unwrap();

        assert!(started.elapsed() <= RetryPolicy::default().worst_case());
        assert_eq!(merged.samples[0].sources, vec!["a".to_string()]);
        assert_eq!(merged.dropped_providers[0].name, "hung");
    }

    #[test]
    fn from_config_reports_missing_credentials() {
        let cfg = Config {
            enabled: Some(vec!["stormglass".into(), "openmeteo".into()]),
            ..Config::default()
        };
        let err = ForecastPipeline::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { ref provider, .. } if provider == "stormglass"));
    }

    #[test]
    fn from_config_builds_configured_providers() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "KEY".into());

        let p = ForecastPipeline::from_config(&cfg).unwrap();
        assert_eq!(p.provider_names(), vec!["weatherapi", "openmeteo"]);
    }

    #[test]
    fn from_config_rejects_zero_timeout() {
        let mut cfg = Config::default();
        cfg.pipeline.timeout_secs = 0;

        let err = ForecastPipeline::from_config(&cfg).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPipelineSetting { setting: "timeout_secs", .. }
        ));
    }
}
