//! Concurrent fan-out of one location query to every configured provider.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use crate::{
    ConfigError, ProviderError, ProviderResult, error::ProviderErrorKind,
    provider::MarineProvider,
};

/// Per-provider timeout and retry bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Ceiling for a single attempt.
    pub timeout: Duration,
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Upper bound on how long one provider can take to settle.
    pub fn worst_case(&self) -> Duration {
        self.timeout * (self.max_retries + 1) + self.retry_delay * self.max_retries
    }
}

pub struct Aggregator {
    providers: Vec<Arc<dyn MarineProvider>>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("providers", &self.provider_names())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Aggregator {
    /// Fails when no providers are given or two share a name.
    pub fn new(
        providers: Vec<Arc<dyn MarineProvider>>,
        policy: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.name()) {
                return Err(ConfigError::DuplicateProvider(provider.name().to_string()));
            }
        }

        Ok(Self { providers, policy })
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Query every provider concurrently and wait until all have settled.
    ///
    /// Returns exactly one result per provider, in configuration order.
    /// Dropping the returned future aborts every in-flight provider task.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_all(&self, latitude: f64, longitude: f64) -> Vec<ProviderResult> {
        let mut tasks = JoinSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let policy = self.policy;
            tasks.spawn(
                async move {
                    let result = fetch_with_retry(provider.as_ref(), latitude, longitude, policy).await;
                    (index, result)
                }
                .in_current_span(),
            );
        }

        let mut slots: Vec<Option<ProviderResult>> = self.providers.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => error!(error = %err, "Provider task ended abnormally"),
            }
        }

        let results: Vec<ProviderResult> = slots
            .into_iter()
            .zip(&self.providers)
            .map(|(slot, provider)| {
                slot.unwrap_or_else(|| {
                    ProviderResult::failure(ProviderError::new(
                        provider.name(),
                        ProviderErrorKind::DidNotReport,
                    ))
                })
            })
            .collect();

        info!(
            providers = results.len(),
            succeeded = results.iter().filter(|r| r.is_success()).count(),
            "Aggregation settled"
        );
        results
    }
}

async fn fetch_with_retry(
    provider: &dyn MarineProvider,
    latitude: f64,
    longitude: f64,
    policy: RetryPolicy,
) -> ProviderResult {
    let name = provider.name();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(
            policy.timeout,
            provider.fetch_forecast(latitude, longitude),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::new(name, ProviderErrorKind::Timeout(policy.timeout))),
        };

        match outcome {
            Ok(samples) => {
                debug!(provider = name, attempt, samples = samples.len(), "Provider fetch succeeded");
                return ProviderResult::success(name, samples).with_attempts(attempt);
            }
            Err(err) if attempt > policy.max_retries => {
                warn!(provider = name, attempts = attempt, error = %err, "Provider failed, dropping");
                return ProviderResult::failure(err).with_attempts(attempt);
            }
            Err(err) => {
                warn!(
                    provider = name,
                    attempt,
                    max_retries = policy.max_retries,
                    error = %err,
                    "Provider fetch failed, retrying"
                );
                tokio::time::sleep(policy.retry_delay).await;
            }
        }
    }
}
