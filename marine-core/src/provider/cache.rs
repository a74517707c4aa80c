//! Time-bounded response cache wrapped around a single adapter.
//!
//! Each adapter owns its cache; nothing is shared across adapters or with
//! the aggregator. An entry is written only once the wrapped fetch has
//! completed, so a fetch cancelled mid-flight leaves the cache untouched.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

use crate::{ProviderError, RawSample};

use super::MarineProvider;

/// Coordinates rounded to 1e-4 degrees (about 11 m).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    lat_e4: i64,
    lon_e4: i64,
}

impl CacheKey {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            lat_e4: (latitude * 1e4).round() as i64,
            lon_e4: (longitude * 1e4).round() as i64,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    samples: Vec<RawSample>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct CachedProvider<P> {
    inner: P,
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl<P: MarineProvider> CachedProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn lookup(&self, key: CacheKey) -> Option<Vec<RawSample>> {
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.samples.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    async fn store(&self, key: CacheKey, samples: Vec<RawSample>) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            CacheEntry {
                samples,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn invalidate(&self, key: CacheKey) {
        self.entries.lock().await.remove(&key);
    }
}

#[async_trait]
impl<P: MarineProvider> MarineProvider for CachedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<RawSample>, ProviderError> {
        let key = CacheKey::new(latitude, longitude);

        if let Some(samples) = self.lookup(key).await {
            debug!(provider = self.name(), "Serving forecast from cache");
            return Ok(samples);
        }

        match self.inner.fetch_forecast(latitude, longitude).await {
            Ok(samples) => {
                self.store(key, samples.clone()).await;
                Ok(samples)
            }
            Err(err) => {
                self.invalidate(key).await;
                Err(err)
            }
        }
    }
}
