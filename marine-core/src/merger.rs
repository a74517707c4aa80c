//! Confidence-weighted reconciliation of provider samples.
//!
//! Samples are bucketed by exact UTC timestamp. Every field is merged
//! independently across the providers that supplied it; a field no provider
//! supplied stays `None`. Output order is ascending by timestamp.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::{
    DroppedProvider, ForecastSample, MergedForecast, ProviderResult, RawSample, TideType,
};

/// Weight for providers without a configured one.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Relative spread applied around the merged wave height to form its band.
pub const WAVE_SPREAD: f64 = 0.10;

#[derive(Debug, Clone, Default)]
pub struct Merger {
    weights: HashMap<String, f64>,
}

struct Contribution<'a> {
    provider: &'a str,
    weight: f64,
    sample: &'a RawSample,
}

impl Merger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-finite or non-positive weights are ignored.
    pub fn with_weights<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let weights = weights
            .into_iter()
            .map(|(name, weight)| (name.into(), weight))
            .filter(|(name, weight)| {
                let valid = weight.is_finite() && *weight > 0.0;
                if !valid {
                    warn!(provider = %name, weight, "Ignoring invalid provider weight");
                }
                valid
            })
            .collect();
        Self { weights }
    }

    pub fn weight_of(&self, provider: &str) -> f64 {
        self.weights.get(provider).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Reconcile provider results into one sample per timestamp.
    ///
    /// Failed results are reported in `dropped_providers`. An input with no
    /// surviving samples yields an empty series, not an error.
    pub fn merge(&self, results: &[ProviderResult]) -> MergedForecast {
        let mut dropped = Vec::new();
        let mut buckets: BTreeMap<DateTime<Utc>, Vec<Contribution<'_>>> = BTreeMap::new();

        for result in results {
            let samples = match &result.outcome {
                Ok(samples) => samples,
                Err(err) => {
                    warn!(provider = %result.provider, error = %err.kind, "Dropping provider from merge");
                    dropped.push(DroppedProvider {
                        name: result.provider.clone(),
                        reason: err.kind.to_string(),
                    });
                    continue;
                }
            };

            let weight = self.weight_of(&result.provider);
            for sample in samples {
                let bucket = buckets.entry(sample.timestamp).or_default();
                if bucket.iter().any(|c| c.provider == result.provider) {
                    debug!(provider = %result.provider, timestamp = %sample.timestamp, "Ignoring duplicate timestamp");
                    continue;
                }
                bucket.push(Contribution {
                    provider: &result.provider,
                    weight,
                    sample,
                });
            }
        }

        let samples = buckets
            .into_iter()
            .map(|(timestamp, mut bucket)| {
                // Summation order must not depend on task completion order.
                bucket.sort_by(|a, b| a.provider.cmp(b.provider));
                merge_bucket(timestamp, &bucket)
            })
            .collect();

        MergedForecast {
            samples,
            dropped_providers: dropped,
        }
    }
}

fn merge_bucket(timestamp: DateTime<Utc>, bucket: &[Contribution<'_>]) -> ForecastSample {
    let scalar = |field: fn(&RawSample) -> Option<f64>| {
        weighted_mean(bucket.iter().filter_map(|c| field(c.sample).map(|v| (v, c.weight))))
    };
    let angle = |field: fn(&RawSample) -> Option<f64>| {
        weighted_circular_mean(bucket.iter().filter_map(|c| field(c.sample).map(|v| (v, c.weight))))
    };

    let wave = weighted_mean(bucket.iter().filter_map(|c| {
        c.sample
            .wave_height
            .map(|w| (w.representative(), c.weight))
    }));
    let (wave_height_min_m, wave_height_max_m) = wave.map(wave_band).unzip();

    // Estimated gusts only count when no provider reported a real one.
    let has_direct_gust = bucket
        .iter()
        .any(|c| c.sample.wind_gust_kn.is_some() && !c.sample.wind_gust_estimated);
    let wind_gust_kn = weighted_mean(bucket.iter().filter_map(|c| {
        let usable = !has_direct_gust || !c.sample.wind_gust_estimated;
        c.sample
            .wind_gust_kn
            .filter(|_| usable)
            .map(|v| (v, c.weight))
    }));

    let mut sources: Vec<String> = bucket
        .iter()
        .filter(|c| !c.sample.is_blank())
        .map(|c| c.provider.to_string())
        .collect();
    sources.dedup();

    ForecastSample {
        timestamp,
        wave_height_min_m,
        wave_height_max_m,
        wave_period_s: scalar(|s| s.wave_period_s),
        wave_direction_deg: angle(|s| s.wave_direction_deg),
        wind_speed_kn: scalar(|s| s.wind_speed_kn),
        wind_direction_deg: angle(|s| s.wind_direction_deg),
        wind_gust_kn,
        tide_height_m: scalar(|s| s.tide_height_m),
        tide_type: heaviest_tide_type(bucket),
        water_temperature_c: scalar(|s| s.water_temperature_c),
        sources,
    }
}

/// Band around a merged point value; the lower edge never goes below zero.
pub fn wave_band(point: f64) -> (f64, f64) {
    (
        (point * (1.0 - WAVE_SPREAD)).max(0.0),
        point * (1.0 + WAVE_SPREAD),
    )
}

/// `Σ(v·w) / Σw`. A single value is returned as-is.
pub fn weighted_mean(values: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let values: Vec<(f64, f64)> = values.into_iter().filter(|(v, _)| v.is_finite()).collect();
    match values.as_slice() {
        [] => None,
        [(value, _)] => Some(*value),
        _ => {
            let total: f64 = values.iter().map(|(_, w)| w).sum();
            let sum: f64 = values.iter().map(|(v, w)| v * w).sum();
            Some(sum / total)
        }
    }
}

/// Weighted mean of compass bearings in degrees, result in `[0, 360)`.
///
/// Each bearing is first unwrapped to within 180° of the heaviest
/// contributor's bearing, so 350° and 10° meet at 0°, not 180°, and
/// bearings that do not straddle north average exactly like
/// [`weighted_mean`].
pub fn weighted_circular_mean(values: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let values: Vec<(f64, f64)> = values.into_iter().filter(|(v, _)| v.is_finite()).collect();
    let reference = values
        .iter()
        .fold(None, |best: Option<(f64, f64)>, &(deg, w)| match best {
            Some((_, best_weight)) if best_weight >= w => best,
            _ => Some((deg, w)),
        })
        .map(|(deg, _)| deg)?;

    let unwrapped = values.into_iter().map(|(deg, w)| {
        let offset = (deg - reference + 180.0).rem_euclid(360.0) - 180.0;
        (reference + offset, w)
    });
    weighted_mean(unwrapped).map(|v| v.rem_euclid(360.0))
}

/// Tide type is categorical: take the highest-weight provider's value,
/// the first by name on ties. `bucket` is sorted by provider name.
fn heaviest_tide_type(bucket: &[Contribution<'_>]) -> Option<TideType> {
    bucket
        .iter()
        .filter_map(|c| c.sample.tide_type.map(|t| (t, c.weight)))
        .fold(None, |best: Option<(TideType, f64)>, (tide, weight)| match best {
            Some((_, best_weight)) if best_weight >= weight => best,
            _ => Some((tide, weight)),
        })
        .map(|(tide, _)| tide)
}
