use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TideType {
    High,
    Low,
    Rising,
    Falling,
}

impl TideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TideType::High => "high",
            TideType::Low => "low",
            TideType::Rising => "rising",
            TideType::Falling => "falling",
        }
    }
}

impl std::fmt::Display for TideType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wave height as a provider reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaveHeight {
    Single(f64),
    Band { min: f64, max: f64 },
}

impl WaveHeight {
    /// Point value used when reconciling providers. Bands collapse to their midpoint.
    pub fn representative(&self) -> f64 {
        match *self {
            WaveHeight::Single(value) => value,
            WaveHeight::Band { min, max } => (min + max) / 2.0,
        }
    }
}

/// One provider's reading at one instant, already in canonical units
/// (meters, seconds, degrees, knots, °C).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    pub wave_height: Option<WaveHeight>,
    pub wave_period_s: Option<f64>,
    pub wave_direction_deg: Option<f64>,
    pub wind_speed_kn: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub wind_gust_kn: Option<f64>,
    /// Set when `wind_gust_kn` was derived from wind speed rather than read.
    pub wind_gust_estimated: bool,
    pub tide_height_m: Option<f64>,
    pub tide_type: Option<TideType>,
    pub water_temperature_c: Option<f64>,
}

impl RawSample {
    /// An empty sample at `timestamp`; every field absent.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            wave_height: None,
            wave_period_s: None,
            wave_direction_deg: None,
            wind_speed_kn: None,
            wind_direction_deg: None,
            wind_gust_kn: None,
            wind_gust_estimated: false,
            tide_height_m: None,
            tide_type: None,
            water_temperature_c: None,
        }
    }

    /// True when no measurement at all is populated.
    pub fn is_blank(&self) -> bool {
        self.wave_height.is_none()
            && self.wave_period_s.is_none()
            && self.wave_direction_deg.is_none()
            && self.wind_speed_kn.is_none()
            && self.wind_direction_deg.is_none()
            && self.wind_gust_kn.is_none()
            && self.tide_height_m.is_none()
            && self.tide_type.is_none()
            && self.water_temperature_c.is_none()
    }
}

/// One reconciled instant produced by the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSample {
    pub timestamp: DateTime<Utc>,
    pub wave_height_min_m: Option<f64>,
    pub wave_height_max_m: Option<f64>,
    pub wave_period_s: Option<f64>,
    pub wave_direction_deg: Option<f64>,
    pub wind_speed_kn: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub wind_gust_kn: Option<f64>,
    pub tide_height_m: Option<f64>,
    pub tide_type: Option<TideType>,
    pub water_temperature_c: Option<f64>,
    /// Providers that contributed at least one field, sorted by name.
    pub sources: Vec<String>,
}

impl ForecastSample {
    /// Storage row for this sample, keyed by `(spot_id, timestamp)`.
    pub fn to_row(&self, spot_id: &str) -> ForecastRow {
        ForecastRow {
            spot_id: spot_id.to_string(),
            timestamp: self.timestamp,
            wave_height_min: self.wave_height_min_m,
            wave_height_max: self.wave_height_max_m,
            wave_period: self.wave_period_s,
            wave_direction: self.wave_direction_deg,
            wind_speed: self.wind_speed_kn,
            wind_direction: self.wind_direction_deg,
            wind_gust: self.wind_gust_kn,
            tide_height: self.tide_height_m,
            tide_type: self.tide_type,
            water_temperature: self.water_temperature_c,
        }
    }
}

/// Row shape handed to the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub spot_id: String,
    pub timestamp: DateTime<Utc>,
    pub wave_height_min: Option<f64>,
    pub wave_height_max: Option<f64>,
    pub wave_period: Option<f64>,
    pub wave_direction: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub wind_gust: Option<f64>,
    pub tide_height: Option<f64>,
    pub tide_type: Option<TideType>,
    pub water_temperature: Option<f64>,
}

/// Outcome of querying one provider for one location.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider: String,
    pub outcome: Result<Vec<RawSample>, ProviderError>,
    /// Number of attempts made, including the first.
    pub attempts: u32,
}

impl ProviderResult {
    pub fn success(provider: impl Into<String>, samples: Vec<RawSample>) -> Self {
        Self {
            provider: provider.into(),
            outcome: Ok(samples),
            attempts: 1,
        }
    }

    pub fn failure(error: ProviderError) -> Self {
        Self {
            provider: error.provider.clone(),
            outcome: Err(error),
            attempts: 1,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A provider excluded from a merge, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedProvider {
    pub name: String,
    pub reason: String,
}

/// Merged forecast series plus provenance about providers that did not contribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedForecast {
    pub samples: Vec<ForecastSample>,
    pub dropped_providers: Vec<DroppedProvider>,
}

impl MergedForecast {
    pub fn is_partial(&self) -> bool {
        !self.dropped_providers.is_empty()
    }

    pub fn rows(&self, spot_id: &str) -> Vec<ForecastRow> {
        self.samples.iter().map(|s| s.to_row(spot_id)).collect()
    }
}
