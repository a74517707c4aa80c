use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{ProviderError, ProviderErrorKind},
    model::{RawSample, WaveHeight},
    normalize::{apply_tide_types, parse_utc},
};

use super::{MarineProvider, fetch_body, parse_json};

const NAME: &str = "openmeteo";
const MARINE_URL: &str = "https://marine-api.open-meteo.com/v1/marine";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const MARINE_VARS: &str =
    "wave_height,wave_period,wave_direction,sea_surface_temperature,sea_level_height_msl";
const WIND_VARS: &str = "wind_speed_10m,wind_direction_10m,wind_gusts_10m";

/// Keyless Open-Meteo adapter. Waves, sea temperature and sea level come
/// from the marine API; wind comes from the general forecast API.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
    horizon_hours: u32,
}

impl Default for OpenMeteoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenMeteoProvider {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            horizon_hours: 72,
        }
    }

    pub fn with_horizon(mut self, hours: u32) -> Self {
        self.horizon_hours = hours;
        self
    }

    async fn fetch_hourly(
        &self,
        url: &str,
        latitude: f64,
        longitude: f64,
        vars: &str,
        extra: &[(&str, &str)],
    ) -> Result<Value, ProviderError> {
        let horizon = self.horizon_hours.to_string();
        let request = self
            .http
            .get(url)
            .query(&[
                ("latitude", latitude.to_string().as_str()),
                ("longitude", longitude.to_string().as_str()),
                ("hourly", vars),
                ("timezone", "GMT"),
                ("forecast_hours", horizon.as_str()),
            ])
            .query(extra);

        let body = fetch_body(NAME, request).await?;
        parse_json(NAME, &body)
    }
}

#[async_trait]
impl MarineProvider for OpenMeteoProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<RawSample>, ProviderError> {
        let (marine, wind) = tokio::join!(
            self.fetch_hourly(MARINE_URL, latitude, longitude, MARINE_VARS, &[]),
            self.fetch_hourly(
                FORECAST_URL,
                latitude,
                longitude,
                WIND_VARS,
                &[("wind_speed_unit", "kn")],
            ),
        );

        let marine = marine?;
        let wind = match wind {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(error = %err, "Open-Meteo wind request failed; continuing with marine data only");
                None
            }
        };

        let samples =
            normalize(&marine, wind.as_ref()).map_err(|kind| ProviderError::new(NAME, kind))?;
        debug!(samples = samples.len(), "Open-Meteo forecast normalized");
        Ok(samples)
    }
}

#[derive(Debug, Deserialize)]
struct MarineHourly {
    time: Vec<Option<String>>,
    #[serde(default)]
    wave_height: Vec<Option<f64>>,
    #[serde(default)]
    wave_period: Vec<Option<f64>>,
    #[serde(default)]
    wave_direction: Vec<Option<f64>>,
    #[serde(default)]
    sea_surface_temperature: Vec<Option<f64>>,
    #[serde(default)]
    sea_level_height_msl: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct WindHourly {
    time: Vec<Option<String>>,
    #[serde(default, rename = "wind_speed_10m")]
    wind_speed: Vec<Option<f64>>,
    #[serde(default, rename = "wind_direction_10m")]
    wind_direction: Vec<Option<f64>>,
    #[serde(default, rename = "wind_gusts_10m")]
    wind_gusts: Vec<Option<f64>>,
}

/// Column value at `i`, treating short or null columns as absent.
fn column(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten().filter(|v| v.is_finite())
}

/// Parsed time axis; `None` entries mark indices to skip.
fn time_axis(times: &[Option<String>]) -> Vec<Option<DateTime<Utc>>> {
    times
        .iter()
        .map(|t| t.as_deref().and_then(parse_utc))
        .collect()
}

fn hourly<'de, T: Deserialize<'de>>(
    payload: &'de Value,
    what: &str,
) -> Result<T, ProviderErrorKind> {
    let hourly = payload
        .get("hourly")
        .ok_or_else(|| ProviderErrorKind::Malformed(format!("{what} response has no `hourly` block")))?;
    T::deserialize(hourly)
        .map_err(|e| ProviderErrorKind::Malformed(format!("{what} hourly block: {e}")))
}

/// Join Open-Meteo marine and wind payloads into samples.
///
/// Wind speed is requested in knots, so no conversion is applied. The marine
/// payload is required; wind only enriches it. Tide state is derived from
/// the sea-level series.
pub fn normalize(marine: &Value, wind: Option<&Value>) -> Result<Vec<RawSample>, ProviderErrorKind> {
    let marine: MarineHourly = hourly(marine, "marine")?;

    let mut by_time: BTreeMap<DateTime<Utc>, RawSample> = BTreeMap::new();
    for (i, timestamp) in time_axis(&marine.time).into_iter().enumerate() {
        let Some(timestamp) = timestamp else {
            debug!(index = i, "Skipping Open-Meteo marine entry without a valid time");
            continue;
        };
        by_time.entry(timestamp).or_insert_with(|| RawSample {
            wave_height: column(&marine.wave_height, i).map(WaveHeight::Single),
            wave_period_s: column(&marine.wave_period, i),
            wave_direction_deg: column(&marine.wave_direction, i),
            water_temperature_c: column(&marine.sea_surface_temperature, i),
            tide_height_m: column(&marine.sea_level_height_msl, i),
            ..RawSample::at(timestamp)
        });
    }

    if let Some(wind) = wind {
        match hourly::<WindHourly>(wind, "wind") {
            Ok(wind) => {
                for (i, timestamp) in time_axis(&wind.time).into_iter().enumerate() {
                    let Some(timestamp) = timestamp else { continue };
                    let Some(sample) = by_time.get_mut(&timestamp) else {
                        continue;
                    };
                    sample.wind_speed_kn = column(&wind.wind_speed, i);
                    sample.wind_direction_deg = column(&wind.wind_direction, i);
                    sample.wind_gust_kn = column(&wind.wind_gusts, i);
                }
            }
            Err(err) => warn!(error = %err, "Ignoring unusable Open-Meteo wind payload"),
        }
    }

    let mut samples: Vec<RawSample> = by_time.into_values().filter(|s| !s.is_blank()).collect();
    apply_tide_types(&mut samples);

    if samples.is_empty() {
        return Err(ProviderErrorKind::Empty);
    }
    Ok(samples)
}
