use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{
    error::{ProviderError, ProviderErrorKind},
    model::{RawSample, WaveHeight},
    normalize::{kph_to_knots, unix_to_utc},
};

use super::{MarineProvider, fetch_body, parse_json};

const NAME: &str = "weatherapi";
const MARINE_URL: &str = "https://api.weatherapi.com/v1/marine.json";
const MAX_DAYS: u32 = 7;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    http: Client,
    horizon_hours: u32,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http: Client::new(),
            horizon_hours: 72,
        }
    }

    pub fn with_horizon(mut self, hours: u32) -> Self {
        self.horizon_hours = hours;
        self
    }

    /// Forecast days needed to cover the horizon; day one is today.
    fn days(&self) -> u32 {
        (self.horizon_hours.div_ceil(24) + 1).clamp(1, MAX_DAYS)
    }
}

#[async_trait]
impl MarineProvider for WeatherApiProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<RawSample>, ProviderError> {
        let location = format!("{latitude},{longitude}");
        let days = self.days().to_string();

        let request = self.http.get(MARINE_URL).query(&[
            ("key", self.api_key.as_str()),
            ("q", location.as_str()),
            ("days", days.as_str()),
        ]);

        let body = fetch_body(NAME, request).await?;
        let payload = parse_json(NAME, &body)?;

        let now = Utc::now();
        let window = (now - Duration::hours(1), now + Duration::hours(i64::from(self.horizon_hours)));
        let samples = normalize(&payload, Some(window)).map_err(|kind| ProviderError::new(NAME, kind))?;
        debug!(samples = samples.len(), "WeatherAPI forecast normalized");
        Ok(samples)
    }
}

#[derive(Debug, Deserialize)]
struct WaHour {
    time_epoch: Option<i64>,
    wind_kph: Option<f64>,
    wind_degree: Option<f64>,
    gust_kph: Option<f64>,
    sig_ht_mt: Option<f64>,
    swell_ht_mt: Option<f64>,
    swell_period_secs: Option<f64>,
    swell_dir: Option<f64>,
    water_temp_c: Option<f64>,
}

impl WaHour {
    fn into_sample(self, timestamp: DateTime<Utc>) -> RawSample {
        // Significant wave height is the representative value; swell height
        // only stands in when it is missing.
        let wave = self.sig_ht_mt.or(self.swell_ht_mt).filter(|h| h.is_finite());

        RawSample {
            wave_height: wave.map(WaveHeight::Single),
            wave_period_s: self.swell_period_secs,
            wave_direction_deg: self.swell_dir,
            wind_speed_kn: self.wind_kph.map(kph_to_knots),
            wind_direction_deg: self.wind_degree,
            wind_gust_kn: self.gust_kph.map(kph_to_knots),
            water_temperature_c: self.water_temp_c,
            ..RawSample::at(timestamp)
        }
    }
}

/// Convert a WeatherAPI `marine.json` payload into samples.
///
/// Hours outside `window` (inclusive) are dropped. Entries without a
/// `time_epoch` are skipped; a payload without `forecast.forecastday` is
/// malformed.
pub fn normalize(
    payload: &Value,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Result<Vec<RawSample>, ProviderErrorKind> {
    let days = payload
        .pointer("/forecast/forecastday")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ProviderErrorKind::Malformed("response has no `forecast.forecastday` array".into())
        })?;

    let mut by_time: BTreeMap<DateTime<Utc>, RawSample> = BTreeMap::new();
    let hours = days
        .iter()
        .filter_map(|day| day.get("hour").and_then(Value::as_array))
        .flatten();

    for entry in hours {
        let hour = match WaHour::deserialize(entry) {
            Ok(hour) => hour,
            Err(err) => {
                debug!(error = %err, "Skipping malformed WeatherAPI entry");
                continue;
            }
        };
        let Some(timestamp) = hour.time_epoch.and_then(unix_to_utc) else {
            debug!("Skipping WeatherAPI entry without a valid time_epoch");
            continue;
        };
        if let Some((start, end)) = window {
            if timestamp < start || timestamp > end {
                continue;
            }
        }
        by_time.entry(timestamp).or_insert_with(|| hour.into_sample(timestamp));
    }

    let samples: Vec<RawSample> = by_time.into_values().filter(|s| !s.is_blank()).collect();
    if samples.is_empty() {
        return Err(ProviderErrorKind::Empty);
    }
    Ok(samples)
}
