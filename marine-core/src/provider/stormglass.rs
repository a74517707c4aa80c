use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{ProviderError, ProviderErrorKind},
    model::{RawSample, TideType, WaveHeight},
    normalize::{derive_tide_types, estimate_gust, first_by_preference, mps_to_knots, parse_utc},
};

use super::{MarineProvider, fetch_body, parse_json};

const NAME: &str = "stormglass";
const WEATHER_URL: &str = "https://api.stormglass.io/v2/weather/point";
const SEA_LEVEL_URL: &str = "https://api.stormglass.io/v2/tide/sea-level/point";
const PARAMS: &str =
    "waveHeight,wavePeriod,waveDirection,windSpeed,windDirection,gust,waterTemperature";

/// Stormglass' own model first, then partner sources.
const SOURCE_PREFERENCE: &[&str] = &["sg", "noaa", "icon", "dwd", "meteo"];

#[derive(Debug, Clone)]
pub struct StormglassProvider {
    api_key: String,
    http: Client,
    horizon_hours: u32,
}

impl StormglassProvider {
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

    async fn fetch_payload(
        &self,
        url: &str,
        latitude: f64,
        longitude: f64,
        window: (DateTime<Utc>, DateTime<Utc>),
        params: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let mut query = vec![
            ("lat", latitude.to_string()),
            ("lng", longitude.to_string()),
            ("start", window.0.timestamp().to_string()),
            ("end", window.1.timestamp().to_string()),
        ];
        if let Some(params) = params {
            query.push(("params", params.to_string()));
        }

        let request = self
            .http
            .get(url)
            .header("Authorization", self.api_key.as_str())
            .query(&query);

        let body = fetch_body(NAME, request).await?;
        parse_json(NAME, &body)
    }
}

#[async_trait]
impl MarineProvider for StormglassProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<RawSample>, ProviderError> {
        let start = Utc::now();
        let window = (start, start + Duration::hours(i64::from(self.horizon_hours)));

        let (weather, sea_level) = tokio::join!(
            self.fetch_payload(WEATHER_URL, latitude, longitude, window, Some(PARAMS)),
            self.fetch_payload(SEA_LEVEL_URL, latitude, longitude, window, None),
        );

        let weather = weather?;
        let sea_level = match sea_level {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(error = %err, "Stormglass sea-level request failed; continuing without tide");
                None
            }
        };

        let samples =
            normalize(&weather, sea_level.as_ref()).map_err(|kind| ProviderError::new(NAME, kind))?;
        debug!(samples = samples.len(), "Stormglass forecast normalized");
        Ok(samples)
    }
}

type Sources = BTreeMap<String, Option<f64>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SgHour {
    time: Option<String>,
    #[serde(default)]
    wave_height: Sources,
    #[serde(default)]
    wave_period: Sources,
    #[serde(default)]
    wave_direction: Sources,
    #[serde(default)]
    wind_speed: Sources,
    #[serde(default)]
    wind_direction: Sources,
    #[serde(default)]
    gust: Sources,
    #[serde(default)]
    water_temperature: Sources,
}

#[derive(Debug, Deserialize)]
struct SgSeaLevel {
    time: Option<String>,
    #[serde(flatten)]
    sources: Sources,
}

impl SgHour {
    fn into_sample(self, timestamp: DateTime<Utc>) -> RawSample {
        let pick = |sources: &Sources| first_by_preference(sources, SOURCE_PREFERENCE);

        // Stormglass reports wind and gust in m/s.
        let wind_speed_kn = pick(&self.wind_speed).map(mps_to_knots);
        let (wind_gust_kn, wind_gust_estimated) =
            match (pick(&self.gust).map(mps_to_knots), wind_speed_kn) {
                (Some(gust), _) => (Some(gust), false),
                (None, Some(speed)) => (Some(estimate_gust(speed)), true),
                (None, None) => (None, false),
            };

        RawSample {
            wave_height: pick(&self.wave_height).map(WaveHeight::Single),
            wave_period_s: pick(&self.wave_period),
            wave_direction_deg: pick(&self.wave_direction),
            wind_speed_kn,
            wind_direction_deg: pick(&self.wind_direction),
            wind_gust_kn,
            wind_gust_estimated,
            water_temperature_c: pick(&self.water_temperature),
            ..RawSample::at(timestamp)
        }
    }
}

/// Convert Stormglass weather (and optional sea-level) payloads into samples.
///
/// Entries without a parseable `time` are skipped; a payload without an
/// `hours` array is malformed.
pub fn normalize(
    weather: &Value,
    sea_level: Option<&Value>,
) -> Result<Vec<RawSample>, ProviderErrorKind> {
    let hours = weather
        .get("hours")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderErrorKind::Malformed("response has no `hours` array".into()))?;

    let tide = sea_level.map(tide_series).unwrap_or_default();

    let mut by_time: BTreeMap<DateTime<Utc>, RawSample> = BTreeMap::new();
    for entry in hours {
        let hour = match SgHour::deserialize(entry) {
            Ok(hour) => hour,
            Err(err) => {
                debug!(error = %err, "Skipping malformed Stormglass entry");
                continue;
            }
        };
        let Some(timestamp) = hour.time.as_deref().and_then(parse_utc) else {
            debug!("Skipping Stormglass entry without a valid time");
            continue;
        };

        let mut sample = hour.into_sample(timestamp);
        if let Some((height, tide_type)) = tide.get(&timestamp) {
            sample.tide_height_m = Some(*height);
            sample.tide_type = *tide_type;
        }
        by_time.entry(timestamp).or_insert(sample);
    }

    let samples: Vec<RawSample> = by_time.into_values().filter(|s| !s.is_blank()).collect();
    if samples.is_empty() {
        return Err(ProviderErrorKind::Empty);
    }
    Ok(samples)
}

/// Sea level per timestamp, with the tide state derived from the series.
fn tide_series(payload: &Value) -> BTreeMap<DateTime<Utc>, (f64, Option<TideType>)> {
    let levels: BTreeMap<DateTime<Utc>, f64> = payload
        .get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| SgSeaLevel::deserialize(entry).ok())
        .filter_map(|entry| {
            let timestamp = entry.time.as_deref().and_then(parse_utc)?;
            let height = first_by_preference(&entry.sources, SOURCE_PREFERENCE)?;
            Some((timestamp, height))
        })
        .collect();

    let heights: Vec<f64> = levels.values().copied().collect();
    levels
        .into_iter()
        .zip(derive_tide_types(&heights))
        .map(|((timestamp, height), tide_type)| (timestamp, (height, tide_type)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 4, hour, 0, 0).unwrap()
    }

    #[test]
    fn prefers_sg_source_and_converts_wind_to_knots() {
        let payload = json!({
            "hours": [{
                "time": "2025-10-04T12:00:00+00:00",
                "waveHeight": { "noaa": 1.1, "sg": 1.5 },
                "wavePeriod": { "sg": 10.2 },
                "waveDirection": { "sg": 180.0 },
                "windSpeed": { "sg": 5.0 },
                "windDirection": { "sg": 270.0 },
                "gust": { "sg": 8.0 },
                "waterTemperature": { "sg": 18.5 }
            }],
            "meta": { "cost": 1, "dailyQuota": 10 }
        });

        let samples = normalize(&payload, None).unwrap();
        assert_eq!(samples.len(), 1);

        let s = &samples[0];
        assert_eq!(s.timestamp, at(12));
        assert_eq!(s.wave_height, Some(WaveHeight::Single(1.5)));
        assert_eq!(s.wave_period_s, Some(10.2));
        assert!((s.wind_speed_kn.unwrap() - 9.71922).abs() < 1e-5);
        assert!((s.wind_gust_kn.unwrap() - 15.550752).abs() < 1e-5);
        assert!(!s.wind_gust_estimated);
        assert_eq!(s.water_temperature_c, Some(18.5));
        assert_eq!(s.tide_height_m, None);
    }

    #[test]
    fn missing_gust_is_estimated_and_flagged() {
        let payload = json!({
            "hours": [{
                "time": "2025-10-04T12:00:00+00:00",
                "windSpeed": { "noaa": 10.0 }
            }]
        });

        let s = &normalize(&payload, None).unwrap()[0];
        let speed = s.wind_speed_kn.unwrap();
        assert!(s.wind_gust_estimated);
        assert!((s.wind_gust_kn.unwrap() - speed * 1.2).abs() < 1e-9);
    }

    #[test]
    fn entry_without_time_is_skipped_not_fatal() {
        let payload = json!({
            "hours": [
                { "waveHeight": { "sg": 9.9 } },
                { "time": "garbage", "waveHeight": { "sg": 9.9 } },
                { "time": "2025-10-04T15:00:00+00:00", "waveHeight": { "sg": 1.8 } },
                { "time": "2025-10-04T12:00:00+00:00", "waveHeight": { "sg": 1.5 } }
            ]
        });

        let samples = normalize(&payload, None).unwrap();
        let times: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![at(12), at(15)]);
    }

    #[test]
    fn missing_hours_is_malformed_and_no_entries_is_empty() {
        let err = normalize(&json!({ "errors": { "key": "invalid" } }), None).unwrap_err();
        assert!(matches!(err, ProviderErrorKind::Malformed(_)));

        let err = normalize(&json!({ "hours": [] }), None).unwrap_err();
        assert_eq!(err, ProviderErrorKind::Empty);
    }

    #[test]
    fn sea_level_attaches_tide_height_and_derived_type() {
        let payload = json!({
            "hours": [
                { "time": "2025-10-04T00:00:00+00:00", "waveHeight": { "sg": 1.0 } },
                { "time": "2025-10-04T01:00:00+00:00", "waveHeight": { "sg": 1.1 } },
                { "time": "2025-10-04T02:00:00+00:00", "waveHeight": { "sg": 1.2 } }
            ]
        });
        let sea_level = json!({
            "data": [
                { "time": "2025-10-04T00:00:00+00:00", "sg": 0.2 },
                { "time": "2025-10-04T01:00:00+00:00", "sg": 0.8 },
                { "time": "2025-10-04T02:00:00+00:00", "sg": 0.5 }
            ]
        });

        let samples = normalize(&payload, Some(&sea_level)).unwrap();
        assert_eq!(samples[0].tide_height_m, Some(0.2));
        assert_eq!(samples[0].tide_type, Some(TideType::Rising));
        assert_eq!(samples[1].tide_type, Some(TideType::High));
        assert_eq!(samples[2].tide_type, Some(TideType::Falling));
    }
}
