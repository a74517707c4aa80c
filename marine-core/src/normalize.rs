//! Helpers shared by the provider normalizers.
//!
//! Every adapter converts its native payload into [`RawSample`]s in canonical
//! units: meters, seconds, degrees, knots and °C. Conversions and derivations
//! live here so they are applied the same way across adapters.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::model::{RawSample, TideType};

pub const KNOTS_PER_MPS: f64 = 1.943_844;
pub const KPH_PER_KNOT: f64 = 1.852;

/// Multiplier applied to wind speed when a provider gives no gust reading.
/// Estimated gusts are flagged on the sample and rank below direct readings.
pub const GUST_FACTOR: f64 = 1.2;

pub fn mps_to_knots(mps: f64) -> f64 {
    mps * KNOTS_PER_MPS
}

pub fn kph_to_knots(kph: f64) -> f64 {
    kph / KPH_PER_KNOT
}

/// Assumed gust for a sample whose provider only reports mean wind speed.
pub fn estimate_gust(wind_speed_kn: f64) -> f64 {
    wind_speed_kn * GUST_FACTOR
}

/// Pick one value from a provider's per-source readings.
///
/// Sources listed in `preference` win in that order; otherwise the first
/// remaining source by name. Distinct sources are never averaged.
pub fn first_by_preference(
    sources: &BTreeMap<String, Option<f64>>,
    preference: &[&str],
) -> Option<f64> {
    preference
        .iter()
        .find_map(|name| sources.get(*name).copied().flatten())
        .or_else(|| sources.values().find_map(|v| *v))
        .filter(|v| v.is_finite())
}

/// Parse a provider timestamp as UTC.
///
/// Accepts RFC 3339 (`2025-10-04T12:00:00+00:00`) and the zone-less
/// `2025-10-04T12:00` form, which is read as UTC.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ndt| ndt.and_utc())
}

pub fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// Derive tide state from an ordered sea-level series.
///
/// A local maximum is `High`, a local minimum `Low`; other points are
/// `Rising` or `Falling` by the direction of the next point (or of the
/// previous one for the last point). This is an estimate from the
/// series shape, not a reported tide table.
pub fn derive_tide_types(levels: &[f64]) -> Vec<Option<TideType>> {
    levels
        .iter()
        .enumerate()
        .map(|(i, &h)| {
            let prev = i.checked_sub(1).map(|p| levels[p]);
            let next = levels.get(i + 1).copied();
            match (prev, next) {
                (Some(p), Some(n)) if h > p && h >= n => Some(TideType::High),
                (Some(p), Some(n)) if h < p && h <= n => Some(TideType::Low),
                (_, Some(n)) if n > h => Some(TideType::Rising),
                (_, Some(n)) if n < h => Some(TideType::Falling),
                (Some(p), _) if h > p => Some(TideType::Rising),
                (Some(p), _) if h < p => Some(TideType::Falling),
                _ => None,
            }
        })
        .collect()
}

/// Fill `tide_type` on samples that carry a tide height and no tide type.
/// `samples` must be sorted by timestamp.
pub fn apply_tide_types(samples: &mut [RawSample]) {
    let with_tide: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.tide_height_m.is_some())
        .map(|(i, _)| i)
        .collect();

    let levels: Vec<f64> = with_tide
        .iter()
        .filter_map(|&i| samples[i].tide_height_m)
        .collect();

    for (&i, tide) in with_tide.iter().zip(derive_tide_types(&levels)) {
        if samples[i].tide_type.is_none() {
            samples[i].tide_type = tide;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn sources(pairs: &[(&str, Option<f64>)]) -> BTreeMap<String, Option<f64>> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn unit_conversions() {
        assert!((mps_to_knots(10.0) - 19.43844).abs() < 1e-9);
        assert!((kph_to_knots(18.52) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn gust_estimate_uses_fixed_factor() {
        assert!((estimate_gust(10.0) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn preference_order_wins_over_other_sources() {
        let s = sources(&[("noaa", Some(1.1)), ("sg", Some(1.5)), ("icon", Some(1.3))]);
        assert_eq!(first_by_preference(&s, &["sg", "noaa"]), Some(1.5));
    }

    #[test]
    fn preference_skips_null_primary() {
        let s = sources(&[("noaa", Some(1.1)), ("sg", None)]);
        assert_eq!(first_by_preference(&s, &["sg", "noaa"]), Some(1.1));
    }

    #[test]
    fn preference_falls_back_to_any_source() {
        let s = sources(&[("meteo", Some(0.9)), ("dwd", Some(0.7))]);
        // BTreeMap order: dwd before meteo.
        assert_eq!(first_by_preference(&s, &["sg"]), Some(0.7));
        assert_eq!(first_by_preference(&BTreeMap::new(), &["sg"]), None);
    }

    #[test]
    fn parses_rfc3339_and_naive_as_utc() {
        let expected = Utc.with_ymd_and_hms(2025, 10, 4, 12, 0, 0).unwrap();
        assert_eq!(parse_utc("2025-10-04T12:00:00+00:00"), Some(expected));
        assert_eq!(parse_utc("2025-10-04T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_utc("2025-10-04T12:00"), Some(expected));
        assert_eq!(parse_utc("not a time"), None);
    }

    #[test]
    fn unix_seconds_to_utc() {
        let dt = unix_to_utc(1_759_579_200).unwrap();
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn tide_types_follow_series_shape() {
        let levels = [0.1, 0.5, 0.9, 0.4, 0.0, 0.3];
        let types = derive_tide_types(&levels);
        assert_eq!(
            types,
            vec![
                Some(TideType::Rising),
                Some(TideType::Rising),
                Some(TideType::High),
                Some(TideType::Falling),
                Some(TideType::Low),
                Some(TideType::Rising),
            ]
        );
    }

    #[test]
    fn tide_types_for_short_series() {
        assert_eq!(derive_tide_types(&[0.4]), vec![None]);
        assert!(derive_tide_types(&[]).is_empty());
    }

    #[test]
    fn apply_tide_types_skips_samples_without_height() {
        let t0 = Utc.with_ymd_and_hms(2025, 10, 4, 0, 0, 0).unwrap();
        let mut samples: Vec<RawSample> = (0..3)
            .map(|h| RawSample::at(t0 + chrono::Duration::hours(h)))
            .collect();
        samples[0].tide_height_m = Some(0.2);
        samples[2].tide_height_m = Some(0.6);

        apply_tide_types(&mut samples);

        assert_eq!(samples[0].tide_type, Some(TideType::Rising));
        assert_eq!(samples[1].tide_type, None);
        assert_eq!(samples[2].tide_type, Some(TideType::Rising));
    }
}
