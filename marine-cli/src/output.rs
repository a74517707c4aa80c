use marine_core::ForecastSample;

/// Display rounding: one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", round1(v)))
}

fn wave_cell(sample: &ForecastSample) -> String {
    match (sample.wave_height_min_m, sample.wave_height_max_m) {
        (Some(min), Some(max)) => format!("{:.1}-{:.1}", round1(min), round1(max)),
        _ => "-".to_string(),
    }
}

pub fn render_table(samples: &[ForecastSample]) -> String {
    let mut out = format!(
        "{:<18} {:>9} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:<8} {:>6}  {}\n",
        "time (UTC)", "wave m", "per s", "dir", "wind", "w.dir", "gust", "tide", "state", "sea C", "sources",
    );

    for s in samples {
        out.push_str(&format!(
            "{:<18} {:>9} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:<8} {:>6}  {}\n",
            s.timestamp.format("%Y-%m-%d %H:%MZ").to_string(),
            wave_cell(s),
            cell(s.wave_period_s),
            cell(s.wave_direction_deg),
            cell(s.wind_speed_kn),
            cell(s.wind_direction_deg),
            cell(s.wind_gust_kn),
            cell(s.tide_height_m),
            s.tide_type.map_or("-", |t| t.as_str()),
            cell(s.water_temperature_c),
            s.sources.join(","),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use marine_core::TideType;

    fn sample() -> ForecastSample {
        ForecastSample {
            timestamp: Utc.with_ymd_and_hms(2025, 10, 4, 12, 0, 0).unwrap(),
            wave_height_min_m: Some(1.4727),
            wave_height_max_m: Some(1.8),
            wave_period_s: Some(10.25),
            wave_direction_deg: None,
            wind_speed_kn: Some(12.04),
            wind_direction_deg: Some(270.0),
            wind_gust_kn: None,
            tide_height_m: None,
            tide_type: Some(TideType::Rising),
            water_temperature_c: Some(18.46),
            sources: vec!["openmeteo".into(), "stormglass".into()],
        }
    }

    #[test]
    fn rounds_to_one_decimal() {
        assert_eq!(round1(1.636), 1.6);
        assert_eq!(round1(1.65), 1.7);
        assert_eq!(round1(-0.04), -0.0);
    }

    #[test]
    fn table_shows_band_nulls_and_sources() {
        let table = render_table(&[sample()]);
        let row = table.lines().nth(1).unwrap();

        assert!(row.starts_with("2025-10-04 12:00Z"));
        assert!(row.contains("1.5-1.8"));
        assert!(row.contains("12.0"));
        assert!(row.contains("rising"));
        assert!(row.contains(" - "));
        assert!(row.ends_with("openmeteo,stormglass"));
    }

    #[test]
    fn table_has_header_and_one_line_per_sample() {
        let table = render_table(&[sample(), sample()]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.starts_with("time (UTC)"));
        assert!(table.ends_with("openmeteo,stormglass\n"));

        assert_eq!(render_table(&[]).lines().count(), 1);
    }
}
