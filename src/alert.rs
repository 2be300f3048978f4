use crate::model::{AlertState, FavoriteLocation, StationSnapshot, NO2, PM25};
use serde::Serialize;

/// Compare a favorite's thresholds against its nearest station.
///
/// Only PM2.5 drives `is_alerting`; NO2 is reported in `exceeded` alongside it.
/// A missing reading or threshold never alerts.
pub fn evaluate(favorite: &FavoriteLocation, snapshot: Option<&StationSnapshot>) -> AlertState {
    let current_pm25 = snapshot.and_then(|s| s.value_of(PM25));
    let current_no2 = snapshot.and_then(|s| s.value_of(NO2));

    let mut exceeded = Vec::new();
    if exceeds(current_pm25, favorite.threshold_pm25) {
        exceeded.push(PM25.to_string());
    }
    if exceeds(current_no2, favorite.threshold_no2) {
        exceeded.push(NO2.to_string());
    }

    AlertState {
        favorite_id: favorite.id,
        label: favorite.label.clone(),
        nearest_station_id: snapshot.map(|s| s.station_id.clone()),
        nearest_station_name: snapshot.map(|s| s.station_name.clone()),
        current_pm25,
        current_no2,
        is_alerting: exceeds(current_pm25, favorite.threshold_pm25),
        exceeded,
    }
}

/// Strictly greater than; a value equal to the threshold is not an alert.
fn exceeds(current: Option<f64>, threshold: Option<u32>) -> bool {
    match (current, threshold) {
        (Some(value), Some(limit)) => value > f64::from(limit),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AirQualityCategory {
    Good,
    Moderate,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
    NoData,
}

impl AirQualityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AirQualityCategory::Good => "good",
            AirQualityCategory::Moderate => "moderate",
            AirQualityCategory::Unhealthy => "unhealthy",
            AirQualityCategory::VeryUnhealthy => "very-unhealthy",
            AirQualityCategory::Hazardous => "hazardous",
            AirQualityCategory::NoData => "no-data",
        }
    }

    /// Marker color used on the map.
    pub fn color(&self) -> &'static str {
        match self {
            AirQualityCategory::Good => "#00E400",
            AirQualityCategory::Moderate => "#FFFF00",
            AirQualityCategory::Unhealthy => "#FF7E00",
            AirQualityCategory::VeryUnhealthy => "#FF0000",
            AirQualityCategory::Hazardous => "#7E0023",
            AirQualityCategory::NoData => "#9E9E9E",
        }
    }
}

impl std::fmt::Display for AirQualityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PM2.5 (µg/m³) breakpoints, inclusive on each band's upper bound.
pub fn classify_pm25(pm25: Option<f64>) -> AirQualityCategory {
    match pm25 {
        Some(v) if v.is_nan() || v < 0.0 => AirQualityCategory::NoData,
        Some(v) if v <= 12.0 => AirQualityCategory::Good,
        Some(v) if v <= 35.4 => AirQualityCategory::Moderate,
        Some(v) if v <= 55.4 => AirQualityCategory::Unhealthy,
        Some(v) if v <= 150.4 => AirQualityCategory::VeryUnhealthy,
        Some(_) => AirQualityCategory::Hazardous,
        None => AirQualityCategory::NoData,
    }
}

pub fn classify_station(snapshot: &StationSnapshot) -> AirQualityCategory {
    classify_pm25(snapshot.value_of(PM25))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_timestamp, GeoPoint, PollutantReading};
    use std::collections::BTreeMap;

    fn favorite(pm25: u32, no2: u32) -> FavoriteLocation {
        FavoriteLocation {
            id: 1,
            owner_user_id: Some(7),
            label: "Casa".to_string(),
            latitude: 40.0,
            longitude: -3.0,
            threshold_pm25: Some(pm25),
            threshold_no2: Some(no2),
        }
    }

    fn snapshot(values: &[(&str, f64)]) -> StationSnapshot {
        let ts = parse_timestamp("2024-01-15T10:00:00Z").unwrap();
        let latest_by_pollutant: BTreeMap<String, PollutantReading> = values
            .iter()
            .map(|(p, v)| {
                (
                    p.to_string(),
                    PollutantReading {
                        value: *v,
                        unit: "µg/m³".to_string(),
                        timestamp: ts,
                    },
                )
            })
            .collect();
        StationSnapshot {
            station_id: "28079008".to_string(),
            station_name: "Escuelas Aguirre".to_string(),
            location: Some(GeoPoint::new(40.01, -3.01)),
            latest_by_pollutant,
        }
    }

    #[test]
    fn test_equal_to_threshold_is_not_alerting() {
        let state = evaluate(&favorite(50, 100), Some(&snapshot(&[(PM25, 50.0)])));
        assert!(!state.is_alerting);
        assert_eq!(state.current_pm25, Some(50.0));
        assert!(state.exceeded.is_empty());
    }

    #[test]
    fn test_just_above_threshold_is_alerting() {
        let state = evaluate(&favorite(50, 100), Some(&snapshot(&[(PM25, 50.01)])));
        assert!(state.is_alerting);
        assert_eq!(state.exceeded, vec![PM25.to_string()]);
    }

    #[test]
    fn test_unresolved_station() {
        let state = evaluate(&favorite(50, 100), None);
        assert!(!state.is_alerting);
        assert_eq!(state.current_pm25, None);
        assert_eq!(state.nearest_station_id, None);
    }

    #[test]
    fn test_missing_pm25_does_not_alert() {
        let state = evaluate(&favorite(0, 100), Some(&snapshot(&[(NO2, 500.0)])));
        assert!(!state.is_alerting);
        assert_eq!(state.current_pm25, None);
        assert_eq!(state.current_no2, Some(500.0));
        assert_eq!(state.exceeded, vec![NO2.to_string()]);
    }

    #[test]
    fn test_missing_threshold_does_not_alert() {
        let mut fav = favorite(50, 100);
        fav.threshold_pm25 = None;
        let state = evaluate(&fav, Some(&snapshot(&[(PM25, 999.0)])));
        assert!(!state.is_alerting);
    }

    #[test]
    fn test_reports_nearest_station() {
        let state = evaluate(&favorite(50, 100), Some(&snapshot(&[(PM25, 62.0), (NO2, 101.0)])));
        assert!(state.is_alerting);
        assert_eq!(state.current_pm25, Some(62.0));
        assert_eq!(state.nearest_station_id.as_deref(), Some("28079008"));
        assert_eq!(state.nearest_station_name.as_deref(), Some("Escuelas Aguirre"));
        assert_eq!(state.exceeded, vec![PM25.to_string(), NO2.to_string()]);
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify_pm25(Some(0.0)), AirQualityCategory::Good);
        assert_eq!(classify_pm25(Some(12.0)), AirQualityCategory::Good);
        assert_eq!(classify_pm25(Some(12.01)), AirQualityCategory::Moderate);
        assert_eq!(classify_pm25(Some(35.4)), AirQualityCategory::Moderate);
        assert_eq!(classify_pm25(Some(35.41)), AirQualityCategory::Unhealthy);
        assert_eq!(classify_pm25(Some(55.4)), AirQualityCategory::Unhealthy);
        assert_eq!(classify_pm25(Some(55.41)), AirQualityCategory::VeryUnhealthy);
        assert_eq!(classify_pm25(Some(150.4)), AirQualityCategory::VeryUnhealthy);
        assert_eq!(classify_pm25(Some(150.41)), AirQualityCategory::Hazardous);
    }

    #[test]
    fn test_classification_no_data() {
        assert_eq!(classify_pm25(Some(-1.0)), AirQualityCategory::NoData);
        assert_eq!(classify_pm25(None), AirQualityCategory::NoData);
        assert_eq!(classify_pm25(Some(f64::NAN)), AirQualityCategory::NoData);
        assert_eq!(AirQualityCategory::NoData.to_string(), "no-data");
    }

    #[test]
    fn test_classify_station_uses_pm25() {
        assert_eq!(
            classify_station(&snapshot(&[(PM25, 40.0)])),
            AirQualityCategory::Unhealthy
        );
        assert_eq!(
            classify_station(&snapshot(&[(NO2, 40.0)])),
            AirQualityCategory::NoData
        );
    }
}
