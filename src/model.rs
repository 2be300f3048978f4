use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

pub const PM25: &str = "PM2.5";
pub const NO2: &str = "NO2";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// One (station, pollutant, value, time) observation as served by the data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(
        rename = "Estación_ID",
        alias = "Estacion_ID",
        deserialize_with = "deserialize_station_id"
    )]
    pub station_id: String,
    #[serde(rename = "Estación_Nombre", alias = "Nombre_Estacion", default)]
    pub station_name: String,
    #[serde(
        rename = "Geolocalizacion",
        alias = "Geolocalización",
        default,
        deserialize_with = "deserialize_location"
    )]
    pub location: Option<GeoPoint>,
    #[serde(rename = "Tipo_Contaminante")]
    pub pollutant: String,
    #[serde(rename = "Valor")]
    pub value: f64,
    #[serde(rename = "Unidad", default)]
    pub unit: String,
    #[serde(rename = "Timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Station identifiers arrive as numbers from some collections and strings from others.
fn deserialize_station_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StationIdValue {
        Integer(i64),
        Text(String),
    }

    match StationIdValue::deserialize(deserializer)? {
        StationIdValue::Integer(n) => Ok(n.to_string()),
        StationIdValue::Text(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        StationIdValue::Text(_) => Err(serde::de::Error::custom("Empty station id")),
    }
}

/// Coordinates are optional per reading, and the ingestion worker stores
/// whatever the source gave it.
///
/// Accepts:
/// - `{"lat": 40.4, "lon": -3.7}` (numbers)
/// - `{"lat": "40.4", "lon": "-3.7"}` (numeric strings)
///
/// Anything else (`null`, a missing or null key, non-finite values, a
/// non-object) yields `None` instead of failing the reading.
fn deserialize_location<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<GeoPoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;

    let coordinate = |value: &serde_json::Value, key: &str| -> Option<f64> {
        match value.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    };

    Ok(raw.and_then(|value| {
        let point = GeoPoint::new(coordinate(&value, "lat")?, coordinate(&value, "lon")?);
        point.is_finite().then_some(point)
    }))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| format!("Invalid timestamp '{}'", raw))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutantReading {
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// Current best-known reading per pollutant for one station.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSnapshot {
    pub station_id: String,
    pub station_name: String,
    pub location: Option<GeoPoint>,
    pub latest_by_pollutant: BTreeMap<String, PollutantReading>,
}

impl StationSnapshot {
    pub fn seeded_from(reading: &Reading) -> Self {
        Self {
            station_id: reading.station_id.clone(),
            station_name: reading.station_name.clone(),
            location: reading.location,
            latest_by_pollutant: BTreeMap::new(),
        }
    }

    pub fn latest(&self, pollutant: &str) -> Option<&PollutantReading> {
        self.latest_by_pollutant.get(pollutant)
    }

    pub fn value_of(&self, pollutant: &str) -> Option<f64> {
        self.latest(pollutant).map(|r| r.value)
    }
}

/// A user-chosen coordinate with alert thresholds, as stored by the users service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteLocation {
    #[serde(alias = "id_ubicacion")]
    pub id: i64,
    #[serde(rename = "id_usuario", default, skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<i64>,
    #[serde(rename = "nombre", alias = "nombre_ubicacion", default)]
    pub label: String,
    #[serde(rename = "latitud")]
    pub latitude: f64,
    #[serde(rename = "longitud")]
    pub longitude: f64,
    #[serde(rename = "umbral_pm25", default, deserialize_with = "deserialize_threshold")]
    pub threshold_pm25: Option<u32>,
    #[serde(rename = "umbral_no2", default, deserialize_with = "deserialize_threshold")]
    pub threshold_no2: Option<u32>,
}

impl FavoriteLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Thresholds are non-negative integers, but forms post them as strings and
/// some clients send integral floats.
///
/// Accepts:
/// - `50` (integer)
/// - `50.0` (integral float)
/// - `"50"` (numeric string)
/// - `null` (no threshold)
fn deserialize_threshold<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ThresholdValue {
        Integer(u32),
        Float(f64),
        String(String),
    }

    match Option::<ThresholdValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(ThresholdValue::Integer(n)) => Ok(Some(n)),
        Some(ThresholdValue::Float(f)) if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => {
            Ok(Some(f as u32))
        }
        Some(ThresholdValue::Float(f)) => Err(serde::de::Error::custom(format!(
            "Invalid threshold: {} (expected a non-negative integer)",
            f
        ))),
        Some(ThresholdValue::String(s)) if s.trim().is_empty() => Ok(None),
        Some(ThresholdValue::String(s)) => s.trim().parse::<u32>().map(Some).map_err(|_| {
            serde::de::Error::custom(format!("Invalid threshold: '{}'", s))
        }),
    }
}

/// Body of a favorite creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFavorite {
    #[serde(rename = "nombre_ubicacion")]
    pub label: String,
    #[serde(rename = "latitud")]
    pub latitude: Option<f64>,
    #[serde(rename = "longitud")]
    pub longitude: Option<f64>,
    #[serde(rename = "umbral_pm25")]
    pub threshold_pm25: u32,
    #[serde(rename = "umbral_no2")]
    pub threshold_no2: u32,
}

pub const DEFAULT_PM25_THRESHOLD: u32 = 50;
pub const DEFAULT_NO2_THRESHOLD: u32 = 100;

impl NewFavorite {
    pub fn new(label: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            label: label.into(),
            latitude: Some(latitude),
            longitude: Some(longitude),
            threshold_pm25: DEFAULT_PM25_THRESHOLD,
            threshold_no2: DEFAULT_NO2_THRESHOLD,
        }
    }

    /// Reject submissions the users service would store with unusable coordinates.
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(AppError::MalformedInput(
                "Favorite label cannot be empty".to_string(),
            ));
        }

        let (lat, lon) = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(AppError::MalformedInput(
                    "Favorite requires both latitude and longitude".to_string(),
                ))
            }
        };

        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::MalformedInput(format!(
                "Latitude {} out of range (-90 to 90)",
                lat
            )));
        }

        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::MalformedInput(format!(
                "Longitude {} out of range (-180 to 180)",
                lon
            )));
        }

        Ok(())
    }
}

/// Partial update; the users service only lets label and thresholds change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FavoriteUpdate {
    #[serde(rename = "nombre_ubicacion", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "umbral_pm25", skip_serializing_if = "Option::is_none")]
    pub threshold_pm25: Option<u32>,
    #[serde(rename = "umbral_no2", skip_serializing_if = "Option::is_none")]
    pub threshold_no2: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    pub favorite_id: i64,
    pub label: String,
    pub nearest_station_id: Option<String>,
    pub nearest_station_name: Option<String>,
    pub current_pm25: Option<f64>,
    pub current_no2: Option<f64>,
    pub is_alerting: bool,
    /// Every pollutant whose current value is strictly above its threshold.
    pub exceeded: Vec<String>,
}

/// One chart point: a time bucket with a sparse column per pollutant.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRow {
    pub label: String,
    pub sort_key: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl ChartRow {
    pub fn value_of(&self, pollutant: &str) -> Option<f64> {
        self.values.get(pollutant).copied()
    }
}

/// Keys a serialized row always carries; pollutant columns with these names are dropped.
pub const CHART_ROW_KEYS: [&str; 2] = ["time", "timestamp"];

impl Serialize for ChartRow {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        let columns: Vec<(&String, &f64)> = self
            .values
            .iter()
            .filter(|(pollutant, _)| !CHART_ROW_KEYS.contains(&pollutant.as_str()))
            .collect();

        let mut map = serializer.serialize_map(Some(columns.len() + CHART_ROW_KEYS.len()))?;
        map.serialize_entry("time", &self.label)?;
        map.serialize_entry("timestamp", &self.sort_key.to_rfc3339())?;
        for (pollutant, value) in columns {
            map.serialize_entry(pollutant, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_from_latest_endpoint() {
        let json = r#"{
            "Estación_ID": 2178,
            "Estación_Nombre": "Escuelas Aguirre",
            "Timestamp": "2024-01-15T14:00:00",
            "Valor": 23.5,
            "Unidad": "µg/m³",
            "Tipo_Contaminante": "PM2.5",
            "Geolocalizacion": {"lat": 40.4217, "lon": -3.6823}
        }"#;

        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.station_id, "2178");
        assert_eq!(reading.station_name, "Escuelas Aguirre");
        assert_eq!(reading.pollutant, PM25);
        assert_eq!(reading.value, 23.5);
        assert_eq!(reading.location, Some(GeoPoint::new(40.4217, -3.6823)));
        assert_eq!(
            reading.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-01-15 14:00:00"
        );
    }

    #[test]
    fn test_reading_from_history_endpoint() {
        // History documents keep the accented location key and microseconds
        let json = r#"{
            "_id": "65a5",
            "Estación_ID": "2178",
            "Estación_Nombre": "Escuelas Aguirre",
            "Timestamp": "2024-01-15T14:00:00.123456",
            "Valor": 41,
            "Unidad": "µg/m³",
            "Tipo_Contaminante": "NO2",
            "Geolocalización": {"lat": 40.4217, "lon": -3.6823}
        }"#;

        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.station_id, "2178");
        assert_eq!(reading.value, 41.0);
        assert!(reading.location.is_some());
    }

    #[test]
    fn test_reading_without_coordinates() {
        let json = r#"{
            "Estación_ID": 7,
            "Timestamp": "2024-01-15T14:00:00Z",
            "Valor": 5.0,
            "Tipo_Contaminante": "CO",
            "Geolocalizacion": null
        }"#;

        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.location, None);
        assert_eq!(reading.station_name, "");
        assert_eq!(reading.unit, "");
    }

    #[test]
    fn test_reading_with_unusable_coordinates() {
        for location in [
            r#"{"lat": null, "lon": null}"#,
            r#"{"lat": 40.4}"#,
            r#"{}"#,
            r#"[40.4, -3.7]"#,
            r#""40.4,-3.7""#,
        ] {
            let json = format!(
                r#"{{"Estación_ID": 7, "Timestamp": "2024-01-15T14:00:00Z", "Valor": 5.0,
                    "Tipo_Contaminante": "CO", "Geolocalizacion": {}}}"#,
                location
            );
            let reading: Reading = serde_json::from_str(&json).unwrap();
            assert_eq!(reading.location, None, "location {}", location);
        }
    }

    #[test]
    fn test_reading_with_string_coordinates() {
        let json = r#"{
            "Estación_ID": 7,
            "Timestamp": "2024-01-15T14:00:00Z",
            "Valor": 5.0,
            "Tipo_Contaminante": "CO",
            "Geolocalizacion": {"lat": "40.5", "lon": " -3.6 "}
        }"#;

        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.location, Some(GeoPoint::new(40.5, -3.6)));
    }

    #[test]
    fn test_batch_with_unlocated_station_keeps_every_station() {
        let json = r#"[
            {"Estación_ID": 1, "Timestamp": "2024-01-15T10:00:00", "Valor": 62.0,
             "Tipo_Contaminante": "PM2.5", "Geolocalizacion": {"lat": 40.01, "lon": -3.01}},
            {"Estación_ID": 2, "Timestamp": "2024-01-15T10:00:00", "Valor": 8.0,
             "Tipo_Contaminante": "PM2.5", "Geolocalizacion": {"lat": null, "lon": null}}
        ]"#;

        let readings: Vec<Reading> = serde_json::from_str(json).unwrap();
        let stations = crate::aggregate::aggregate(&readings);
        assert_eq!(stations.len(), 2);
        assert_eq!(stations.located().count(), 1);
    }

    #[test]
    fn test_parse_timestamp_with_offset() {
        let ts = parse_timestamp("2024-01-15T14:00:00+02:00").unwrap();
        assert_eq!(ts.format("%H:%M").to_string(), "12:00");
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(err.contains("yesterday"));
    }

    #[test]
    fn test_favorite_thresholds_accept_loose_numbers() {
        let json = r#"{
            "id": 3,
            "nombre": "Casa",
            "latitud": 40.0,
            "longitud": -3.0,
            "umbral_pm25": "35",
            "umbral_no2": 100.0
        }"#;

        let fav: FavoriteLocation = serde_json::from_str(json).unwrap();
        assert_eq!(fav.id, 3);
        assert_eq!(fav.label, "Casa");
        assert_eq!(fav.threshold_pm25, Some(35));
        assert_eq!(fav.threshold_no2, Some(100));
        assert_eq!(fav.owner_user_id, None);
    }

    #[test]
    fn test_favorite_null_and_missing_thresholds() {
        let json = r#"{"id_ubicacion": 9, "nombre_ubicacion": "Oficina", "latitud": 1.0, "longitud": 2.0, "umbral_pm25": null}"#;

        let fav: FavoriteLocation = serde_json::from_str(json).unwrap();
        assert_eq!(fav.id, 9);
        assert_eq!(fav.label, "Oficina");
        assert_eq!(fav.threshold_pm25, None);
        assert_eq!(fav.threshold_no2, None);
    }

    #[test]
    fn test_favorite_rejects_negative_threshold() {
        let json = r#"{"id": 1, "latitud": 1.0, "longitud": 2.0, "umbral_pm25": -5}"#;
        let result: std::result::Result<FavoriteLocation, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_favorite_validation() {
        assert!(NewFavorite::new("Casa", 40.0, -3.0).validate().is_ok());

        let mut missing = NewFavorite::new("Casa", 40.0, -3.0);
        missing.longitude = None;
        assert!(matches!(missing.validate(), Err(AppError::MalformedInput(_))));

        let out_of_range = NewFavorite::new("Casa", 91.0, -3.0);
        assert!(matches!(out_of_range.validate(), Err(AppError::MalformedInput(_))));

        let nan = NewFavorite::new("Casa", f64::NAN, -3.0);
        assert!(nan.validate().is_err());

        let blank = NewFavorite::new("  ", 40.0, -3.0);
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_favorite_update_skips_unset_fields() {
        let update = FavoriteUpdate {
            threshold_pm25: Some(20),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"umbral_pm25": 20}));
    }

    #[test]
    fn test_chart_row_serializes_flat() {
        let mut values = BTreeMap::new();
        values.insert(PM25.to_string(), 10.0);
        values.insert(NO2.to_string(), 20.0);
        let row = ChartRow {
            label: "15/01, 14:30".to_string(),
            sort_key: parse_timestamp("2024-01-15T14:30:00Z").unwrap(),
            values,
        };

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["time"], "15/01, 14:30");
        assert_eq!(json["PM2.5"], 10.0);
        assert_eq!(json["NO2"], 20.0);
        assert!(json["timestamp"].as_str().unwrap().starts_with("2024-01-15T14:30:00"));
    }

    #[test]
    fn test_chart_row_never_repeats_reserved_keys() {
        let mut values = BTreeMap::new();
        values.insert(PM25.to_string(), 10.0);
        values.insert("time".to_string(), 1.0);
        values.insert("timestamp".to_string(), 2.0);
        let row = ChartRow {
            label: "15/01, 14:30".to_string(),
            sort_key: parse_timestamp("2024-01-15T14:30:00Z").unwrap(),
            values,
        };

        let text = serde_json::to_string(&row).unwrap();
        assert_eq!(text.matches("\"time\"").count(), 1);
        assert_eq!(text.matches("\"timestamp\"").count(), 1);

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["time"], "15/01, 14:30");
        assert_eq!(json["PM2.5"], 10.0);
        assert_eq!(json.as_object().unwrap().len(), 3);
    }
}
