use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RetrieverError;

/// One measurement point of the upstream network, identified by `element_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub station_id: String,
    pub element_id: String,
    pub element_name: Option<String>,
    pub station_name: Option<String>,
    pub instrument: Option<String>,
    pub quantity: Option<String>,
    pub measurement_unit: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

impl Sensor {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some((lon, lat)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorSeries {
    pub sensor: Sensor,
    pub observations: Vec<Observation>,
}

/// Requested observation window in UTC. An open end means "up to now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: Option<NaiveDateTime>) -> Result<Self, RetrieverError> {
        if let Some(end) = end {
            if start > end {
                return Err(RetrieverError::invalid(
                    "time_start must be less than or equal to time_end",
                ));
            }
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.start && self.end.map(|end| timestamp <= end).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Parses an ISO-8601 timestamp into UTC-naive time.
///
/// Accepts a date alone, a date and time (`T` or space separated, optional fraction),
/// with or without an offset. Offsets are converted to UTC.
pub fn parse_iso8601(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return Some(parsed.naive_utc());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Renders UTC-naive time as `YYYY-MM-DDTHH:MM:SS`, with a fraction only when non-zero.
pub fn format_iso8601(timestamp: &NaiveDateTime) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// Lower-cases the upstream quantity description and joins words with `_`.
pub fn normalize_quantity(description: &str) -> String {
    description.trim().to_lowercase().replace(' ', "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Station,
    Element,
    Instrument,
    Quantity,
}

impl FilterField {
    pub fn value_of<'a>(&self, sensor: &'a Sensor) -> Option<&'a str> {
        match self {
            FilterField::Station => Some(sensor.station_id.as_str()),
            FilterField::Element => Some(sensor.element_id.as_str()),
            FilterField::Instrument => sensor.instrument.as_deref(),
            FilterField::Quantity => sensor.quantity.as_deref(),
        }
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterField::Station => write!(f, "station"),
            FilterField::Element => write!(f, "element"),
            FilterField::Instrument => write!(f, "instrument"),
            FilterField::Quantity => write!(f, "quantity"),
        }
    }
}

impl FromStr for FilterField {
    type Err = RetrieverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "station" => Ok(FilterField::Station),
            "element" => Ok(FilterField::Element),
            "instrument" => Ok(FilterField::Instrument),
            "quantity" => Ok(FilterField::Quantity),
            other => Err(RetrieverError::invalid(format!(
                "unknown filter '{other}', expected one of station, element, instrument, quantity"
            ))),
        }
    }
}

/// Accepted values per field: OR within a field, AND across fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttributeFilters(BTreeMap<FilterField, BTreeSet<String>>);

impl AttributeFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&mut self, field: FilterField, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(field)
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn accepted(&self, field: FilterField) -> Option<&BTreeSet<String>> {
        self.0.get(&field)
    }

    pub fn matches(&self, sensor: &Sensor) -> bool {
        self.0.iter().all(|(field, accepted)| {
            field
                .value_of(sensor)
                .map(|value| accepted.contains(value))
                .unwrap_or(false)
        })
    }
}

/// Inclusive `[min, max]` range of one coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinateRange {
    pub min: f64,
    pub max: f64,
}

impl CoordinateRange {
    pub fn latitude(min: f64, max: f64) -> Result<Self, RetrieverError> {
        Self::bounded("lat_range", min, max, 90.0)
    }

    pub fn longitude(min: f64, max: f64) -> Result<Self, RetrieverError> {
        Self::bounded("long_range", min, max, 180.0)
    }

    fn bounded(name: &str, min: f64, max: f64, limit: f64) -> Result<Self, RetrieverError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(RetrieverError::invalid(format!(
                "{name} elements must be finite numbers"
            )));
        }
        if min < -limit || min > limit || max < -limit || max > limit {
            return Err(RetrieverError::invalid(format!(
                "{name} elements must be in the range [-{limit}, {limit}]"
            )));
        }
        if min > max {
            return Err(RetrieverError::invalid(format!(
                "{name}[0] must be less than or equal to {name}[1]"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutFormat {
    #[default]
    Geojson,
}

impl OutFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutFormat::Geojson => "geojson",
        }
    }
}

impl fmt::Display for OutFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutFormat::Geojson => write!(f, "geojson"),
        }
    }
}

impl FromStr for OutFormat {
    type Err = RetrieverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "geojson" => Ok(OutFormat::Geojson),
            _ => Err(RetrieverError::invalid(
                "out_format must be one of [\"geojson\"]",
            )),
        }
    }
}

/// Object-store prefix in `s3://bucket[/key-prefix]` form, without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BucketUri(String);

impl BucketUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, file_name: &str) -> String {
        format!("{}/{}", self.0, file_name)
    }

    pub fn bucket(&self) -> &str {
        let rest = self.without_scheme();
        rest.split_once('/').map(|(bucket, _)| bucket).unwrap_or(rest)
    }

    /// Object key after the bucket name, if any.
    pub fn key(&self) -> Option<&str> {
        self.without_scheme()
            .split_once('/')
            .map(|(_, key)| key)
            .filter(|key| !key.is_empty())
    }

    fn without_scheme(&self) -> &str {
        self.0.strip_prefix("s3://").unwrap_or(&self.0)
    }
}

impl fmt::Display for BucketUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BucketUri {
    type Err = RetrieverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        static BUCKET_RE: OnceLock<Regex> = OnceLock::new();
        let re = BUCKET_RE.get_or_init(|| {
            Regex::new(r"^s3://[A-Za-z0-9][A-Za-z0-9._-]*(/.*)?$").expect("valid bucket regex")
        });
        let trimmed = value.trim();
        if !trimmed.starts_with("s3://") {
            return Err(RetrieverError::invalid(
                "bucket_destination must start with \"s3://\"",
            ));
        }
        if !re.is_match(trimmed) {
            return Err(RetrieverError::invalid(format!(
                "bucket_destination is not a valid bucket URI: {value}"
            )));
        }
        Ok(Self(trimmed.trim_end_matches('/').to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sensor(station: &str, quantity: Option<&str>) -> Sensor {
        Sensor {
            station_id: station.to_string(),
            element_id: format!("{station}-1"),
            element_name: None,
            station_name: None,
            instrument: Some("pluviometer".to_string()),
            quantity: quantity.map(str::to_string),
            measurement_unit: None,
            longitude: Some(12.5),
            latitude: Some(44.1),
        }
    }

    #[test]
    fn quantity_normalization() {
        assert_eq!(normalize_quantity("Water Level"), "water_level");
        assert_eq!(normalize_quantity("Air temperature"), "air_temperature");
    }

    #[test]
    fn filter_field_rejects_unknown_keys() {
        let err = "sensor".parse::<FilterField>().unwrap_err();
        assert_matches!(err, RetrieverError::InvalidInput(_));
        assert_eq!("quantity".parse::<FilterField>().unwrap(), FilterField::Quantity);
    }

    #[test]
    fn missing_attribute_never_matches() {
        let mut filters = AttributeFilters::new();
        filters.insert(FilterField::Quantity, ["water_level"]);
        assert!(filters.matches(&sensor("A", Some("water_level"))));
        assert!(!filters.matches(&sensor("A", None)));
    }

    #[test]
    fn coordinate_range_bounds() {
        assert!(CoordinateRange::latitude(43.9, 44.8).is_ok());
        assert!(CoordinateRange::latitude(10.0, 10.0).is_ok());
        assert_matches!(
            CoordinateRange::latitude(-91.0, 10.0),
            Err(RetrieverError::InvalidInput(_))
        );
        assert_matches!(
            CoordinateRange::longitude(20.0, 10.0),
            Err(RetrieverError::InvalidInput(_))
        );
        assert!(CoordinateRange::longitude(-180.0, 180.0).is_ok());
    }

    #[test]
    fn bucket_uri_validation() {
        let uri: BucketUri = "s3://saferplaces.co/cae/".parse().unwrap();
        assert_eq!(uri.join("out.geojson"), "s3://saferplaces.co/cae/out.geojson");
        assert_eq!(uri.bucket(), "saferplaces.co");
        assert_eq!(uri.key(), Some("cae"));

        let object: BucketUri = uri.join("out.geojson").parse().unwrap();
        assert_eq!(object.bucket(), "saferplaces.co");
        assert_eq!(object.key(), Some("cae/out.geojson"));

        let bare: BucketUri = "s3://saferplaces.co".parse().unwrap();
        assert_eq!(bare.bucket(), "saferplaces.co");
        assert_eq!(bare.key(), None);
        assert_matches!(
            "https://bucket/key".parse::<BucketUri>(),
            Err(RetrieverError::InvalidInput(_))
        );
        assert_matches!("s3://".parse::<BucketUri>(), Err(RetrieverError::InvalidInput(_)));
    }

    #[test]
    fn iso8601_variants() {
        let expected = NaiveDate::from_ymd_opt(2025, 7, 23)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(parse_iso8601("2025-07-23T10:00:00"), Some(expected));
        assert_eq!(parse_iso8601("2025-07-23 10:00"), Some(expected));
        assert_eq!(parse_iso8601("2025-07-23T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_iso8601("2025-07-23T10:00:00Z"), Some(expected));
        assert_eq!(
            parse_iso8601("2025-07-23"),
            NaiveDate::from_ymd_opt(2025, 7, 23).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_iso8601("23/07/2025"), None);
        assert_eq!(format_iso8601(&expected), "2025-07-23T10:00:00");
    }

    #[test]
    fn zero_width_window_is_valid() {
        let at = parse_iso8601("2025-07-23T10:00:00").unwrap();
        let window = TimeWindow::new(at, Some(at)).unwrap();
        assert!(window.contains(at));
        assert_matches!(
            TimeWindow::new(at, Some(at - chrono::Duration::seconds(1))),
            Err(RetrieverError::InvalidInput(_))
        );
    }

    #[test]
    fn credential_expiry() {
        let now = Utc::now();
        let credential = Credential {
            access_token: "abc".to_string(),
            token_type: "Bearer".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(60),
        };
        assert!(!credential.is_expired(now));
        assert!(credential.is_expired(now + chrono::Duration::seconds(61)));
        assert_eq!(credential.authorization(), "Bearer abc");
    }
}
