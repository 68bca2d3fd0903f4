use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::domain::{SensorSeries, format_iso8601, parse_iso8601};
use crate::error::RetrieverError;

pub const CRS84: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";
/// Series property name used when a sensor has no specification.
pub const UNKNOWN_QUANTITY: &str = "unknown";

const RESERVED_PROPERTIES: [&str; 8] = [
    "id",
    "element_id",
    "element_name",
    "station_id",
    "station_name",
    "um",
    "instrument",
    "quantity",
];

/// Property holding the `[timestamp, value]` pairs for `quantity`.
///
/// A quantity that collides with a fixed property is stored as `series_<quantity>`.
pub fn series_key(quantity: &str) -> String {
    if RESERVED_PROPERTIES.contains(&quantity) {
        format!("series_{quantity}")
    } else {
        quantity.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
    pub metadata: CollectionMetadata,
    pub crs: Crs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub geometry: Option<Geometry>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub field: Vec<FieldMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@alias")]
    pub alias: String,
    #[serde(rename = "@unit")]
    pub unit: String,
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crs {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: CrsProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrsProperties {
    pub name: String,
}

impl FeatureCollection {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, RetrieverError> {
        serde_json::to_vec(self).map_err(|err| RetrieverError::Filesystem(err.to_string()))
    }
}

impl Feature {
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Reads back the `[timestamp, value]` pairs stored under the feature's quantity.
    pub fn series(&self) -> Option<Vec<(NaiveDateTime, f64)>> {
        let quantity = self.property_str("quantity")?;
        self.properties
            .get(&series_key(quantity))?
            .as_array()?
            .iter()
            .map(|pair| {
                let pair = pair.as_array()?;
                let timestamp = parse_iso8601(pair.first()?.as_str()?)?;
                let value = pair.get(1)?.as_f64()?;
                Some((timestamp, value))
            })
            .collect()
    }
}

pub fn assemble(series: &[SensorSeries]) -> FeatureCollection {
    FeatureCollection {
        kind: "FeatureCollection".to_string(),
        features: series.iter().map(to_feature).collect(),
        metadata: CollectionMetadata {
            field: known_fields(),
        },
        crs: Crs {
            kind: "name".to_string(),
            properties: CrsProperties {
                name: CRS84.to_string(),
            },
        },
    }
}

fn to_feature(entry: &SensorSeries) -> Feature {
    let sensor = &entry.sensor;
    let quantity = sensor.quantity.as_deref().unwrap_or(UNKNOWN_QUANTITY);
    let observations: Vec<Value> = entry
        .observations
        .iter()
        .map(|obs| json!([format_iso8601(&obs.timestamp), obs.value]))
        .collect();

    let mut properties = Map::new();
    properties.insert("id".to_string(), json!(sensor.element_id));
    properties.insert("element_id".to_string(), json!(sensor.element_id));
    properties.insert("element_name".to_string(), json!(sensor.element_name));
    properties.insert("station_id".to_string(), json!(sensor.station_id));
    properties.insert("station_name".to_string(), json!(sensor.station_name));
    properties.insert("um".to_string(), json!(sensor.measurement_unit));
    properties.insert("instrument".to_string(), json!(sensor.instrument));
    properties.insert("quantity".to_string(), json!(quantity));
    properties.insert(series_key(quantity), Value::Array(observations));

    Feature {
        kind: "Feature".to_string(),
        id: sensor.element_id.clone(),
        geometry: sensor.coordinates().map(|(lon, lat)| Geometry {
            kind: "Point".to_string(),
            coordinates: [lon, lat],
        }),
        properties,
    }
}

fn known_fields() -> Vec<FieldMetadata> {
    [
        ("water_level", "m", "level"),
        ("accumulated_rainfall", "mm", "rainfall"),
        ("rainfall_increment", "mm", "rainfall"),
        ("air_temperature", "°C", "temperature"),
    ]
    .into_iter()
    .map(|(name, unit, kind)| FieldMetadata {
        name: name.to_string(),
        alias: name.to_string(),
        unit: unit.to_string(),
        kind: kind.to_string(),
    })
    .collect()
}
