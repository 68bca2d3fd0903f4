use std::collections::{HashMap, HashSet};

use crate::cache::{CATALOG_KEY, CacheEntry, CacheStore};
use crate::client::{ElementRecord, ElementSpec, LocationRecord, UpstreamClient};
use crate::domain::{Credential, Sensor, normalize_quantity};
use crate::error::RetrieverError;

/// Static sensor catalog, built from elements, locations and per-element specifications.
pub struct CatalogCache<'a, K: CacheStore> {
    store: &'a K,
}

impl<'a, K: CacheStore> CatalogCache<'a, K> {
    pub fn new(store: &'a K) -> Self {
        Self { store }
    }

    pub fn get_catalog<C: UpstreamClient>(
        &self,
        client: &C,
        credential: &Credential,
    ) -> Result<Vec<Sensor>, RetrieverError> {
        if let Some(entry) = self.store.get(CATALOG_KEY)? {
            let sensors: Vec<Sensor> = entry.decode()?;
            tracing::debug!(sensors = sensors.len(), "loaded sensor catalog from cache");
            return Ok(sensors);
        }

        let elements = client.list_elements(credential)?;
        let locations = client.list_locations(credential)?;

        let mut seen = HashSet::new();
        let mut specs = Vec::new();
        for element in &elements {
            if seen.insert(element.element_id.as_str()) {
                specs.push(client.element_spec(credential, &element.element_id)?);
            }
        }

        let sensors = merge_catalog(elements, &locations, &specs);
        // Only a fully merged catalog is persisted; any failure above leaves no entry.
        self.store.put(CATALOG_KEY, &CacheEntry::new(&sensors, None)?)?;
        tracing::debug!(sensors = sensors.len(), "retrieved sensor catalog from upstream API");
        Ok(sensors)
    }

    pub fn clear(&self) -> Result<bool, RetrieverError> {
        self.store.remove(CATALOG_KEY)
    }
}

/// Left-joins elements with locations (on station) and specifications (on element).
pub fn merge_catalog(
    elements: Vec<ElementRecord>,
    locations: &[LocationRecord],
    specs: &[ElementSpec],
) -> Vec<Sensor> {
    let locations: HashMap<&str, &LocationRecord> = locations
        .iter()
        .map(|location| (location.station_id.as_str(), location))
        .collect();
    let specs: HashMap<&str, &ElementSpec> = specs
        .iter()
        .map(|spec| (spec.element_id.as_str(), spec))
        .collect();

    elements
        .into_iter()
        .map(|element| {
            let location = locations.get(element.station_id.as_str());
            let spec = specs.get(element.element_id.as_str());
            let (longitude, latitude) = location
                .map(|loc| valid_coordinates(loc.longitude, loc.latitude))
                .unwrap_or((None, None));
            if location.is_none() {
                tracing::warn!(
                    element = %element.element_id,
                    station = %element.station_id,
                    "sensor has no location"
                );
            }
            Sensor {
                instrument: spec.and_then(|spec| spec.instrument.clone()),
                quantity: spec
                    .and_then(|spec| spec.quantity_descr_c.as_deref())
                    .map(normalize_quantity),
                station_id: element.station_id,
                element_id: element.element_id,
                element_name: element.element_name,
                station_name: element.station_name,
                measurement_unit: element.meas_unit,
                longitude,
                latitude,
            }
        })
        .collect()
}

fn valid_coordinates(longitude: Option<f64>, latitude: Option<f64>) -> (Option<f64>, Option<f64>) {
    match (longitude, latitude) {
        (Some(lon), Some(lat))
            if (-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat) =>
        {
            (Some(lon), Some(lat))
        }
        _ => (None, None),
    }
}
