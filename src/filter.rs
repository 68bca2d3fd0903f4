use crate::domain::{AttributeFilters, CoordinateRange, Sensor};

/// Spatial and attribute selection over the catalog. Pure and order-preserving.
///
/// A sensor without coordinates never satisfies a spatial range, but passes through
/// untouched when neither range is given.
pub fn filter_sensors(
    catalog: &[Sensor],
    lat_range: Option<&CoordinateRange>,
    long_range: Option<&CoordinateRange>,
    attributes: Option<&AttributeFilters>,
) -> Vec<Sensor> {
    let selected: Vec<Sensor> = catalog
        .iter()
        .filter(|sensor| in_range(sensor.latitude, lat_range))
        .filter(|sensor| in_range(sensor.longitude, long_range))
        .cloned()
        .collect();
    tracing::debug!(
        sensors = selected.len(),
        "filtered sensors based on lat/long ranges"
    );

    let Some(attributes) = attributes.filter(|attrs| !attrs.is_empty()) else {
        return selected;
    };
    let selected: Vec<Sensor> = selected
        .into_iter()
        .filter(|sensor| attributes.matches(sensor))
        .collect();
    tracing::debug!(
        sensors = selected.len(),
        "filtered sensors based on attribute filters"
    );
    selected
}

fn in_range(value: Option<f64>, range: Option<&CoordinateRange>) -> bool {
    match (range, value) {
        (None, _) => true,
        (Some(range), Some(value)) => range.contains(value),
        (Some(_), None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FilterField;

    fn sensor(id: &str, station: &str, lon: Option<f64>, lat: Option<f64>) -> Sensor {
        Sensor {
            station_id: station.to_string(),
            element_id: id.to_string(),
            element_name: None,
            station_name: None,
            instrument: Some("idrometro".to_string()),
            quantity: Some("water_level".to_string()),
            measurement_unit: Some("m".to_string()),
            longitude: lon,
            latitude: lat,
        }
    }

    fn catalog() -> Vec<Sensor> {
        vec![
            sensor("1", "A", Some(12.30), Some(44.00)),
            sensor("2", "B", Some(12.95), Some(44.50)),
            sensor("3", "C", Some(12.50), Some(45.10)),
            sensor("4", "A", None, None),
            sensor("5", "D", Some(12.90), Some(43.90)),
        ]
    }

    fn ids(sensors: &[Sensor]) -> Vec<&str> {
        sensors.iter().map(|s| s.element_id.as_str()).collect()
    }

    #[test]
    fn no_filters_pass_through() {
        let result = filter_sensors(&catalog(), None, None, None);
        assert_eq!(result, catalog());
    }

    #[test]
    fn latitude_range_is_inclusive() {
        let lat = CoordinateRange::latitude(43.9, 44.5).unwrap();
        let result = filter_sensors(&catalog(), Some(&lat), None, None);
        assert_eq!(ids(&result), vec!["1", "2", "5"]);
    }

    #[test]
    fn spatial_ranges_combine_with_and() {
        let lat = CoordinateRange::latitude(43.9, 44.8).unwrap();
        let lon = CoordinateRange::longitude(12.2, 12.9).unwrap();
        let result = filter_sensors(&catalog(), Some(&lat), Some(&lon), None);
        assert_eq!(ids(&result), vec!["1", "5"]);
    }

    #[test]
    fn attribute_values_or_within_and_across_fields() {
        let mut attrs = AttributeFilters::new();
        attrs.insert(FilterField::Station, ["A", "B"]);
        let result = filter_sensors(&catalog(), None, None, Some(&attrs));
        assert_eq!(ids(&result), vec!["1", "2", "4"]);

        attrs.insert(FilterField::Element, ["2", "3"]);
        let result = filter_sensors(&catalog(), None, None, Some(&attrs));
        assert_eq!(ids(&result), vec!["2"]);
    }

    #[test]
    fn unlocated_sensors_drop_under_spatial_filter() {
        let lon = CoordinateRange::longitude(-180.0, 180.0).unwrap();
        let result = filter_sensors(&catalog(), None, Some(&lon), None);
        assert!(!ids(&result).contains(&"4"));
    }
}
