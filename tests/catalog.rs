mod common;

use cae_retriever::catalog::merge_catalog;
use cae_retriever::client::{DataPoint, ElementRecord, ElementSpec, LocationRecord, TokenResponse};
use cae_retriever::domain::CoordinateRange;
use cae_retriever::filter::filter_sensors;

use common::{DATA, ELEMENTS, LOCATIONS, SPECS, TOKEN};

fn fixtures() -> (Vec<ElementRecord>, Vec<LocationRecord>, Vec<ElementSpec>) {
    (
        serde_json::from_str(ELEMENTS).unwrap(),
        serde_json::from_str(LOCATIONS).unwrap(),
        serde_json::from_str(SPECS).unwrap(),
    )
}

#[test]
fn upstream_payloads_decode() {
    let token: TokenResponse = serde_json::from_str(TOKEN).unwrap();
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_in, 3600);

    let (elements, locations, specs) = fixtures();
    assert_eq!(elements[0].element_id, "5001");
    assert_eq!(elements[0].station_id, "1001");
    assert_eq!(locations[0].station_id, "1001");
    assert_eq!(locations[0].longitude, Some(12.24));
    assert_eq!(specs[0].quantity_descr_c.as_deref(), Some("Water Level"));

    let points: Vec<DataPoint> = serde_json::from_str(DATA).unwrap();
    assert_eq!(points.len(), 6);
    assert!(points[2].value.is_none());
}

#[test]
fn merge_normalizes_quantities_and_keeps_order() {
    let (elements, locations, specs) = fixtures();
    let catalog = merge_catalog(elements, &locations, &specs);

    let ids: Vec<&str> = catalog.iter().map(|s| s.element_id.as_str()).collect();
    assert_eq!(ids, vec!["5001", "5002", "5003", "5004", "5005"]);
    assert_eq!(catalog[1].quantity.as_deref(), Some("accumulated_rainfall"));
    assert_eq!(catalog[2].instrument.as_deref(), Some("Termometro"));
    assert_eq!(catalog[0].coordinates(), Some((12.24, 44.14)));
}

#[test]
fn unmatched_records_leave_fields_empty() {
    let (elements, locations, specs) = fixtures();
    let locations: Vec<LocationRecord> = locations
        .into_iter()
        .filter(|loc| loc.station_id != "1003")
        .collect();
    let specs: Vec<ElementSpec> = specs
        .into_iter()
        .filter(|spec| spec.element_id != "5004")
        .collect();

    let catalog = merge_catalog(elements, &locations, &specs);
    assert_eq!(catalog.len(), 5);
    assert_eq!(catalog[2].coordinates(), None);
    assert_eq!(catalog[3].quantity, None);
    assert_eq!(catalog[3].instrument, None);
}

#[test]
fn spatial_filter_over_fixture_catalog() {
    let (elements, locations, specs) = fixtures();
    let catalog = merge_catalog(elements, &locations, &specs);
    let lat = CoordinateRange::latitude(43.9, 44.8).unwrap();
    let lon = CoordinateRange::longitude(12.2, 12.9).unwrap();

    let selected = filter_sensors(&catalog, Some(&lat), Some(&lon), None);
    let ids: Vec<&str> = selected.iter().map(|s| s.element_id.as_str()).collect();
    assert_eq!(ids, vec!["5001", "5002", "5003"]);
}
