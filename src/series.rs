use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use crate::client::{DataPoint, UpstreamClient};
use crate::domain::{Credential, Observation, Sensor, SensorSeries, TimeWindow, parse_iso8601};
use crate::error::RetrieverError;

pub fn fetch_series<C: UpstreamClient>(
    client: &C,
    credential: &Credential,
    element_id: &str,
    window: &TimeWindow,
) -> Result<Vec<Observation>, RetrieverError> {
    let points = client.element_data(credential, element_id, window)?;
    let observations = to_observations(element_id, points, window)?;
    tracing::debug!(
        element = element_id,
        observations = observations.len(),
        "retrieved data points for sensor"
    );
    Ok(observations)
}

/// Drops null values and anything outside the window; keeps upstream order.
pub fn to_observations(
    element_id: &str,
    points: Vec<DataPoint>,
    window: &TimeWindow,
) -> Result<Vec<Observation>, RetrieverError> {
    let mut observations = Vec::with_capacity(points.len());
    for point in points {
        let Some(value) = point.value else {
            continue;
        };
        let timestamp = parse_iso8601(&point.iso_time).ok_or_else(|| {
            RetrieverError::UpstreamHttp(format!(
                "invalid timestamp '{}' in series of element {element_id}",
                point.iso_time
            ))
        })?;
        if window.contains(timestamp) {
            observations.push(Observation { timestamp, value });
        }
    }
    Ok(observations)
}

/// Fetches every sensor's series over at most `concurrency` worker threads.
///
/// Output order follows `sensors`. The first failure stops workers from picking up
/// new sensors and is returned; no partial result escapes.
pub fn fetch_all<C: UpstreamClient>(
    client: &C,
    credential: &Credential,
    sensors: Vec<Sensor>,
    window: &TimeWindow,
    concurrency: usize,
) -> Result<Vec<SensorSeries>, RetrieverError> {
    if sensors.is_empty() {
        return Ok(Vec::new());
    }
    let workers = concurrency.clamp(1, sensors.len());
    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let sensors = &sensors;
            let next = &next;
            let failed = &failed;
            scope.spawn(move || {
                while !failed.load(Ordering::Relaxed) {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(sensor) = sensors.get(index) else {
                        break;
                    };
                    let result = fetch_series(client, credential, &sensor.element_id, window);
                    if result.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<Vec<Observation>>> = vec![None; sensors.len()];
    let mut first_error: Option<(usize, RetrieverError)> = None;
    for (index, result) in rx {
        match result {
            Ok(observations) => slots[index] = Some(observations),
            Err(err) => {
                if first_error.as_ref().map(|(at, _)| index < *at).unwrap_or(true) {
                    first_error = Some((index, err));
                }
            }
        }
    }
    if let Some((index, err)) = first_error {
        tracing::warn!(
            element = %sensors[index].element_id,
            error = %err,
            "series retrieval failed, aborting"
        );
        return Err(err);
    }

    sensors
        .into_iter()
        .zip(slots)
        .map(|(sensor, observations)| {
            let observations = observations.ok_or_else(|| {
                RetrieverError::UpstreamHttp(format!(
                    "no series collected for element {}",
                    sensor.element_id
                ))
            })?;
            Ok(SensorSeries {
                sensor,
                observations,
            })
        })
        .collect()
}
