use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AttributeFilters, BucketUri, CoordinateRange, FilterField, OutFormat, TimeWindow,
    format_iso8601, parse_iso8601,
};
use crate::error::RetrieverError;

pub const OUTPUT_PREFIX: &str = "CAERetrieverProcessor";

/// Request as received from the CLI or a job adapter, before validation.
/// Keys outside the request schema, such as job bookkeeping fields, are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawRequest {
    #[serde(default)]
    pub lat_range: Option<Vec<f64>>,
    #[serde(default)]
    pub long_range: Option<Vec<f64>>,
    #[serde(default)]
    pub time_range: Option<TimeRangeInput>,
    #[serde(default)]
    pub filters: Option<BTreeMap<String, FilterValue>>,
    #[serde(default)]
    pub out_format: Option<String>,
    #[serde(default)]
    pub bucket_destination: Option<String>,
    #[serde(default)]
    pub out: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TimeRangeInput {
    Single(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalRequest {
    pub lat_range: Option<CoordinateRange>,
    pub long_range: Option<CoordinateRange>,
    pub window: TimeWindow,
    pub filters: AttributeFilters,
    pub out_format: OutFormat,
    pub bucket_destination: Option<BucketUri>,
    pub out: Option<Utf8PathBuf>,
}

impl RawRequest {
    pub fn from_json(content: &str) -> Result<Self, RetrieverError> {
        serde_json::from_str(content)
            .map_err(|err| RetrieverError::invalid(format!("malformed request: {err}")))
    }

    /// Fields set on `overrides` replace the ones in `self`.
    pub fn merge(self, overrides: RawRequest) -> RawRequest {
        RawRequest {
            lat_range: overrides.lat_range.or(self.lat_range),
            long_range: overrides.long_range.or(self.long_range),
            time_range: overrides.time_range.or(self.time_range),
            filters: match (self.filters, overrides.filters) {
                (Some(mut base), Some(extra)) => {
                    base.extend(extra);
                    Some(base)
                }
                (base, extra) => extra.or(base),
            },
            out_format: overrides.out_format.or(self.out_format),
            bucket_destination: overrides.bucket_destination.or(self.bucket_destination),
            out: overrides.out.or(self.out),
        }
    }

    pub fn validate(&self) -> Result<RetrievalRequest, RetrieverError> {
        let lat_range = self
            .lat_range
            .as_deref()
            .map(|range| pair("lat_range", range))
            .transpose()?
            .map(|(min, max)| CoordinateRange::latitude(min, max))
            .transpose()?;
        let long_range = self
            .long_range
            .as_deref()
            .map(|range| pair("long_range", range))
            .transpose()?
            .map(|(min, max)| CoordinateRange::longitude(min, max))
            .transpose()?;

        let (start, end) = match &self.time_range {
            None => {
                return Err(RetrieverError::invalid(
                    "cannot process without a time value",
                ));
            }
            Some(TimeRangeInput::Single(start)) => (start.as_str(), None),
            Some(TimeRangeInput::List(items)) => match items.as_slice() {
                [start] => (start.as_str(), None),
                [start, end] => (start.as_str(), Some(end.as_str())),
                _ => {
                    return Err(RetrieverError::invalid(
                        "time_range must hold one or two timestamps",
                    ));
                }
            },
        };
        let start = parse_time("time_start", start)?;
        let end = end.map(|end| parse_time("time_end", end)).transpose()?;
        let window = TimeWindow::new(start, end)?;

        let mut filters = AttributeFilters::new();
        for (key, value) in self.filters.iter().flatten() {
            let field: FilterField = key.parse()?;
            let values = match value {
                FilterValue::Single(value) => vec![value.clone()],
                FilterValue::List(values) => values.clone(),
            };
            if values.is_empty() || values.iter().any(|value| value.trim().is_empty()) {
                return Err(RetrieverError::invalid(format!(
                    "filter {field} items must be non-empty strings"
                )));
            }
            filters.insert(field, values);
        }

        let out_format = self
            .out_format
            .as_deref()
            .map(str::parse::<OutFormat>)
            .transpose()?
            .unwrap_or_default();

        let bucket_destination = self
            .bucket_destination
            .as_deref()
            .map(str::parse::<BucketUri>)
            .transpose()?;

        let out = match &self.out {
            Some(out) => {
                let path = Utf8PathBuf::from(out.trim());
                let expected = out_format.extension();
                if path.extension() != Some(expected) || path.file_stem().is_none() {
                    return Err(RetrieverError::invalid(format!(
                        "out must end with \".{expected}\""
                    )));
                }
                Some(path)
            }
            None => None,
        };

        Ok(RetrievalRequest {
            lat_range,
            long_range,
            window,
            filters,
            out_format,
            bucket_destination,
            out,
        })
    }
}

impl RetrievalRequest {
    /// File name used when the caller gives no explicit `out` path.
    pub fn default_file_name(&self, now: NaiveDateTime) -> String {
        let end = self.window.end.unwrap_or(now);
        let name = format!(
            "{OUTPUT_PREFIX}__{}__{}.{}",
            format_iso8601(&self.window.start),
            format_iso8601(&end),
            self.out_format.extension()
        );
        name.replace([':', '/', '\\'], "-")
    }
}

fn pair(name: &str, values: &[f64]) -> Result<(f64, f64), RetrieverError> {
    match values {
        [min, max] => Ok((*min, *max)),
        _ => Err(RetrieverError::invalid(format!(
            "{name} must be a list of 2 elements"
        ))),
    }
}

fn parse_time(name: &str, value: &str) -> Result<NaiveDateTime, RetrieverError> {
    parse_iso8601(value).ok_or_else(|| {
        RetrieverError::invalid(format!(
            "{name} must be a valid datetime iso-format string, got '{value}'"
        ))
    })
}
