use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CacheInfo, ClearResult, ProgressEvent, ProgressSink, RetrievalOutput};
use crate::error::{ErrorKind, RetrieverError};
use crate::feature::FeatureCollection;

/// Caller-facing result of a run. Single outputs use the singular keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEnvelope {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uris: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepaths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_collection: Option<FeatureCollection>,
}

impl StatusEnvelope {
    fn empty(status: &str) -> Self {
        Self {
            status: status.to_string(),
            error: None,
            message: None,
            uri: None,
            uris: None,
            filepath: None,
            filepaths: None,
            feature_collection: None,
        }
    }

    pub fn from_output(output: RetrievalOutput) -> Self {
        let mut envelope = Self::empty("OK");
        match output {
            RetrievalOutput::Written { filepaths, uris } => {
                (envelope.uri, envelope.uris) = singular_or_plural(uris);
                (envelope.filepath, envelope.filepaths) = singular_or_plural(filepaths);
            }
            RetrievalOutput::Inline(collection) => {
                envelope.feature_collection = Some(collection);
            }
        }
        envelope
    }

    pub fn failure(kind: ErrorKind, error: &RetrieverError) -> Self {
        let mut envelope = Self::empty(kind.status());
        envelope.error = Some(kind);
        envelope.message = Some(error.to_string());
        envelope
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

fn singular_or_plural(mut items: Vec<String>) -> (Option<String>, Option<Vec<String>>) {
    match items.len() {
        0 => (None, None),
        1 => (items.pop(), None),
        _ => (None, Some(items)),
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_envelope(envelope: &StatusEnvelope) -> io::Result<()> {
        Self::print_json(envelope)
    }

    pub fn print_info(info: &CacheInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the log, for runs without a structured consumer.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}
