#![allow(dead_code)]

use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use cae_retriever::app::{App, ProgressEvent, ProgressSink, RunOptions};
use cae_retriever::cache::CacheStore;
use cae_retriever::client::{
    DataPoint, ElementRecord, ElementSpec, LocationRecord, TokenResponse, UpstreamClient,
};
use cae_retriever::config::{ClientCredentials, RetrieverConfig};
use cae_retriever::domain::{Credential, TimeWindow};
use cae_retriever::error::RetrieverError;
use cae_retriever::request::{RawRequest, TimeRangeInput};
use cae_retriever::upload::Uploader;

pub const TOKEN: &str = include_str!("../fixtures/token.json");
pub const ELEMENTS: &str = include_str!("../fixtures/elements.json");
pub const LOCATIONS: &str = include_str!("../fixtures/locations.json");
pub const SPECS: &str = include_str!("../fixtures/specs.json");
pub const DATA: &str = include_str!("../fixtures/data.json");

/// Serves the JSON fixtures and counts calls per endpoint.
#[derive(Default)]
pub struct MockUpstream {
    pub auth_calls: Mutex<usize>,
    pub element_calls: Mutex<usize>,
    pub location_calls: Mutex<usize>,
    pub spec_calls: Mutex<usize>,
    pub data_calls: Mutex<usize>,
    pub failing_element: Option<String>,
}

impl MockUpstream {
    pub fn failing_on(element_id: &str) -> Self {
        Self {
            failing_element: Some(element_id.to_string()),
            ..Self::default()
        }
    }

    pub fn count(counter: &Mutex<usize>) -> usize {
        *counter.lock().unwrap()
    }

    pub fn catalog_calls(&self) -> usize {
        Self::count(&self.element_calls)
            + Self::count(&self.location_calls)
            + Self::count(&self.spec_calls)
    }

    fn bump(counter: &Mutex<usize>) {
        let mut guard = counter.lock().unwrap();
        *guard += 1;
    }
}

impl UpstreamClient for MockUpstream {
    fn authenticate(
        &self,
        _credentials: &ClientCredentials,
    ) -> Result<TokenResponse, RetrieverError> {
        Self::bump(&self.auth_calls);
        Ok(serde_json::from_str(TOKEN).unwrap())
    }

    fn list_elements(&self, _credential: &Credential) -> Result<Vec<ElementRecord>, RetrieverError> {
        Self::bump(&self.element_calls);
        Ok(serde_json::from_str(ELEMENTS).unwrap())
    }

    fn list_locations(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<LocationRecord>, RetrieverError> {
        Self::bump(&self.location_calls);
        Ok(serde_json::from_str(LOCATIONS).unwrap())
    }

    fn element_spec(
        &self,
        _credential: &Credential,
        element_id: &str,
    ) -> Result<ElementSpec, RetrieverError> {
        Self::bump(&self.spec_calls);
        let specs: Vec<ElementSpec> = serde_json::from_str(SPECS).unwrap();
        specs
            .into_iter()
            .find(|spec| spec.element_id == element_id)
            .ok_or_else(|| RetrieverError::Upstream {
                endpoint: format!("v2/elements/{element_id}"),
                status: 404,
                message: "not found".to_string(),
            })
    }

    fn element_data(
        &self,
        _credential: &Credential,
        element_id: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<DataPoint>, RetrieverError> {
        Self::bump(&self.data_calls);
        if self.failing_element.as_deref() == Some(element_id) {
            return Err(RetrieverError::Upstream {
                endpoint: format!("v1/data/{element_id}"),
                status: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        Ok(serde_json::from_str(DATA).unwrap())
    }
}

pub struct MockUploader {
    pub accept: bool,
    pub uploads: Mutex<Vec<(String, String)>>,
}

impl MockUploader {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing() -> Self {
        Self {
            accept: false,
            uploads: Mutex::new(Vec::new()),
        }
    }
}

impl Uploader for MockUploader {
    fn upload(&self, file: &Utf8Path, destination: &str) -> Result<bool, RetrieverError> {
        assert!(file.as_std_path().exists(), "uploaded file must exist");
        self.uploads
            .lock()
            .unwrap()
            .push((file.to_string(), destination.to_string()));
        Ok(self.accept)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

pub fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

pub fn app<K: CacheStore>(
    upstream: MockUpstream,
    cache: K,
    uploader: MockUploader,
    work_dir: &Utf8Path,
) -> App<MockUpstream, K, MockUploader> {
    let options = RunOptions::new(ClientCredentials::default(), work_dir.to_path_buf());
    App::new(upstream, cache, uploader, options)
}

/// Scenario request: three of the five fixture sensors fall inside these ranges.
pub fn scenario_request() -> RawRequest {
    RawRequest {
        lat_range: Some(vec![43.9, 44.8]),
        long_range: Some(vec![12.2, 12.9]),
        time_range: Some(TimeRangeInput::List(vec![
            "2025-07-23T10:00:00".to_string(),
            "2025-07-23T12:00:00".to_string(),
        ])),
        ..RawRequest::default()
    }
}

pub fn test_config(root: &Utf8Path) -> RetrieverConfig {
    RetrieverConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        accept_invalid_certs: false,
        concurrency: 4,
        timeout_secs: 5,
        cache_dir: root.join("cache"),
        work_dir: root.join("work"),
        s3_region: None,
        s3_endpoint: None,
    }
}
