use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::config::{ClientCredentials, RetrieverConfig};
use crate::domain::{Credential, TimeWindow};
use crate::error::RetrieverError;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    #[serde(deserialize_with = "id_string")]
    pub station_id: String,
    #[serde(deserialize_with = "id_string")]
    pub element_id: String,
    #[serde(default)]
    pub element_name: Option<String>,
    #[serde(default)]
    pub station_name: Option<String>,
    #[serde(default)]
    pub meas_unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationRecord {
    #[serde(rename = "i", deserialize_with = "id_string")]
    pub station_id: String,
    #[serde(rename = "x", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "y", default)]
    pub latitude: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSpec {
    #[serde(deserialize_with = "id_string")]
    pub element_id: String,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub quantity_descr_c: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPoint {
    #[serde(rename = "IsoTime")]
    pub iso_time: String,
    #[serde(rename = "Value", default)]
    pub value: Option<f64>,
}

pub trait UpstreamClient: Send + Sync {
    fn authenticate(&self, credentials: &ClientCredentials)
    -> Result<TokenResponse, RetrieverError>;
    fn list_elements(&self, credential: &Credential) -> Result<Vec<ElementRecord>, RetrieverError>;
    fn list_locations(&self, credential: &Credential)
    -> Result<Vec<LocationRecord>, RetrieverError>;
    fn element_spec(
        &self,
        credential: &Credential,
        element_id: &str,
    ) -> Result<ElementSpec, RetrieverError>;
    fn element_data(
        &self,
        credential: &Credential,
        element_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<DataPoint>, RetrieverError>;
}

/// Attempt budget and backoff for read-only upstream calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total sends, including the first.
    pub attempts: u32,
    pub first_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            first_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-send number `retry + 1`; doubles each time.
    pub fn delay(&self, retry: u32) -> Duration {
        self.first_delay.saturating_mul(1 << retry.min(16))
    }
}

#[derive(Clone)]
pub struct DatascapeHttpClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl DatascapeHttpClient {
    pub fn new(config: &RetrieverConfig) -> Result<Self, RetrieverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cae-retriever/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RetrieverError::UpstreamHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|err| RetrieverError::UpstreamHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn token_url(&self) -> String {
        format!("{}/connect/token", self.base_url)
    }

    pub fn elements_url(&self) -> String {
        format!("{}/v1/elements", self.base_url)
    }

    pub fn locations_url(&self) -> String {
        format!("{}/v1/locations", self.base_url)
    }

    pub fn element_spec_url(&self, element_id: &str) -> String {
        format!("{}/v2/elements/{element_id}", self.base_url)
    }

    pub fn element_data_url(&self, element_id: &str) -> String {
        format!("{}/v1/data/{element_id}", self.base_url)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        credential: &Credential,
        query: &[(&str, String)],
    ) -> Result<T, RetrieverError> {
        let authorization = HeaderValue::from_str(&credential.authorization())
            .map_err(|err| RetrieverError::UpstreamHttp(err.to_string()))?;
        let response = self.send_idempotent(|| {
            self.client
                .get(url)
                .header(AUTHORIZATION, authorization.clone())
                .query(query)
        })?;
        let response = handle_status(url, response)?;
        response
            .json()
            .map_err(|err| RetrieverError::UpstreamHttp(format!("decode {url}: {err}")))
    }

    /// Sends an idempotent request, re-sending on transient failures per the retry policy.
    fn send_idempotent<F>(&self, build: F) -> Result<Response, RetrieverError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry = 0;
        loop {
            let exhausted = retry + 1 >= self.retry.attempts;
            let reason = match build().send() {
                Ok(response) if exhausted || !transient_status(response.status().as_u16()) => {
                    return Ok(response);
                }
                Ok(response) => format!("status {}", response.status()),
                Err(err) if exhausted || !(err.is_timeout() || err.is_connect()) => {
                    return Err(RetrieverError::UpstreamHttp(err.to_string()));
                }
                Err(err) => err.to_string(),
            };
            let delay = self.retry.delay(retry);
            tracing::debug!(%reason, retry, ?delay, "upstream request will be re-sent");
            thread::sleep(delay);
            retry += 1;
        }
    }
}

impl UpstreamClient for DatascapeHttpClient {
    // Sent exactly once; only read-only GETs go through the retry loop.
    fn authenticate(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<TokenResponse, RetrieverError> {
        let url = self.token_url();
        let client_instance = uuid::Uuid::new_v4().simple().to_string();
        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("grant_type", credentials.grant_type.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_instance", client_instance.as_str()),
        ];
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .map_err(|err| RetrieverError::UpstreamHttp(err.to_string()))?;
        if response.status().as_u16() == 400 {
            let message = response
                .text()
                .unwrap_or_else(|_| "authentication rejected".to_string());
            return Err(RetrieverError::Denied {
                endpoint: url,
                status: 400,
                message,
            });
        }
        let response = handle_status(&url, response)?;
        response
            .json()
            .map_err(|err| RetrieverError::UpstreamHttp(format!("decode {url}: {err}")))
    }

    fn list_elements(&self, credential: &Credential) -> Result<Vec<ElementRecord>, RetrieverError> {
        self.get_json(&self.elements_url(), credential, &[])
    }

    fn list_locations(
        &self,
        credential: &Credential,
    ) -> Result<Vec<LocationRecord>, RetrieverError> {
        self.get_json(
            &self.locations_url(),
            credential,
            &[("category", "All".to_string())],
        )
    }

    fn element_spec(
        &self,
        credential: &Credential,
        element_id: &str,
    ) -> Result<ElementSpec, RetrieverError> {
        self.get_json(&self.element_spec_url(element_id), credential, &[])
    }

    fn element_data(
        &self,
        credential: &Credential,
        element_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<DataPoint>, RetrieverError> {
        self.get_json(
            &self.element_data_url(element_id),
            credential,
            &series_query(window),
        )
    }
}

pub fn series_query(window: &TimeWindow) -> Vec<(&'static str, String)> {
    let mut query = vec![("from", window.start.and_utc().to_rfc3339())];
    if let Some(end) = window.end {
        query.push(("to", end.and_utc().to_rfc3339()));
    }
    query.push(("outUtcOffset", "+00:00".to_string()));
    for part in ["IsoTime", "Value", "Quality"] {
        query.push(("part", part.to_string()));
    }
    query
}

fn handle_status(endpoint: &str, response: Response) -> Result<Response, RetrieverError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "upstream request failed".to_string());
    if matches!(status, 401 | 403) {
        return Err(RetrieverError::Denied {
            endpoint: endpoint.to_string(),
            status,
            message,
        });
    }
    Err(RetrieverError::Upstream {
        endpoint: endpoint.to_string(),
        status,
        message,
    })
}

fn transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Upstream identifiers arrive as either JSON strings or numbers.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(value) => value,
        RawId::Integer(value) => value.to_string(),
        RawId::Float(value) => value.to_string(),
    })
}
