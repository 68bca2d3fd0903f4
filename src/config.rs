use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::RetrieverError;

pub const DEFAULT_BASE_URL: &str = "https://arpaebo.caedns.it/datascape";
pub const DEFAULT_CONFIG_FILE: &str = "cae-retriever.json";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const MAX_CONCURRENCY: usize = 64;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub accept_invalid_certs: Option<bool>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub work_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub s3_region: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub base_url: String,
    pub accept_invalid_certs: bool,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub cache_dir: Utf8PathBuf,
    pub work_dir: Utf8PathBuf,
    /// Overrides the region the AWS SDK resolves from the environment.
    pub s3_region: Option<String>,
    /// S3-compatible endpoint, addressed path-style when set.
    pub s3_endpoint: Option<String>,
}

/// Client credentials exchanged for an access token.
#[derive(Clone, Default)]
pub struct ClientCredentials {
    pub username: String,
    pub password: String,
    pub grant_type: String,
    pub client_id: String,
}

impl ClientCredentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Self {
            username: var("CAE_API_USERNAME"),
            password: var("CAE_API_PASSWORD"),
            grant_type: var("CAE_API_GRANT_TYPE"),
            client_id: var("CAE_API_CLIENT_ID"),
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .finish()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<RetrieverConfig, RetrieverError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RetrieverError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RetrieverError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<RetrieverConfig, RetrieverError> {
        let concurrency = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(RetrieverError::ConfigParse(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {concurrency}"
            )));
        }

        let cache_dir = match config.cache_dir {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };
        let work_dir = match config.work_dir {
            Some(dir) => dir,
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
                Utf8PathBuf::from_path_buf(cwd)
                    .map_err(|_| RetrieverError::Filesystem("invalid working directory".to_string()))?
            }
        };

        Ok(RetrieverConfig {
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            accept_invalid_certs: config.accept_invalid_certs.unwrap_or(true),
            concurrency,
            timeout_secs: config.timeout_secs.unwrap_or(60),
            cache_dir,
            work_dir,
            s3_region: config.s3_region,
            s3_endpoint: config.s3_endpoint,
        })
    }
}

fn default_cache_dir() -> Result<Utf8PathBuf, RetrieverError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("cae-retriever")).ok()
        })
        .ok_or_else(|| RetrieverError::Filesystem("unable to resolve cache directory".to_string()))
}
