use std::fmt;
use std::fs;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;
use tempfile::TempDir;

use crate::auth::CredentialCache;
use crate::cache::{CATALOG_KEY, CREDENTIAL_KEY, CacheStore, write_bytes_atomic};
use crate::catalog::CatalogCache;
use crate::client::UpstreamClient;
use crate::config::{ClientCredentials, DEFAULT_CONCURRENCY};
use crate::domain::{Credential, Sensor, SensorSeries};
use crate::error::RetrieverError;
use crate::feature::{FeatureCollection, assemble};
use crate::filter::filter_sensors;
use crate::output::StatusEnvelope;
use crate::request::{RawRequest, RetrievalRequest};
use crate::series::fetch_all;
use crate::upload::Uploader;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub credentials: ClientCredentials,
    pub concurrency: usize,
    pub work_dir: Utf8PathBuf,
}

impl RunOptions {
    pub fn new(credentials: ClientCredentials, work_dir: Utf8PathBuf) -> Self {
        Self {
            credentials,
            concurrency: DEFAULT_CONCURRENCY,
            work_dir,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Authenticating,
    CatalogLoading,
    Filtering,
    FetchingSeries,
    Assembling,
    Writing,
    Uploading,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validating => "Validating",
            Phase::Authenticating => "Authenticating",
            Phase::CatalogLoading => "CatalogLoading",
            Phase::Filtering => "Filtering",
            Phase::FetchingSeries => "FetchingSeries",
            Phase::Assembling => "Assembling",
            Phase::Writing => "Writing",
            Phase::Uploading => "Uploading",
            Phase::Done => "Done",
            Phase::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutput {
    Written {
        filepaths: Vec<String>,
        uris: Vec<String>,
    },
    Inline(FeatureCollection),
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub credential_removed: bool,
    pub catalog_removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub credential_expires_at: Option<String>,
    pub credential_expired: Option<bool>,
    pub catalog_sensors: Option<usize>,
    pub catalog_stored_at: Option<String>,
}

struct PhaseTracker<'a> {
    sink: &'a dyn ProgressSink,
    started: Instant,
    current: Phase,
}

impl<'a> PhaseTracker<'a> {
    fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            started: Instant::now(),
            current: Phase::Validating,
        }
    }

    fn enter(&mut self, phase: Phase, detail: &str) {
        self.current = phase;
        tracing::debug!(phase = %phase, "{detail}");
        self.sink.event(ProgressEvent {
            message: format!("phase={phase}; {detail}"),
            elapsed: Some(self.started.elapsed()),
        });
    }
}

/// Transient working storage, removed on drop whichever way the run ends.
struct WorkDir {
    dir: Option<TempDir>,
    path: Utf8PathBuf,
}

impl WorkDir {
    fn create(root: &Utf8Path) -> Result<Self, RetrieverError> {
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
        let dir = tempfile::Builder::new()
            .prefix("CAERetrieverProcessor_tmp")
            .tempdir_in(root.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|_| RetrieverError::Filesystem("non-utf8 working directory".to_string()))?;
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => tracing::debug!(path = %self.path, "cleaned up temporary data folder"),
            Err(err) => tracing::warn!(
                path = %self.path,
                error = %err,
                "failed to remove temporary data folder"
            ),
        }
    }
}

pub struct App<C: UpstreamClient, K: CacheStore, U: Uploader> {
    client: C,
    cache: K,
    uploader: U,
    options: RunOptions,
}

impl<C: UpstreamClient, K: CacheStore, U: Uploader> App<C, K, U> {
    pub fn new(client: C, cache: K, uploader: U, options: RunOptions) -> Self {
        Self {
            client,
            cache,
            uploader,
            options,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cache(&self) -> &K {
        &self.cache
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Runs the request and folds request-level failures into a status envelope.
    ///
    /// Failures outside the request taxonomy are returned as errors for the
    /// hosting adapter to surface.
    pub fn execute(
        &self,
        raw: &RawRequest,
        sink: &dyn ProgressSink,
    ) -> Result<StatusEnvelope, RetrieverError> {
        match self.run(raw, sink) {
            Ok(output) => Ok(StatusEnvelope::from_output(output)),
            Err(err) => match err.kind() {
                Some(kind) => Ok(StatusEnvelope::failure(kind, &err)),
                None => Err(err),
            },
        }
    }

    pub fn run(
        &self,
        raw: &RawRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RetrievalOutput, RetrieverError> {
        let mut tracker = PhaseTracker::new(sink);
        let result = self.run_phases(raw, &mut tracker);
        match &result {
            Ok(_) => tracker.enter(Phase::Done, "retrieval completed"),
            Err(err) => {
                let failed_in = tracker.current;
                tracker.enter(Phase::Failed, &format!("failed during {failed_in}: {err}"));
            }
        }
        result
    }

    fn run_phases(
        &self,
        raw: &RawRequest,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<RetrievalOutput, RetrieverError> {
        tracker.enter(Phase::Validating, "validating request");
        let request = raw.validate()?;
        tracing::debug!(request = ?request, "running CAE retriever");

        let workdir = WorkDir::create(&self.options.work_dir)?;

        tracker.enter(Phase::Authenticating, "resolving access token");
        let credential = CredentialCache::new(&self.cache, &self.options.credentials)
            .get_token(&self.client, Utc::now())?;

        tracker.enter(Phase::CatalogLoading, "loading sensor catalog");
        let catalog = CatalogCache::new(&self.cache).get_catalog(&self.client, &credential)?;

        tracker.enter(Phase::Filtering, &format!("filtering {} sensors", catalog.len()));
        let selected = self.select(&catalog, &request);

        tracker.enter(
            Phase::FetchingSeries,
            &format!("fetching series for {} sensors", selected.len()),
        );
        let series = self.fetch(&credential, selected, &request)?;

        tracker.enter(Phase::Assembling, "building feature collection");
        let collection = assemble(&series);

        tracker.enter(Phase::Writing, "writing feature collection");
        let path = match &request.out {
            Some(out) => out.clone(),
            None => workdir
                .path()
                .join(request.default_file_name(Utc::now().naive_utc())),
        };
        write_bytes_atomic(&path, &collection.to_json_bytes()?)?;
        tracing::info!(path = %path, features = collection.features.len(), "feature collection saved");
        let written = vec![path];

        let mut uris = Vec::new();
        if let Some(bucket) = &request.bucket_destination {
            tracker.enter(Phase::Uploading, &format!("uploading to {bucket}"));
            for file in &written {
                let file_name = file.file_name().ok_or_else(|| {
                    RetrieverError::Filesystem(format!("output path has no file name: {file}"))
                })?;
                let uri = bucket.join(file_name);
                if !self.uploader.upload(file, &uri)? {
                    return Err(RetrieverError::Upload(format!(
                        "failed to upload data to bucket {bucket}"
                    )));
                }
                tracing::info!(uri = %uri, "data stored in bucket");
                uris.push(uri);
            }
        }

        if request.out.is_some() || request.bucket_destination.is_some() {
            let filepaths = if request.out.is_some() {
                written.iter().map(|path| path.to_string()).collect()
            } else {
                Vec::new()
            };
            return Ok(RetrievalOutput::Written { filepaths, uris });
        }
        Ok(RetrievalOutput::Inline(collection))
    }

    fn select(&self, catalog: &[Sensor], request: &RetrievalRequest) -> Vec<Sensor> {
        filter_sensors(
            catalog,
            request.lat_range.as_ref(),
            request.long_range.as_ref(),
            Some(&request.filters),
        )
    }

    fn fetch(
        &self,
        credential: &Credential,
        sensors: Vec<Sensor>,
        request: &RetrievalRequest,
    ) -> Result<Vec<SensorSeries>, RetrieverError> {
        let series = fetch_all(
            &self.client,
            credential,
            sensors,
            &request.window,
            self.options.concurrency,
        )?;
        tracing::debug!(sensors = series.len(), "retrieved sensors data from CAE API");
        Ok(series)
    }

    pub fn clear_cache(
        &self,
        auth_only: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ClearResult, RetrieverError> {
        sink.event(ProgressEvent {
            message: "phase=Cache; clearing persisted state".to_string(),
            elapsed: None,
        });
        let credential_removed = self.cache.remove(CREDENTIAL_KEY)?;
        let catalog_removed = if auth_only {
            false
        } else {
            self.cache.remove(CATALOG_KEY)?
        };
        Ok(ClearResult {
            credential_removed,
            catalog_removed,
        })
    }

    pub fn cache_info(&self) -> Result<CacheInfo, RetrieverError> {
        let now = Utc::now();
        let credential = self
            .cache
            .get(CREDENTIAL_KEY)?
            .map(|entry| entry.decode::<Credential>())
            .transpose()?;
        let catalog = self.cache.get(CATALOG_KEY)?;
        let catalog_sensors = catalog
            .as_ref()
            .map(|entry| entry.decode::<Vec<Sensor>>().map(|sensors| sensors.len()))
            .transpose()?;
        Ok(CacheInfo {
            credential_expires_at: credential.as_ref().map(|c| c.expires_at.to_rfc3339()),
            credential_expired: credential.as_ref().map(|c| c.is_expired(now)),
            catalog_sensors,
            catalog_stored_at: catalog.map(|entry| entry.stored_at.to_rfc3339()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_is_removed_with_its_contents() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("work")).unwrap();

        let workdir = WorkDir::create(&root).unwrap();
        let path = workdir.path().to_path_buf();
        assert!(path.starts_with(&root));
        assert!(path.file_name().unwrap().starts_with("CAERetrieverProcessor_tmp"));
        fs::create_dir_all(path.join("nested").as_std_path()).unwrap();
        fs::write(path.join("nested").join("out.geojson").as_std_path(), b"{}").unwrap();

        drop(workdir);
        assert!(!path.as_std_path().exists());
        assert!(root.as_std_path().exists());
    }
}
