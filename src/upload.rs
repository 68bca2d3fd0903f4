use std::fs;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use camino::Utf8Path;
use tokio::runtime::{Builder, Runtime};

use crate::config::RetrieverConfig;
use crate::domain::BucketUri;
use crate::error::RetrieverError;

pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";

/// Object-store upload collaborator. `Ok(false)` means the store refused the object.
pub trait Uploader: Send + Sync {
    fn upload(&self, file: &Utf8Path, destination: &str) -> Result<bool, RetrieverError>;
}

/// S3 uploads through the AWS SDK, with credentials from the usual AWS provider chain.
///
/// The SDK is async; calls are driven on a private current-thread runtime.
pub struct S3Uploader {
    runtime: Runtime,
    client: Client,
}

impl S3Uploader {
    pub fn new(config: &RetrieverConfig) -> Result<Self, RetrieverError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| RetrieverError::Upload(format!("runtime: {err}")))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.s3_region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared_config = runtime.block_on(loader.load());

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            runtime,
            client: Client::from_conf(builder.build()),
        })
    }
}

impl Uploader for S3Uploader {
    fn upload(&self, file: &Utf8Path, destination: &str) -> Result<bool, RetrieverError> {
        let (bucket, key) = object_location(destination)?;
        let body = fs::read(file.as_std_path())
            .map_err(|err| RetrieverError::Filesystem(format!("read {file}: {err}")))?;

        let result = self.runtime.block_on(
            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(ByteStream::from(body))
                .content_type(GEOJSON_CONTENT_TYPE)
                .send(),
        );
        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                tracing::warn!(
                    destination,
                    error = %DisplayErrorContext(&err),
                    "put_object failed"
                );
                Ok(false)
            }
        }
    }
}

/// Splits `s3://bucket/key` into bucket name and object key.
pub fn object_location(destination: &str) -> Result<(String, String), RetrieverError> {
    let uri: BucketUri = destination.parse()?;
    let key = uri.key().ok_or_else(|| {
        RetrieverError::invalid(format!("destination has no object key: {destination}"))
    })?;
    Ok((uri.bucket().to_string(), key.to_string()))
}
