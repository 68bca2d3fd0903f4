use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RetrieverError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("access denied by {endpoint} (status {status}): {message}")]
    Denied {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("{endpoint} returned status {status}: {message}")]
    Upstream {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("upstream request failed: {0}")]
    UpstreamHttp(String),

    #[error("cached token expired at {expires_at}, clear the credential cache to re-authenticate")]
    #[diagnostic(help("run `cae-retriever cache clear --auth-only`"))]
    ExpiredToken { expires_at: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("upload failed: {0}")]
    Upload(String),
}

/// Failure categories reported to callers in the status envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Denied,
    UpstreamError,
    ExpiredToken,
}

impl ErrorKind {
    pub fn status(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID",
            ErrorKind::Denied => "DENIED",
            ErrorKind::ExpiredToken => "EXPIRED",
            ErrorKind::UpstreamError => "ERROR",
        }
    }
}

impl RetrieverError {
    /// `None` for failures outside the request taxonomy (local I/O, cache, config).
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RetrieverError::InvalidInput(_) => Some(ErrorKind::InvalidInput),
            RetrieverError::Denied { .. } => Some(ErrorKind::Denied),
            RetrieverError::Upstream { .. }
            | RetrieverError::UpstreamHttp(_)
            | RetrieverError::Upload(_) => Some(ErrorKind::UpstreamError),
            RetrieverError::ExpiredToken { .. } => Some(ErrorKind::ExpiredToken),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        RetrieverError::InvalidInput(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_mapping() {
        let err = RetrieverError::Upstream {
            endpoint: "v1/data/42".to_string(),
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.kind(), Some(ErrorKind::UpstreamError));
        assert_eq!(err.kind().unwrap().status(), "ERROR");

        let err = RetrieverError::Upload("failed to upload data to bucket s3://b".to_string());
        assert_eq!(err.kind(), Some(ErrorKind::UpstreamError));

        let err = RetrieverError::Filesystem("disk full".to_string());
        assert_eq!(err.kind(), None);
    }
}
