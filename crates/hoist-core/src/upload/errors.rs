//! Upload error types.
//!
//! `UploadError` is returned synchronously when a request is rejected at
//! submission time. `TransportFailure` describes a failure that happened
//! after admission and is delivered asynchronously on the result channel.
//!
//! Both are serializable and do not hold `std::io::Error`; I/O errors are
//! captured as a path plus message.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Status code reported for failures that never produced an HTTP response.
pub const LOCAL_FAILURE_STATUS: u16 = 500;

/// Error returned when an upload cannot be admitted.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum UploadError {
    /// Method is not POST, PUT, or PATCH.
    #[error("Method must be either POST | PUT | PATCH (got '{method}')")]
    InvalidMethod {
        /// The rejected method.
        method: String,
    },

    /// A multipart request without any files.
    #[error("There are no items to upload")]
    InvalidFiles,

    /// The URL does not parse as an absolute URI.
    #[error("url is not a valid url: {url}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
    },

    /// The single file of a binary upload is malformed or missing.
    #[error("file is not valid: {message}")]
    InvalidFile {
        /// What was wrong with it.
        message: String,
    },

    /// Filesystem error tied to a specific path.
    #[error("I/O error at {path}: {message}")]
    Io {
        /// The offending path.
        path: String,
        /// Detailed error message.
        message: String,
    },
}

impl UploadError {
    /// Create an invalid method error.
    pub fn invalid_method(method: impl Into<String>) -> Self {
        Self::InvalidMethod {
            method: method.into(),
        }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Create an invalid file error.
    pub fn invalid_file(message: impl Into<String>) -> Self {
        Self::InvalidFile {
            message: message.into(),
        }
    }

    /// Create a path-qualified I/O error.
    pub fn io(path: &Path, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Create a path-qualified I/O error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(path: &Path, err: &std::io::Error) -> Self {
        Self::io(path, err.to_string())
    }

    /// Wire code reported to callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidMethod { .. } => "invalid_method",
            Self::InvalidFiles => "invalid_files",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::InvalidFile { .. } => "invalid_file",
            Self::Io { .. } => "io_error",
        }
    }
}

/// Convenience result type for upload submission.
pub type UploadResult<T> = Result<T, UploadError>;

/// A failure reported by the transport after a task was admitted.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{code} (HTTP {status_code}): {message}")]
pub struct TransportFailure {
    /// HTTP status code, or [`LOCAL_FAILURE_STATUS`] when no response arrived.
    pub status_code: u16,
    /// Machine-readable category.
    pub code: String,
    /// Human-readable message (the response body for HTTP failures).
    pub message: String,
    /// Diagnostic context, outermost first.
    pub details: Vec<String>,
}

impl TransportFailure {
    /// Non-success HTTP status answered by the server.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            code: "upload_error".to_string(),
            message: body.into(),
            details: Vec::new(),
        }
    }

    /// A local failure with no HTTP response.
    pub fn local(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code: LOCAL_FAILURE_STATUS,
            code: code.into(),
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Build a local failure from an error, walking its source chain into
    /// `details`.
    pub fn from_error(code: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut details = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            details.push(cause.to_string());
            source = cause.source();
        }
        Self {
            status_code: LOCAL_FAILURE_STATUS,
            code: code.into(),
            message: err.to_string(),
            details,
        }
    }

    /// Attach diagnostic context.
    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    /// The task was cancelled by the caller.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::local("upload_cancelled", "Upload was cancelled")
    }

    /// The task was lost when the process that started it went away.
    #[must_use]
    pub fn interrupted() -> Self {
        Self::local(
            "upload_interrupted",
            "Upload was interrupted and could not be re-associated with its session",
        )
    }
}
