//! Request building.
//!
//! Converts a validated [`UploadRequest`] into a [`PreparedRequest`]: the
//! final header set plus a body reference the transport can stream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexMap;
use tempfile::TempPath;
use url::Url;

use hoist_core::upload::{HttpMethod, UploadError, UploadMode, UploadRequest, UploadResult};

use crate::encoder::MultipartForm;

/// Where the body bytes come from.
pub enum BodySource {
    /// Fully encoded body held in memory.
    Memory(Bytes),
    /// A file on disk. `artifact` is set when the file is an encoded body
    /// owned by this request and must be deleted once the transfer starts.
    File {
        /// Path to stream from.
        path: PathBuf,
        /// Owned temporary artifact, if any.
        artifact: Option<TempPath>,
    },
}

impl BodySource {
    /// Path of an on-disk body.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::File { path, .. } => Some(path),
        }
    }

    /// Take ownership of the temporary artifact, leaving none behind.
    pub fn take_artifact(&mut self) -> Option<TempPath> {
        match self {
            Self::Memory(_) => None,
            Self::File { artifact, .. } => artifact.take(),
        }
    }
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(bytes) => f.debug_tuple("Memory").field(&bytes.len()).finish(),
            Self::File { path, artifact } => f
                .debug_struct("File")
                .field("path", path)
                .field("artifact", &artifact.is_some())
                .finish(),
        }
    }
}

/// A request ready for the transport.
#[derive(Debug)]
pub struct PreparedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Destination.
    pub url: Url,
    /// Final headers in send order.
    pub headers: IndexMap<String, String>,
    /// Body reference.
    pub body: BodySource,
    /// Body content type.
    pub content_type: String,
    /// Exact body length.
    pub content_length: u64,
    /// Whole-request timeout, if overridden.
    pub timeout: Option<Duration>,
}

/// Encoding options taken from the manager config.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Where artifacts are written.
    pub temp_directory: PathBuf,
    /// Single-file multipart bodies at or under this size stay in memory (0 disables).
    pub in_memory_threshold: u64,
}

/// Build a prepared request, encoding the body if needed.
///
/// This does blocking file I/O and should run off the async executor.
pub fn prepare(request: &UploadRequest, options: &EncodeOptions) -> UploadResult<PreparedRequest> {
    let (body, content_type, content_length) = match request.mode {
        UploadMode::Multipart => encode_multipart(request, options)?,
        UploadMode::Binary => {
            let file = request
                .files
                .first()
                .ok_or_else(|| UploadError::invalid_file("no file given"))?;
            let len = std::fs::metadata(file.path())
                .map_err(|e| UploadError::from_io_error(file.path(), &e))?
                .len();
            let body = BodySource::File {
                path: file.path.clone(),
                artifact: None,
            };
            (body, file.mime_type.clone(), len)
        }
    };

    Ok(PreparedRequest {
        method: request.method,
        url: request.url.clone(),
        headers: build_headers(&content_type, content_length, &request.headers),
        body,
        content_type,
        content_length,
        timeout: request.timeout,
    })
}

fn encode_multipart(
    request: &UploadRequest,
    options: &EncodeOptions,
) -> UploadResult<(BodySource, String, u64)> {
    let form = MultipartForm::from_request(request)?;
    let content_type = form.content_type();
    let length = form.content_length();

    let keep_in_memory = options.in_memory_threshold > 0
        && form.file_count() == 1
        && length <= options.in_memory_threshold;

    if keep_in_memory {
        let bytes = form.encode_in_memory()?;
        return Ok((BodySource::Memory(bytes), content_type, length));
    }

    let artifact = form.write_to_artifact(&options.temp_directory)?;
    let body = BodySource::File {
        path: artifact.path.to_path_buf(),
        artifact: Some(artifact.path),
    };
    Ok((body, content_type, artifact.content_length))
}

/// Compose the outgoing header set.
///
/// Defaults go in first (`Accept: */*`, `Content-Type`, `Content-Length`),
/// then caller headers in caller order. Names compare case-insensitively and
/// the last write wins, except `Content-Length`, which always reflects the
/// encoded size.
pub fn build_headers(
    content_type: &str,
    content_length: u64,
    caller: &IndexMap<String, String>,
) -> IndexMap<String, String> {
    let mut headers = IndexMap::new();
    headers.insert("Accept".to_string(), "*/*".to_string());
    headers.insert("Content-Type".to_string(), content_type.to_string());
    headers.insert("Content-Length".to_string(), content_length.to_string());

    for (name, value) in caller {
        if name.eq_ignore_ascii_case("content-length") {
            tracing::debug!(target: "hoist.upload", value = %value, "Ignoring caller Content-Length");
            continue;
        }
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }
    headers
}
