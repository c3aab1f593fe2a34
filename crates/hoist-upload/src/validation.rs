//! Request validation.
//!
//! Turns loosely typed caller parameters into an [`UploadRequest`] or a typed
//! rejection. The only side effects are filesystem metadata lookups.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

use hoist_core::ports::{EnqueueBinaryParams, EnqueueParams};
use hoist_core::upload::{
    FileItem, HttpMethod, UploadError, UploadFileInfo, UploadMode, UploadRequest, UploadResult,
};

/// Validate a multipart request.
///
/// Checks run in a fixed order: method, file list, URL, then each file on
/// disk. The first failure wins.
pub fn validate_multipart(params: EnqueueParams) -> UploadResult<UploadRequest> {
    let method = parse_method(params.method.as_deref())?;

    if params.files.is_empty() {
        return Err(UploadError::InvalidFiles);
    }

    let url = parse_url(&params.url)?;

    let files: Vec<UploadFileInfo> = params.files.iter().map(UploadFileInfo::from_item).collect();
    for file in &files {
        ensure_regular_file(file.path())?;
    }

    Ok(UploadRequest {
        url,
        method,
        mode: UploadMode::Multipart,
        headers: string_values("header", params.headers),
        form_fields: string_values("field", params.data),
        files,
        tag: params.tag,
        timeout: request_timeout(params.timeout_secs),
    })
}

/// Validate a binary request.
///
/// A missing or unreadable file is reported as `InvalidFile` rather than an
/// I/O error, since the whole request hinges on that one file.
pub fn validate_binary(params: EnqueueBinaryParams) -> UploadResult<UploadRequest> {
    let method = parse_method(params.method.as_deref())?;
    let url = parse_url(&params.url)?;

    let item = params
        .file
        .ok_or_else(|| UploadError::invalid_file("no file given"))?;
    check_file_item(&item)?;

    let file = UploadFileInfo::from_item(&item);
    ensure_regular_file(file.path()).map_err(|e| match e {
        UploadError::Io { path, message } => UploadError::invalid_file(format!("{path}: {message}")),
        other => other,
    })?;

    Ok(UploadRequest {
        url,
        method,
        mode: UploadMode::Binary,
        headers: string_values("header", params.headers),
        form_fields: IndexMap::new(),
        files: vec![file],
        tag: params.tag,
        timeout: request_timeout(params.timeout_secs),
    })
}

fn parse_method(method: Option<&str>) -> UploadResult<HttpMethod> {
    method.map_or(Ok(HttpMethod::Post), |m| {
        HttpMethod::parse(m).ok_or_else(|| UploadError::invalid_method(m))
    })
}

/// Zero means "no override".
fn request_timeout(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|&s| s > 0).map(Duration::from_secs)
}

/// Parse an absolute http(s) URL.
pub fn parse_url(raw: &str) -> UploadResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|_| UploadError::invalid_url(raw))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(UploadError::invalid_url(raw)),
    }
}

fn check_file_item(item: &FileItem) -> UploadResult<()> {
    if item.path.trim().is_empty() {
        return Err(UploadError::invalid_file("path is empty"));
    }
    if item.field_name.chars().any(char::is_control) {
        return Err(UploadError::invalid_file(format!(
            "field name {:?} contains control characters",
            item.field_name
        )));
    }
    Ok(())
}

/// Ensure `path` exists and is not a directory.
pub fn ensure_regular_file(path: &Path) -> UploadResult<()> {
    let metadata = std::fs::metadata(path).map_err(|e| UploadError::from_io_error(path, &e))?;
    if metadata.is_dir() {
        return Err(UploadError::io(path, "is a directory"));
    }
    Ok(())
}

/// Keep only string-valued entries; anything else is dropped.
fn string_values(kind: &str, values: Option<IndexMap<String, Value>>) -> IndexMap<String, String> {
    values
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            other => {
                tracing::debug!(
                    target: "hoist.upload",
                    kind,
                    key = %key,
                    value = %other,
                    "Dropping non-string value"
                );
                None
            }
        })
        .collect()
}
