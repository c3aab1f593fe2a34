//! Multipart body encoding.
//!
//! A [`MultipartForm`] knows its exact encoded size up front (part headers
//! are rendered eagerly, file sizes come from metadata) so `Content-Length`
//! can be sent before the body streams. Files are copied through a buffered
//! writer and never loaded whole into memory.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempPath;

use hoist_core::upload::{UploadError, UploadFileInfo, UploadRequest, UploadResult};

/// Extension of encoded-body artifacts.
pub const ARTIFACT_SUFFIX: &str = ".req";

const CRLF: &[u8] = b"\r\n";

enum PartBody {
    Text(Bytes),
    File { path: PathBuf, len: u64 },
}

impl PartBody {
    fn len(&self) -> u64 {
        match self {
            Self::Text(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }
}

struct Part {
    /// Boundary line plus header block, including the blank line.
    head: Vec<u8>,
    body: PartBody,
}

/// A multipart/form-data body under construction.
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

/// An encoded body written to disk.
///
/// Dropping the `path` deletes the file.
pub struct EncodedArtifact {
    /// Location of the artifact.
    pub path: TempPath,
    /// Exact byte length of the artifact.
    pub content_length: u64,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    /// Create an empty form with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(format!("hoist.boundary.{}", uuid::Uuid::new_v4().simple()))
    }

    /// Create an empty form with a fixed boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Build a form from a validated request: fields first, then files.
    pub fn from_request(request: &UploadRequest) -> UploadResult<Self> {
        let mut form = Self::new();
        for (name, value) in &request.form_fields {
            form.text(name, value);
        }
        for file in &request.files {
            form.file(file)?;
        }
        Ok(form)
    }

    /// Append a text field.
    pub fn text(&mut self, name: &str, value: &str) {
        let head = self.part_head(name, None, None);
        self.parts.push(Part {
            head,
            body: PartBody::Text(Bytes::copy_from_slice(value.as_bytes())),
        });
    }

    /// Append a file part. The file's current size is recorded.
    pub fn file(&mut self, file: &UploadFileInfo) -> UploadResult<()> {
        let path = file.path();
        let metadata = std::fs::metadata(path).map_err(|e| UploadError::from_io_error(path, &e))?;
        if metadata.is_dir() {
            return Err(UploadError::io(path, "is a directory"));
        }

        let head = self.part_head(
            &file.field_name,
            Some(&file.file_name()),
            Some(&file.mime_type),
        );
        self.parts.push(Part {
            head,
            body: PartBody::File {
                path: path.to_path_buf(),
                len: metadata.len(),
            },
        });
        Ok(())
    }

    /// The boundary string.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` header value, including the boundary parameter.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact encoded size in bytes.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        let parts: u64 = self
            .parts
            .iter()
            .map(|p| p.head.len() as u64 + p.body.len() + CRLF.len() as u64)
            .sum();
        parts + self.closing().len() as u64
    }

    /// Number of file parts.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p.body, PartBody::File { .. }))
            .count()
    }

    /// Stream the encoded body into a uniquely named artifact in `dir`.
    ///
    /// The artifact is named `<uuid>.req`. On any failure it is removed
    /// before the error is returned.
    pub fn write_to_artifact(&self, dir: &Path) -> UploadResult<EncodedArtifact> {
        let name = uuid::Uuid::new_v4().to_string();
        let file = tempfile::Builder::new()
            .prefix(&name)
            .suffix(ARTIFACT_SUFFIX)
            .rand_bytes(0)
            .tempfile_in(dir)
            .map_err(|e| UploadError::from_io_error(&dir.join(format!("{name}{ARTIFACT_SUFFIX}")), &e))?;

        let (file, path) = file.into_parts();
        let mut out = BufWriter::new(file);
        let written = self.write_body(&mut out, &path)?;
        out.flush().map_err(|e| UploadError::from_io_error(&path, &e))?;
        drop(out);

        tracing::debug!(
            target: "hoist.upload",
            path = %path.display(),
            bytes = written,
            "Wrote multipart artifact"
        );

        Ok(EncodedArtifact {
            path,
            content_length: written,
        })
    }

    /// Encode the whole body into memory.
    pub fn encode_in_memory(&self) -> UploadResult<Bytes> {
        let capacity = usize::try_from(self.content_length()).unwrap_or(0);
        let mut out = Vec::with_capacity(capacity);
        self.write_body(&mut out, Path::new("<memory>"))?;
        Ok(Bytes::from(out))
    }

    /// Write the encoded body to `out`, returning the byte count.
    ///
    /// Fails if a source file changed size since it was added, since the
    /// advertised length would no longer match.
    fn write_body<W: Write>(&self, out: &mut W, sink: &Path) -> UploadResult<u64> {
        let sink_err = |e: io::Error| UploadError::from_io_error(sink, &e);
        let mut written = 0u64;

        for part in &self.parts {
            out.write_all(&part.head).map_err(sink_err)?;
            written += part.head.len() as u64;

            match &part.body {
                PartBody::Text(bytes) => {
                    out.write_all(bytes).map_err(sink_err)?;
                    written += bytes.len() as u64;
                }
                PartBody::File { path, len } => {
                    let source =
                        File::open(path).map_err(|e| UploadError::from_io_error(path, &e))?;
                    let copied = copy_file(source, out, path, sink)?;
                    if copied != *len {
                        return Err(UploadError::io(
                            path,
                            format!("file changed size while encoding ({len} -> {copied} bytes)"),
                        ));
                    }
                    written += copied;
                }
            }

            out.write_all(CRLF).map_err(sink_err)?;
            written += CRLF.len() as u64;
        }

        let closing = self.closing();
        out.write_all(closing.as_bytes()).map_err(sink_err)?;
        written += closing.len() as u64;

        let expected = self.content_length();
        if written != expected {
            return Err(UploadError::io(
                sink,
                format!("encoded {written} bytes, expected {expected}"),
            ));
        }
        Ok(written)
    }

    fn part_head(&self, name: &str, filename: Option<&str>, content_type: Option<&str>) -> Vec<u8> {
        let mut head = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary,
            escape_quoted(name)
        );
        if let Some(filename) = filename {
            head.push_str("; filename=\"");
            head.push_str(&escape_quoted(filename));
            head.push('"');
        }
        head.push_str("\r\n");
        if let Some(content_type) = content_type {
            head.push_str("Content-Type: ");
            head.push_str(content_type);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }

    fn closing(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }
}

/// Copy a source file into `out`, attributing errors to the right side.
fn copy_file<W: Write>(mut source: File, out: &mut W, path: &Path, sink: &Path) -> UploadResult<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(UploadError::from_io_error(path, &e)),
        };
        out.write_all(&buf[..n])
            .map_err(|e| UploadError::from_io_error(sink, &e))?;
        total += n as u64;
    }
}

/// Percent-encode the characters that would break a quoted header parameter.
fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("%22"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            c => out.push(c),
        }
    }
    out
}
