use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bounded::{BoundedCopier, CopyError, STREAM_BUFFER_SIZE};
use crate::error::{Error, MultipartEncodingFailureReason, Result};

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process-unique pair of words derived from the clock and a counter.
pub(crate) fn unique_token() -> (u32, u32) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(count.wrapping_mul(0x2545_F491_4F6C_DD1D));
    ((mixed >> 32) as u32, mixed as u32)
}

fn random_boundary() -> String {
    let (first, second) = unique_token();
    format!("weft.boundary.{first:08x}{second:08x}")
}

const CRLF: &str = "\r\n";

enum PartBody {
    Bytes(Vec<u8>),
    File(PathBuf),
    Stream(Box<dyn Read + Send>),
}

struct BodyPart {
    headers: Vec<(String, String)>,
    body: PartBody,
    length: u64,
}

/// A streaming `multipart/form-data` body builder.
///
/// Parts are appended in order; appends that can fail are checked eagerly
/// and the first structural error is the one reported at encode time, later
/// ones are suppressed. The assembled body can be produced fully in memory
/// with [`encode`](Self::encode) or streamed to a fresh file with
/// [`write_encoded_data`](Self::write_encoded_data), which moves data
/// through a fixed-size buffer and never overwrites an existing file.
pub struct MultipartFormData {
    boundary: String,
    parts: Vec<BodyPart>,
    first_error: Option<Error>,
}

impl std::fmt::Debug for MultipartFormData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartFormData")
            .field("boundary", &self.boundary)
            .field("parts", &self.parts.len())
            .field("first_error", &self.first_error)
            .finish()
    }
}

impl Default for MultipartFormData {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartFormData {
    /// An empty form with a freshly generated boundary.
    pub fn new() -> Self {
        Self {
            boundary: random_boundary(),
            parts: Vec::new(),
            first_error: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
            first_error: None,
        }
    }

    /// The boundary separating parts.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Total length of the part payloads, excluding boundaries and part
    /// headers.
    pub fn content_length(&self) -> u64 {
        self.parts.iter().map(|p| p.length).sum()
    }

    fn record_error(&mut self, reason: MultipartEncodingFailureReason) {
        if self.first_error.is_none() {
            self.first_error = Some(Error::MultipartEncodingFailed { reason });
        }
    }

    fn push_part(
        &mut self,
        name: &str,
        filename: Option<&str>,
        mime: Option<&str>,
        body: PartBody,
        length: u64,
    ) {
        let disposition = match filename {
            Some(filename) => format!("form-data; name=\"{name}\"; filename=\"{filename}\""),
            None => format!("form-data; name=\"{name}\""),
        };
        let mut headers = vec![("Content-Disposition".to_string(), disposition)];
        if let Some(mime) = mime {
            headers.push(("Content-Type".to_string(), mime.to_string()));
        }
        self.parts.push(BodyPart {
            headers,
            body,
            length,
        });
    }

    /// Appends a plain text field.
    pub fn append_text(&mut self, name: &str, value: &str) {
        let bytes = value.as_bytes().to_vec();
        let length = bytes.len() as u64;
        self.push_part(name, None, None, PartBody::Bytes(bytes), length);
    }

    /// Appends an in-memory payload, optionally as a named file.
    pub fn append_data(
        &mut self,
        data: Vec<u8>,
        name: &str,
        filename: Option<&str>,
        mime: Option<&str>,
    ) {
        let length = data.len() as u64;
        self.push_part(name, filename, mime, PartBody::Bytes(data), length);
    }

    /// Appends a file, inferring the part's file name and media type from
    /// the path.
    pub fn append_file(&mut self, path: impl AsRef<Path>, name: &str) {
        let path = path.as_ref();
        let Some(filename) = path.file_name().and_then(|f| f.to_str()).map(str::to_owned)
        else {
            self.record_error(MultipartEncodingFailureReason::BodyPartFilenameInvalid {
                path: path.to_path_buf(),
            });
            return;
        };
        let mime = path
            .extension()
            .and_then(|e| e.to_str())
            .map(mime_for_extension)
            .unwrap_or("application/octet-stream");
        self.append_file_with(path, name, &filename, mime);
    }

    /// Appends a file with an explicit part file name and media type.
    ///
    /// The path is checked now: it must exist, denote a regular file, and
    /// have a readable size.
    pub fn append_file_with(
        &mut self,
        path: impl AsRef<Path>,
        name: &str,
        filename: &str,
        mime: &str,
    ) {
        let path = path.as_ref();
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                self.record_error(MultipartEncodingFailureReason::BodyPartFileNotReachable {
                    path: path.to_path_buf(),
                });
                return;
            }
            Err(source) => {
                self.record_error(MultipartEncodingFailureReason::BodyPartFileSizeNotAvailable {
                    path: path.to_path_buf(),
                    source: std::sync::Arc::new(source),
                });
                return;
            }
        };
        if metadata.is_dir() {
            self.record_error(MultipartEncodingFailureReason::BodyPartFileIsDirectory {
                path: path.to_path_buf(),
            });
            return;
        }
        if !metadata.is_file() {
            self.record_error(MultipartEncodingFailureReason::BodyPartUrlInvalid {
                path: path.to_path_buf(),
            });
            return;
        }
        self.push_part(
            name,
            Some(filename),
            Some(mime),
            PartBody::File(path.to_path_buf()),
            metadata.len(),
        );
    }

    /// Appends an arbitrary byte stream of declared length.
    pub fn append_stream(
        &mut self,
        stream: Box<dyn Read + Send>,
        length: u64,
        name: &str,
        filename: &str,
        mime: &str,
    ) {
        self.push_part(name, Some(filename), Some(mime), PartBody::Stream(stream), length);
    }

    fn boundary_prefix(&self, first: bool) -> String {
        if first {
            format!("--{}{CRLF}", self.boundary)
        } else {
            format!("{CRLF}--{}{CRLF}", self.boundary)
        }
    }

    fn boundary_suffix(&self) -> String {
        format!("{CRLF}--{}--{CRLF}", self.boundary)
    }

    fn part_header_bytes(part: &BodyPart) -> Vec<u8> {
        let mut out = String::new();
        for (field, value) in &part.headers {
            out.push_str(field);
            out.push_str(": ");
            out.push_str(value);
            out.push_str(CRLF);
        }
        out.push_str(CRLF);
        out.into_bytes()
    }

    /// Encodes the whole body in memory.
    ///
    /// Consumes the form: stream parts can only be read once.
    pub fn encode(mut self) -> Result<Vec<u8>> {
        if let Some(error) = self.first_error.take() {
            return Err(error);
        }
        let mut encoded =
            Vec::with_capacity(self.content_length() as usize + 128 * (self.parts.len() + 1));
        let boundary_suffix = self.boundary_suffix();
        let parts = std::mem::take(&mut self.parts);
        for (index, part) in parts.into_iter().enumerate() {
            encoded.extend_from_slice(self.boundary_prefix(index == 0).as_bytes());
            encoded.extend_from_slice(&Self::part_header_bytes(&part));
            match part.body {
                PartBody::Bytes(bytes) => encoded.extend_from_slice(&bytes),
                PartBody::File(path) => {
                    let mut file = std::fs::File::open(&path).map_err(|source| {
                        Error::MultipartEncodingFailed {
                            reason:
                                MultipartEncodingFailureReason::BodyPartInputStreamCreationFailed {
                                    path: path.clone(),
                                    source: std::sync::Arc::new(source),
                                },
                        }
                    })?;
                    file.read_to_end(&mut encoded).map_err(|source| {
                        Error::MultipartEncodingFailed {
                            reason: MultipartEncodingFailureReason::InputStreamReadFailed(
                                std::sync::Arc::new(source),
                            ),
                        }
                    })?;
                }
                PartBody::Stream(mut stream) => {
                    stream.read_to_end(&mut encoded).map_err(|source| {
                        Error::MultipartEncodingFailed {
                            reason: MultipartEncodingFailureReason::InputStreamReadFailed(
                                std::sync::Arc::new(source),
                            ),
                        }
                    })?;
                }
            }
        }
        encoded.extend_from_slice(boundary_suffix.as_bytes());
        Ok(encoded)
    }

    /// Streams the encoded body to a new file at `destination`.
    ///
    /// Refuses to touch an existing file. Bytes move through a fixed
    /// 1 KiB buffer, so memory stays flat regardless of payload size.
    pub fn write_encoded_data(mut self, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        if let Some(error) = self.first_error.take() {
            return Err(error);
        }
        let file = std::fs::File::create_new(destination).map_err(|source| {
            let reason = if source.kind() == std::io::ErrorKind::AlreadyExists {
                MultipartEncodingFailureReason::OutputStreamFileAlreadyExists {
                    path: destination.to_path_buf(),
                }
            } else {
                MultipartEncodingFailureReason::OutputStreamCreationFailed {
                    path: destination.to_path_buf(),
                    source: std::sync::Arc::new(source),
                }
            };
            Error::MultipartEncodingFailed { reason }
        })?;
        let mut sink = std::io::BufWriter::new(file);
        let mut copier = BoundedCopier::with_buffer_size(STREAM_BUFFER_SIZE);
        let write_failed = |source: std::io::Error| Error::MultipartEncodingFailed {
            reason: MultipartEncodingFailureReason::OutputStreamWriteFailed(std::sync::Arc::new(
                source,
            )),
        };
        let copy_failed = |error: CopyError| match error {
            CopyError::Read(source) => Error::MultipartEncodingFailed {
                reason: MultipartEncodingFailureReason::InputStreamReadFailed(std::sync::Arc::new(
                    source,
                )),
            },
            CopyError::Write(source) => Error::MultipartEncodingFailed {
                reason: MultipartEncodingFailureReason::OutputStreamWriteFailed(
                    std::sync::Arc::new(source),
                ),
            },
        };

        let boundary_suffix = self.boundary_suffix();
        let parts = std::mem::take(&mut self.parts);
        for (index, part) in parts.into_iter().enumerate() {
            sink.write_all(self.boundary_prefix(index == 0).as_bytes())
                .map_err(write_failed)?;
            sink.write_all(&Self::part_header_bytes(&part))
                .map_err(write_failed)?;
            match part.body {
                PartBody::Bytes(bytes) => sink.write_all(&bytes).map_err(write_failed)?,
                PartBody::File(path) => {
                    let mut file = std::fs::File::open(&path).map_err(|source| {
                        Error::MultipartEncodingFailed {
                            reason:
                                MultipartEncodingFailureReason::BodyPartInputStreamCreationFailed {
                                    path: path.clone(),
                                    source: std::sync::Arc::new(source),
                                },
                        }
                    })?;
                    copier.copy(&mut file, &mut sink).map_err(copy_failed)?;
                }
                PartBody::Stream(mut stream) => {
                    copier
                        .copy(stream.as_mut(), &mut sink)
                        .map_err(copy_failed)?;
                }
            }
        }
        sink.write_all(boundary_suffix.as_bytes())
            .map_err(write_failed)?;
        sink.flush().map_err(write_failed)?;
        Ok(())
    }
}

/// Media type for common file extensions; everything else is a byte blob.
fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "txt" | "text" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
