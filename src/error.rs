use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// The errors produced while building, transferring and interpreting a
/// request.
///
/// Construction-time failures never cross the public boundary as panics or
/// early returns: the engine still hands back a request handle pre-populated
/// with the error, and its completion pipeline delivers it.
///
/// `Clone` so one terminal error can be handed to every completion handler
/// attached to a request; non-clonable sources are shared behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The input could not be understood as a URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending input.
        url: String,
    },
    /// Encoding parameters onto the request failed.
    #[error("parameter encoding failed: {reason}")]
    ParameterEncodingFailed {
        /// What went wrong.
        reason: ParameterEncodingFailureReason,
    },
    /// Assembling or encoding a multipart body failed.
    #[error("multipart encoding failed: {reason}")]
    MultipartEncodingFailed {
        /// What went wrong.
        reason: MultipartEncodingFailureReason,
    },
    /// A response validation predicate rejected the exchange.
    #[error("response validation failed: {reason}")]
    ResponseValidationFailed {
        /// What went wrong.
        reason: ResponseValidationFailureReason,
    },
    /// Deserializing the response payload failed.
    #[error("response serialization failed: {reason}")]
    ResponseSerializationFailed {
        /// What went wrong.
        reason: ResponseSerializationFailureReason,
    },
    /// The transport reported a failure.
    #[error("transport error")]
    Transport(#[from] weft_transport::Error),
    /// Relocating or writing a downloaded file failed.
    #[error("file operation failed at {path:?}")]
    FileOperationFailed {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Reasons parameter encoding can fail.
#[derive(Debug, Clone, Error)]
pub enum ParameterEncodingFailureReason {
    /// The request carried no URL to attach a query to.
    #[error("request is missing a URL")]
    MissingUrl,
    /// Parameters could not be serialized as JSON.
    #[error("JSON encoding failed")]
    JsonEncodingFailed(#[source] Arc<serde_json::Error>),
    /// A parameter string could not be encoded.
    #[error("string could not be encoded")]
    StringEncodeFailed,
}

/// Reasons multipart body assembly or encoding can fail.
///
/// Structural problems are detected eagerly at append time; the first one
/// recorded is the one reported, later ones are suppressed.
#[derive(Debug, Clone, Error)]
pub enum MultipartEncodingFailureReason {
    /// The given URL/path does not denote a file.
    #[error("body part path is not a file: {path:?}")]
    BodyPartUrlInvalid {
        /// The offending path.
        path: PathBuf,
    },
    /// The file path carries no usable file name or extension.
    #[error("body part file name invalid: {path:?}")]
    BodyPartFilenameInvalid {
        /// The offending path.
        path: PathBuf,
    },
    /// The file does not exist or is not reachable.
    #[error("body part file not reachable: {path:?}")]
    BodyPartFileNotReachable {
        /// The offending path.
        path: PathBuf,
    },
    /// The path points at a directory, not a file.
    #[error("body part path is a directory: {path:?}")]
    BodyPartFileIsDirectory {
        /// The offending path.
        path: PathBuf,
    },
    /// The file size could not be determined.
    #[error("body part file size not available: {path:?}")]
    BodyPartFileSizeNotAvailable {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// Opening a read stream over the file failed.
    #[error("body part input stream creation failed: {path:?}")]
    BodyPartInputStreamCreationFailed {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// A part's byte source failed while being read.
    #[error("input stream read failed")]
    InputStreamReadFailed(#[source] Arc<std::io::Error>),
    /// The encode destination could not be created.
    #[error("output stream creation failed: {path:?}")]
    OutputStreamCreationFailed {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
    /// The encode destination already exists; encoding never overwrites.
    #[error("output file already exists: {path:?}")]
    OutputStreamFileAlreadyExists {
        /// The offending path.
        path: PathBuf,
    },
    /// Writing encoded bytes to the destination failed.
    #[error("output stream write failed")]
    OutputStreamWriteFailed(#[source] Arc<std::io::Error>),
    /// A text part's value could not be encoded.
    #[error("string encoding failed for part {name:?}")]
    StringEncodeFailed {
        /// Name of the offending part.
        name: String,
    },
}

/// Reasons a response validation predicate can reject an exchange.
#[derive(Debug, Clone, Error)]
pub enum ResponseValidationFailureReason {
    /// No response data was available to validate.
    #[error("response data is missing")]
    DataFileNil,
    /// The downloaded file could not be read back for validation.
    #[error("downloaded file unreadable: {path:?}")]
    DataFileReadFailed {
        /// Path of the unreadable file.
        path: PathBuf,
    },
    /// The response carried no `Content-Type` while some were required.
    #[error("missing content type, acceptable: {acceptable_content_types:?}")]
    MissingContentType {
        /// The acceptable types the caller declared.
        acceptable_content_types: Vec<String>,
    },
    /// The response `Content-Type` is not among the acceptable ones.
    #[error("unacceptable content type {response_content_type:?}, acceptable: {acceptable_content_types:?}")]
    UnacceptableContentType {
        /// The acceptable types the caller declared.
        acceptable_content_types: Vec<String>,
        /// What the response actually carried.
        response_content_type: String,
    },
    /// The status code is outside the acceptable set.
    #[error("unacceptable status code: {code}")]
    UnacceptableStatusCode {
        /// The offending status code.
        code: u16,
    },
}

/// Reasons response deserialization can fail.
#[derive(Debug, Clone, Error)]
pub enum ResponseSerializationFailureReason {
    /// No input data at all.
    #[error("input data is missing")]
    InputDataNil,
    /// Input data present but empty.
    #[error("input data is empty")]
    InputDataZeroLength,
    /// The downloaded file could not be read.
    #[error("input file read failed: {path:?}")]
    InputFileReadFailed {
        /// Path of the unreadable file.
        path: PathBuf,
    },
    /// The payload is not valid in the expected string encoding.
    #[error("string serialization failed")]
    StringSerializationFailed,
    /// The payload is not valid JSON for the target type.
    #[error("JSON serialization failed")]
    JsonSerializationFailed(#[source] Arc<serde_json::Error>),
}

impl Error {
    /// `true` for [`Error::InvalidUrl`].
    pub fn is_invalid_url_error(&self) -> bool {
        matches!(self, Error::InvalidUrl { .. })
    }

    /// `true` for [`Error::ParameterEncodingFailed`].
    pub fn is_parameter_encoding_error(&self) -> bool {
        matches!(self, Error::ParameterEncodingFailed { .. })
    }

    /// `true` for [`Error::MultipartEncodingFailed`].
    pub fn is_multipart_encoding_error(&self) -> bool {
        matches!(self, Error::MultipartEncodingFailed { .. })
    }

    /// `true` for [`Error::ResponseValidationFailed`].
    pub fn is_response_validation_error(&self) -> bool {
        matches!(self, Error::ResponseValidationFailed { .. })
    }

    /// `true` for [`Error::ResponseSerializationFailed`].
    pub fn is_response_serialization_error(&self) -> bool {
        matches!(self, Error::ResponseSerializationFailed { .. })
    }

    /// The rejected status code, when validation failed on one.
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Error::ResponseValidationFailed {
                reason: ResponseValidationFailureReason::UnacceptableStatusCode { code },
            } => Some(*code),
            _ => None,
        }
    }

    /// The acceptable content types, when validation failed on them.
    pub fn acceptable_content_types(&self) -> Option<&[String]> {
        match self {
            Error::ResponseValidationFailed {
                reason:
                    ResponseValidationFailureReason::MissingContentType {
                        acceptable_content_types,
                    }
                    | ResponseValidationFailureReason::UnacceptableContentType {
                        acceptable_content_types,
                        ..
                    },
            } => Some(acceptable_content_types),
            _ => None,
        }
    }
}

/// A `Result` alias where the `Err` case is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
