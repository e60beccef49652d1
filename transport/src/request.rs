//! Request description handed to a transport when minting a task.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// HTTP method of a transport request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
    /// `PATCH`
    Patch,
    /// `HEAD`
    Head,
    /// Any other method verb.
    Other(Cow<'static, str>),
}

impl Method {
    /// The method verb as it appears on the request line.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Other(verb) => verb,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully assembled request the transport can turn into a task.
///
/// The engine owns all semantics above this level (parameter encoding,
/// adapters, validation); the transport only sees the finished product.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Header name/value pairs, in insertion order.
    pub headers: Vec<(Cow<'static, str>, Cow<'static, str>)>,
    /// In-memory request body, if any. Larger payloads go through
    /// [`UploadPayload`] instead.
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Replaces the value of `name` if present, appends otherwise.
    pub fn set_header(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
    ) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some((_, v)) => *v = value,
            None => self.headers.push((name, value)),
        }
    }

    /// First value of the header `name`, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }
}

/// Where an upload task reads its request body from.
pub enum UploadPayload {
    /// The whole body, already in memory.
    Bytes(Vec<u8>),
    /// A file the transport streams from disk.
    File(PathBuf),
    /// The body is produced lazily; the transport asks the session delegate
    /// for a fresh stream via
    /// [`SessionDelegate::need_body_stream`](crate::SessionDelegate::need_body_stream).
    Stream,
}

impl fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPayload::Bytes(bytes) => {
                f.debug_tuple("Bytes").field(&bytes.len()).finish()
            }
            UploadPayload::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadPayload::Stream => f.write_str("Stream"),
        }
    }
}
