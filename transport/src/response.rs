//! Response metadata and TLS trust material surfaced by a transport.

use std::time::Duration;

/// Status line and headers of a response, delivered before any body bytes.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// Final request URL after any redirects the transport followed.
    pub url: String,
    /// Declared body length, if the transport knows it.
    pub content_length: Option<u64>,
    /// Header name/value pairs as received.
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First value of the header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Content-Type` value without parameters, e.g. `application/json`.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

/// Server trust material presented during a TLS challenge.
///
/// Opaque to the engine; a trust policy decides what to do with it.
#[derive(Debug, Clone)]
pub struct ServerTrust {
    /// Host the challenge was issued for.
    pub host: String,
    /// DER-encoded certificate chain, leaf first. May be empty if the
    /// transport cannot surface it.
    pub certificate_chain: Vec<Vec<u8>>,
}

/// Outcome of a TLS trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDisposition {
    /// Accept the presented trust and proceed.
    Accept,
    /// Let the transport apply its built-in handling.
    Default,
    /// Reject the challenge and fail the task.
    Cancel,
}

/// Coarse per-task timing collected by the transport, delivered once right
/// before the terminal event.
#[derive(Debug, Clone, Default)]
pub struct TaskMetrics {
    /// Wall-clock duration of the whole exchange.
    pub task_duration: Duration,
    /// Number of request/response transactions (redirects add one each).
    pub transaction_count: u32,
    /// Number of redirects followed.
    pub redirect_count: u32,
}
