use weft_transport::{Method, TransportRequest};

use crate::error::{Error, ParameterEncodingFailureReason, Result};

/// Request parameters: ordered string keys mapped to JSON-shaped values.
///
/// The URL encoder accepts scalar values only; the JSON encoder takes the
/// map as-is.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Encodes parameters onto an already-assembled request.
///
/// Stateless data transform: it runs once at request construction time and
/// owns no lifecycle. A failure here short-circuits construction and rides
/// the returned request as its terminal error.
pub trait ParameterEncoding: Send + Sync {
    /// Attaches `parameters` to `request`, in place.
    fn encode(&self, request: &mut TransportRequest, parameters: &Parameters) -> Result<()>;
}

/// Percent-escaped key/value encoding, in the query string or the body
/// depending on the request method.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlEncoding;

impl UrlEncoding {
    fn scalar(value: &serde_json::Value) -> Result<String> {
        match value {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            serde_json::Value::Null => Ok(String::new()),
            _ => Err(Error::ParameterEncodingFailed {
                reason: ParameterEncodingFailureReason::StringEncodeFailed,
            }),
        }
    }

    fn query_string(parameters: &Parameters) -> Result<String> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in parameters {
            serializer.append_pair(key, &Self::scalar(value)?);
        }
        Ok(serializer.finish())
    }

    /// Whether parameters ride the URL for this method.
    fn encodes_into_query(method: &Method) -> bool {
        matches!(method, Method::Get | Method::Head | Method::Delete)
    }
}

impl ParameterEncoding for UrlEncoding {
    fn encode(&self, request: &mut TransportRequest, parameters: &Parameters) -> Result<()> {
        if request.url.is_empty() {
            return Err(Error::ParameterEncodingFailed {
                reason: ParameterEncodingFailureReason::MissingUrl,
            });
        }
        if parameters.is_empty() {
            return Ok(());
        }
        let encoded = Self::query_string(parameters)?;
        if Self::encodes_into_query(&request.method) {
            let separator = if request.url.contains('?') { '&' } else { '?' };
            request.url.push(separator);
            request.url.push_str(&encoded);
        } else {
            if request.header("content-type").is_none() {
                request.set_header(
                    "Content-Type",
                    "application/x-www-form-urlencoded; charset=utf-8",
                );
            }
            request.body = Some(encoded.into_bytes());
        }
        Ok(())
    }
}

/// Parameters serialized as a JSON object request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding;

impl ParameterEncoding for JsonEncoding {
    fn encode(&self, request: &mut TransportRequest, parameters: &Parameters) -> Result<()> {
        if request.url.is_empty() {
            return Err(Error::ParameterEncodingFailed {
                reason: ParameterEncodingFailureReason::MissingUrl,
            });
        }
        if parameters.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(parameters).map_err(|e| Error::ParameterEncodingFailed {
            reason: ParameterEncodingFailureReason::JsonEncodingFailed(std::sync::Arc::new(e)),
        })?;
        if request.header("content-type").is_none() {
            request.set_header("Content-Type", "application/json");
        }
        request.body = Some(body);
        Ok(())
    }
}
