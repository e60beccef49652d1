use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use weft_transport::ResponseHead;

use crate::error::{Error, Result, ResponseSerializationFailureReason};

/// Status codes whose responses legitimately carry no body.
const EMPTY_RESPONSE_CODES: [u16; 2] = [204, 205];

/// Turns a finished exchange into a typed value.
///
/// A deserializer sees the whole outcome: the response head if one arrived,
/// the accumulated payload, and the terminal error if any. A transfer error
/// always wins over whatever bytes happen to be present.
pub trait ResponseDeserializer: Send + Sync {
    /// The value this deserializer produces.
    type Output;

    /// Interprets the exchange.
    fn deserialize(
        &self,
        head: Option<&ResponseHead>,
        data: Option<&[u8]>,
        error: Option<&Error>,
    ) -> Result<Self::Output>;
}

fn allows_empty_body(head: Option<&ResponseHead>) -> bool {
    head.is_some_and(|h| EMPTY_RESPONSE_CODES.contains(&h.status))
}

/// Hands back the payload bytes untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDeserializer;

impl ResponseDeserializer for RawDeserializer {
    type Output = Vec<u8>;

    fn deserialize(
        &self,
        head: Option<&ResponseHead>,
        data: Option<&[u8]>,
        error: Option<&Error>,
    ) -> Result<Vec<u8>> {
        if let Some(error) = error {
            return Err(error.clone());
        }
        match data {
            Some(bytes) => Ok(bytes.to_vec()),
            None if allows_empty_body(head) => Ok(Vec::new()),
            None => Err(Error::ResponseSerializationFailed {
                reason: ResponseSerializationFailureReason::InputDataNil,
            }),
        }
    }
}

/// Decodes the payload as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringDeserializer;

impl ResponseDeserializer for StringDeserializer {
    type Output = String;

    fn deserialize(
        &self,
        head: Option<&ResponseHead>,
        data: Option<&[u8]>,
        error: Option<&Error>,
    ) -> Result<String> {
        if let Some(error) = error {
            return Err(error.clone());
        }
        match data {
            Some(bytes) => String::from_utf8(bytes.to_vec()).map_err(|_| {
                Error::ResponseSerializationFailed {
                    reason: ResponseSerializationFailureReason::StringSerializationFailed,
                }
            }),
            None if allows_empty_body(head) => Ok(String::new()),
            None => Err(Error::ResponseSerializationFailed {
                reason: ResponseSerializationFailureReason::InputDataNil,
            }),
        }
    }
}

/// Parses the payload as JSON into `T`.
///
/// Defaults to [`serde_json::Value`] when no concrete type is named.
pub struct JsonDeserializer<T = serde_json::Value> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDeserializer<T> {
    /// A deserializer producing `T`.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDeserializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDeserializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonDeserializer")
    }
}

impl<T: DeserializeOwned + Default + Send + Sync> ResponseDeserializer for JsonDeserializer<T> {
    type Output = T;

    fn deserialize(
        &self,
        head: Option<&ResponseHead>,
        data: Option<&[u8]>,
        error: Option<&Error>,
    ) -> Result<T> {
        if let Some(error) = error {
            return Err(error.clone());
        }
        match data {
            Some([]) | None if allows_empty_body(head) => Ok(T::default()),
            Some([]) => Err(Error::ResponseSerializationFailed {
                reason: ResponseSerializationFailureReason::InputDataZeroLength,
            }),
            Some(bytes) => serde_json::from_slice(bytes).map_err(|e| {
                Error::ResponseSerializationFailed {
                    reason: ResponseSerializationFailureReason::JsonSerializationFailed(
                        std::sync::Arc::new(e),
                    ),
                }
            }),
            None => Err(Error::ResponseSerializationFailed {
                reason: ResponseSerializationFailureReason::InputDataNil,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(status: u16) -> ResponseHead {
        ResponseHead {
            status,
            url: "https://example.test/".to_string(),
            content_length: None,
            headers: Vec::new(),
        }
    }

    #[test]
    fn raw_passes_bytes_through() {
        let out = RawDeserializer
            .deserialize(Some(&head(200)), Some(b"abc"), None)
            .unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn transfer_error_wins_over_data() {
        let err = Error::InvalidUrl {
            url: "bogus".to_string(),
        };
        let out = StringDeserializer.deserialize(Some(&head(200)), Some(b"abc"), Some(&err));
        assert!(out.unwrap_err().is_invalid_url_error());
    }

    #[test]
    fn no_content_status_yields_empty_values() {
        assert_eq!(
            StringDeserializer
                .deserialize(Some(&head(204)), None, None)
                .unwrap(),
            ""
        );
        assert_eq!(
            JsonDeserializer::<serde_json::Value>::new()
                .deserialize(Some(&head(205)), None, None)
                .unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn missing_data_is_input_data_nil() {
        let err = RawDeserializer
            .deserialize(Some(&head(200)), None, None)
            .unwrap_err();
        assert!(err.is_response_serialization_error());
    }

    #[test]
    fn invalid_utf8_is_string_serialization_failure() {
        let err = StringDeserializer
            .deserialize(Some(&head(200)), Some(&[0xff, 0xfe]), None)
            .unwrap_err();
        assert!(err.is_response_serialization_error());
    }

    #[test]
    fn json_parses_into_typed_values() {
        #[derive(serde::Deserialize, Default)]
        struct Thing {
            id: u32,
        }
        let thing: Thing = JsonDeserializer::new()
            .deserialize(Some(&head(200)), Some(br#"{"id": 9}"#), None)
            .unwrap();
        assert_eq!(thing.id, 9);
    }

    #[test]
    fn empty_json_body_outside_empty_codes_is_zero_length() {
        let err = JsonDeserializer::<serde_json::Value>::new()
            .deserialize(Some(&head(200)), Some(b""), None)
            .unwrap_err();
        assert!(err.is_response_serialization_error());
    }
}
