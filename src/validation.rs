use std::ops::RangeBounds;

use weft_transport::ResponseHead;

use crate::error::{Error, Result, ResponseValidationFailureReason};

/// Checks the status code against an acceptable range or set.
pub(crate) fn validate_status<R>(head: &ResponseHead, acceptable: &R) -> Result<()>
where
    R: RangeBounds<u16>,
{
    if acceptable.contains(&head.status) {
        Ok(())
    } else {
        Err(Error::ResponseValidationFailed {
            reason: ResponseValidationFailureReason::UnacceptableStatusCode { code: head.status },
        })
    }
}

/// Checks the response `Content-Type` against acceptable media types.
///
/// Entries may carry a wildcard subtype (`text/*`) or be the full wildcard
/// (`*/*`). An empty body passes unconditionally; a payload without a
/// `Content-Type` passes only when the full wildcard is acceptable.
pub(crate) fn validate_content_types(
    head: &ResponseHead,
    acceptable: &[String],
    has_payload: bool,
) -> Result<()> {
    // No body, nothing to validate.
    if !has_payload {
        return Ok(());
    }
    let Some(response_type) = head.content_type() else {
        if acceptable.iter().any(|a| a.trim() == "*/*") {
            return Ok(());
        }
        return Err(Error::ResponseValidationFailed {
            reason: ResponseValidationFailureReason::MissingContentType {
                acceptable_content_types: acceptable.to_vec(),
            },
        });
    };
    if acceptable
        .iter()
        .any(|candidate| media_type_matches(candidate, response_type))
    {
        Ok(())
    } else {
        Err(Error::ResponseValidationFailed {
            reason: ResponseValidationFailureReason::UnacceptableContentType {
                acceptable_content_types: acceptable.to_vec(),
                response_content_type: response_type.to_string(),
            },
        })
    }
}

/// `pattern` may be `*/*`, `type/*` or a concrete `type/subtype`.
fn media_type_matches(pattern: &str, actual: &str) -> bool {
    let (pattern_type, pattern_subtype) = split_media_type(pattern);
    let (actual_type, actual_subtype) = split_media_type(actual);
    let type_ok = pattern_type == "*" || pattern_type.eq_ignore_ascii_case(actual_type);
    let subtype_ok = pattern_subtype == "*" || pattern_subtype.eq_ignore_ascii_case(actual_subtype);
    type_ok && subtype_ok
}

fn split_media_type(value: &str) -> (&str, &str) {
    // Parameters like `; charset=utf-8` play no part in matching.
    let essence = value.split(';').next().unwrap_or(value).trim();
    match essence.split_once('/') {
        Some((t, s)) => (t, s),
        None => (essence, ""),
    }
}
