use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use crate::{ApiError, SdkError};

/// Longest raw body fragment kept in an error message.
const MAX_RAW_MESSAGE_BYTES: usize = 512;

/// Maps a non-success response into a typed error.
pub fn classify_response(status: u16, body: &[u8]) -> SdkError {
    let api = extract_api_error(status, body);
    match status {
        400 => SdkError::Validation(api),
        401 | 403 => SdkError::Auth(api),
        404 => SdkError::NotFound(api),
        409 => SdkError::Conflict(api),
        429 => SdkError::RateLimited(api),
        500..=599 => SdkError::Server(api),
        _ => SdkError::Http(api),
    }
}

/// Maps a `reqwest` failure that never produced a response.
///
/// A request that could not be built (bad header name or value) is a local
/// encode error; everything else is a retryable transport error.
pub fn classify_transport(err: reqwest::Error) -> SdkError {
    if err.is_builder() {
        return SdkError::Encode(format!("invalid request: {}", root_cause(&err)));
    }
    let kind = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    };
    let message = match err.url() {
        Some(url) => format!("{kind}: {} ({})", url.path(), root_cause(&err)),
        None => format!("{kind}: {}", root_cause(&err)),
    };
    SdkError::transport(message, Some(err))
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current.to_string()
}

fn extract_api_error(status: u16, body: &[u8]) -> ApiError {
    if let Ok(JsonValue::Object(fields)) = serde_json::from_slice::<JsonValue>(body) {
        if let Some(api) = from_json_object(status, fields) {
            return api;
        }
    }

    ApiError {
        status_code: status,
        message: raw_message(status, body),
        error_code: None,
        metadata: BTreeMap::new(),
    }
}

fn from_json_object(status: u16, mut fields: Map<String, JsonValue>) -> Option<ApiError> {
    let mut message = take_string(&mut fields, "message");
    let mut error_code = take_string(&mut fields, "error_code");

    match fields.remove("error") {
        Some(JsonValue::String(text)) => {
            // `{"error": "..."}` alone carries the message; next to a
            // `message` it is usually a short code.
            if message.is_none() {
                message = Some(text);
            } else if error_code.is_none() {
                error_code = Some(text);
            }
        }
        Some(JsonValue::Object(mut nested)) => {
            message = message.or_else(|| take_string(&mut nested, "message"));
            error_code = error_code
                .or_else(|| take_string(&mut nested, "error_code"))
                .or_else(|| take_string(&mut nested, "code"));
            if !nested.is_empty() {
                fields.insert("error".to_owned(), JsonValue::Object(nested));
            }
        }
        Some(other) => {
            fields.insert("error".to_owned(), other);
        }
        None => {}
    }

    if error_code.is_none() {
        error_code = take_string(&mut fields, "code");
    }

    if message.is_none() && error_code.is_none() {
        return None;
    }

    let message = message
        .or_else(|| error_code.clone())
        .unwrap_or_default();
    Some(ApiError {
        status_code: status,
        message,
        error_code,
        metadata: fields.into_iter().collect(),
    })
}

fn take_string(fields: &mut Map<String, JsonValue>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(JsonValue::String(_)) => match fields.remove(key) {
            Some(JsonValue::String(text)) => Some(text),
            _ => None,
        },
        Some(JsonValue::Number(number)) => {
            let text = number.to_string();
            fields.remove(key);
            Some(text)
        }
        _ => None,
    }
}

fn raw_message(status: u16, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP {status} with empty body");
    }
    if text.len() <= MAX_RAW_MESSAGE_BYTES {
        return text.to_owned();
    }
    let mut end = MAX_RAW_MESSAGE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes truncated)", &text[..end], text.len() - end)
}
