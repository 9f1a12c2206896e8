use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Error payload reported by the API for a non-success response.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// HTTP status code of the response.
    pub status_code: u16,
    /// Human-readable message, extracted from the body when possible.
    pub message: String,
    /// Machine-readable error code such as `"server_not_found"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Extra top-level fields of the JSON error body.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}: {}", self.status_code, self.message)?;
        if let Some(code) = &self.error_code {
            write!(f, " ({code})")?;
        }
        Ok(())
    }
}

/// Error type returned by this crate.
///
/// [`SdkError::status_code`] is `0` for failures that never reached the
/// server (transport, cancellation, local encode/decode problems).
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// Network-level failure: timeout, refused connection, DNS, TLS.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    /// 400 Bad Request.
    #[error("validation error: {0}")]
    Validation(ApiError),
    /// 401 Unauthorized or 403 Forbidden.
    #[error("auth error: {0}")]
    Auth(ApiError),
    /// 404 Not Found.
    #[error("not found: {0}")]
    NotFound(ApiError),
    /// 409 Conflict.
    #[error("conflict: {0}")]
    Conflict(ApiError),
    /// 429 Too Many Requests.
    #[error("rate limited: {0}")]
    RateLimited(ApiError),
    /// Any 5xx response.
    #[error("server error: {0}")]
    Server(ApiError),
    /// Non-success status outside the categories above.
    #[error("http error: {0}")]
    Http(ApiError),
    /// A safe call kept failing with retryable errors until the retry
    /// budget ran out.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<SdkError>,
    },
    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,
    /// The caller's deadline passed before the call finished.
    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },
    /// The polled resource entered an explicit failure state.
    #[error("resource entered failure state: {state}")]
    WaitFailed { state: String },
    /// Polling ran out of attempts or time without reaching a terminal state.
    #[error("timed out after {attempts} polls ({elapsed:?}), last state: {}", .last_state.as_deref().unwrap_or("unknown"))]
    WaitTimedOut {
        attempts: u32,
        elapsed: Duration,
        last_state: Option<String>,
        #[source]
        last_error: Option<Box<SdkError>>,
    },
    /// Request body or headers could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
    /// Successful response body did not match the decode target.
    #[error("decode error: {0}")]
    Decode(String),
    /// Invalid client construction input.
    #[error("config error: {0}")]
    Config(String),
}

impl SdkError {
    pub(crate) fn transport(message: impl Into<String>, source: Option<reqwest::Error>) -> Self {
        Self::Transport {
            message: message.into(),
            source,
        }
    }

    /// HTTP status of the failing response, or `0` when the server was
    /// never reached. Wrapped errors report the status of the last attempt.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RetriesExhausted { last, .. } => last.status_code(),
            other => other.api_error().map_or(0, |api| api.status_code),
        }
    }

    /// Human-readable message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Transport { message, .. } => message.clone(),
            Self::RetriesExhausted { last, .. } => last.message(),
            other => match other.api_error() {
                Some(api) => api.message.clone(),
                None => other.to_string(),
            },
        }
    }

    /// The API error payload, looking through [`SdkError::RetriesExhausted`].
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Validation(api)
            | Self::Auth(api)
            | Self::NotFound(api)
            | Self::Conflict(api)
            | Self::RateLimited(api)
            | Self::Server(api)
            | Self::Http(api) => Some(api),
            Self::RetriesExhausted { last, .. } => last.api_error(),
            _ => None,
        }
    }

    /// Whether re-issuing the same safe request may succeed.
    ///
    /// Transport failures, 429 and 502/503/504 are retryable. Everything
    /// else, including an already exhausted retry loop, is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited(_) => true,
            Self::Server(api) => matches!(api.status_code, 502..=504),
            _ => false,
        }
    }

    /// Number of attempts made when retries were exhausted.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Whether the failure came from a timeout: a transport timeout, the
    /// caller's deadline, or an exhausted polling budget.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport {
                source: Some(err), ..
            } => err.is_timeout(),
            Self::RetriesExhausted { last, .. } => last.is_timeout(),
            Self::DeadlineExceeded { .. } | Self::WaitTimedOut { .. } => true,
            _ => false,
        }
    }
}
