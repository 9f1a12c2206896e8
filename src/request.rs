use std::collections::BTreeMap;

use reqwest::{header::HeaderMap, Method};
use serde::{de::DeserializeOwned, Serialize};

use crate::{Result, SdkError};

/// One logical API call.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the client's base URL, e.g. `/v1/servers/abc`.
    pub path: String,
    /// Extra headers keyed by lowercase name. `Authorization` is always
    /// set by the executor and never taken from here.
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Whether the executor may re-issue this call on a retryable failure.
    pub safe: bool,
}

impl Request {
    /// Creates a request. GET, HEAD and OPTIONS start out safe; every other
    /// method must be flagged with [`Request::mark_safe`] to be retried.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let safe = matches!(method, Method::GET | Method::HEAD | Method::OPTIONS);
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
            safe,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets a header, replacing any previous value for the same name.
    /// Names are case-insensitive.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Attaches a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|err| SdkError::Encode(format!("request body for {}: {err}", self.path)))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Flags the call as idempotent so it may be retried.
    pub fn mark_safe(mut self) -> Self {
        self.safe = true;
        self
    }
}

/// Status, headers and body bytes of a successful attempt.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Decodes the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|err| {
            SdkError::Decode(format!(
                "invalid response JSON for status {}: {err}",
                self.status
            ))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn only_read_methods_start_safe() {
        assert!(Request::get("/v1/servers").safe);
        assert!(Request::new(Method::HEAD, "/v1/servers").safe);
        assert!(!Request::post("/v1/servers").safe);
        assert!(!Request::put("/v1/servers/a").safe);
        assert!(!Request::delete("/v1/servers/a").safe);
        assert!(Request::delete("/v1/servers/a").mark_safe().safe);
    }

    #[test]
    fn json_body_and_headers_are_recorded() {
        let request = Request::post("/v1/volumes")
            .header("X-Request-Id", "r1")
            .header("X-Request-Id", "r2")
            .json(&json!({"size_gb": 10}))
            .unwrap();
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers["x-request-id"], "r2");
        assert_eq!(request.body, Some(json!({"size_gb": 10})));
    }

    #[test]
    fn header_names_differing_in_case_collapse() {
        let request = Request::get("/v1/servers")
            .header("x-id", "1")
            .header("X-Id", "2");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers["x-id"], "2");
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let response = RawResponse {
            status: 204,
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        response.json::<()>().unwrap();
        let missing: Option<u32> = response.json().unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn mismatched_body_is_a_decode_error() {
        #[derive(Debug, Deserialize)]
        struct Server {
            #[allow(dead_code)]
            id: String,
        }
        let response = RawResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: br#"{"name": "no id"}"#.to_vec(),
        };
        let err = response.json::<Server>().unwrap_err();
        assert!(matches!(err, SdkError::Decode(_)));
        assert_eq!(err.status_code(), 0);
    }
}
