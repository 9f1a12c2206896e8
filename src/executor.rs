use std::fmt;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;

use crate::{
    backoff::Backoff,
    classify::{classify_response, classify_transport},
    CallContext, ClientOptions, RawResponse, Request, Result, SdkError,
};

#[derive(Clone)]
/// Executes API calls against one base URL, retrying safe calls.
///
/// Construct once per client and share it; clones reuse the same
/// connection pool. No per-call state is kept between calls.
pub struct RequestExecutor {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
    options: ClientOptions,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("authorization", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl RequestExecutor {
    /// Creates an executor from a base URL and a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new(base_url: impl Into<String>, token: impl AsRef<str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            authorization: normalize_bearer_authorization(token.as_ref()),
            options: ClientOptions::default(),
        }
    }

    /// Creates an executor from environment variables.
    ///
    /// Reads:
    /// - `CLOUDAPI_BASE_URL` - API root, e.g. `https://api.example.cloud`
    /// - `CLOUDAPI_TOKEN` - access token (Bearer prefix optional)
    pub fn from_env() -> Result<Self> {
        let base_url = required_env("CLOUDAPI_BASE_URL")?;
        let token = required_env("CLOUDAPI_TOKEN")?;
        Ok(Self::new(base_url, token))
    }

    /// Applies timeout and retry options.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Replaces the transport, e.g. to tune pool sizes or proxies.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Executes `request` and decodes the successful body into `T`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: Request,
    ) -> Result<T> {
        self.send(ctx, request).await?.json()
    }

    /// Executes `request`, retrying it when it is safe and the failure is
    /// transient.
    ///
    /// Non-retryable failures return on the first occurrence. Retryable
    /// failures that outlast the attempt or time budget come back as
    /// [`SdkError::RetriesExhausted`].
    pub async fn send(&self, ctx: &CallContext, request: Request) -> Result<RawResponse> {
        let policy = &self.options.retry;
        let backoff = Backoff::from_policy(policy);
        let max_attempts = policy.max_attempts.max(1);
        let url = self.url_for(&request.path);
        let body = request
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| SdkError::Encode(format!("request body for {}: {err}", request.path)))?;
        let headers = self.request_headers(&request, body.is_some())?;

        let mut attempt = 1u32;
        loop {
            let err = match self
                .attempt(ctx, &request, &url, &headers, body.as_deref())
                .await
            {
                Ok(response) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        attempt,
                        method = %request.method,
                        path = %request.path,
                        status = response.status,
                        "request succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => err,
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt,
                method = %request.method,
                path = %request.path,
                status = err.status_code(),
                retryable = err.is_retryable(),
                "request attempt failed"
            );

            if !request.safe || !policy.allows(&err) {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(exhausted(attempt, err));
            }

            let delay = backoff.next_delay(attempt);
            if ctx.remaining().is_some_and(|remaining| remaining <= delay) {
                return Err(exhausted(attempt, err));
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                path = %request.path,
                "retrying request after backoff"
            );

            ctx.sleep(delay).await?;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        ctx: &CallContext,
        request: &Request,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<RawResponse> {
        let timeout = self.attempt_timeout(ctx);
        let cut_by_deadline = timeout < self.options.timeout;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers.clone())
            .timeout(timeout);
        if let Some(body) = body {
            builder = builder.body(body.to_vec());
        }

        let outcome = ctx
            .run(async {
                let response = builder.send().await.map_err(classify_transport)?;
                let status = response.status().as_u16();
                let headers = response.headers().clone();
                let body = response.bytes().await.map_err(classify_transport)?;
                Ok::<_, SdkError>(RawResponse {
                    status,
                    headers,
                    body: body.to_vec(),
                })
            })
            .await;

        match outcome {
            Ok(response) if (200..300).contains(&response.status) => Ok(response),
            Ok(response) => Err(classify_response(response.status, &response.body)),
            // The transport timeout was the caller's deadline, not ours.
            Err(err @ SdkError::Transport { .. }) if err.is_timeout() && cut_by_deadline => {
                Err(ctx.deadline_error())
            }
            Err(err) => Err(err),
        }
    }

    /// One value per header name. The caller's `Accept` and `Content-Type`
    /// win over the JSON defaults; `Authorization` always comes from the
    /// client configuration.
    fn request_headers(&self, request: &Request, has_body: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(request.headers.len() + 3);
        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| SdkError::Encode(format!("invalid header name {name:?}: {err}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|err| SdkError::Encode(format!("invalid value for header {name}: {err}")))?;
            headers.insert(header_name, header_value);
        }

        let mut authorization = HeaderValue::from_str(&self.authorization)
            .map_err(|_| SdkError::Config("bearer token is not a valid header value".to_owned()))?;
        authorization.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, authorization);

        headers
            .entry(header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        if has_body {
            headers
                .entry(header::CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
        }
        Ok(headers)
    }

    fn attempt_timeout(&self, ctx: &CallContext) -> Duration {
        match ctx.remaining() {
            Some(remaining) => remaining.min(self.options.timeout),
            None => self.options.timeout,
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn exhausted(attempts: u32, last: SdkError) -> SdkError {
    SdkError::RetriesExhausted {
        attempts,
        last: Box::new(last),
    }
}

fn required_env(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| SdkError::Config(format!("missing {name} environment variable")))?;
    if value.trim().is_empty() {
        return Err(SdkError::Config(format!("{name} is set but empty")));
    }
    Ok(value)
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_bearer_authorization, RequestExecutor};
    use crate::{CallContext, ClientOptions};
    use std::time::Duration;

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_authorization_value() {
        let executor = RequestExecutor::new("https://api.example.cloud", "secret-token");
        let debug = format!("{executor:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn url_for_joins_without_doubled_slashes() {
        let executor = RequestExecutor::new("https://api.example.cloud/", "t");
        assert_eq!(
            executor.url_for("/v1/servers"),
            "https://api.example.cloud/v1/servers"
        );
        assert_eq!(
            executor.url_for("v1/servers"),
            "https://api.example.cloud/v1/servers"
        );
        assert_eq!(
            executor.url_for("https://other.example/v1/next?page=2"),
            "https://other.example/v1/next?page=2"
        );
    }

    #[test]
    fn attempt_timeout_is_capped_by_deadline() {
        let executor = RequestExecutor::new("https://api.example.cloud", "t").with_options(
            ClientOptions {
                timeout: Duration::from_secs(30),
                ..ClientOptions::default()
            },
        );
        assert_eq!(
            executor.attempt_timeout(&CallContext::background()),
            Duration::from_secs(30)
        );
        let ctx = CallContext::background().with_timeout(Duration::from_secs(2));
        assert!(executor.attempt_timeout(&ctx) <= Duration::from_secs(2));
    }
}
