//! HTTP transport: request construction, authentication, retries and
//! response decoding.
//!
//! Every façade method and the ingest pipeline funnel through
//! [`Client::call`] (or its crate-internal twin `execute`). A call
//!
//! 1. resolves the path against the base URL and enforces the token scope,
//! 2. sets the standard headers (`Accept`, `User-Agent`, `Authorization`,
//!    `Content-Type`, `X-Axiom-Org-Id`),
//! 3. sends, retrying 5xx responses and transient network errors while the
//!    body can be replayed and the retry budget lasts,
//! 4. records the trace ID and quota headers in a [`Response`], and
//! 5. fills the [`ResultSink`] or decodes the error body.

use crate::client::Client;
use crate::config::TokenKind;
use crate::encoding::EncodedStream;
use crate::error::{status_text, Error, HttpError, LimitError};
use crate::limit::parse_limit;
use axiom_types::Limit;
use bytes::Bytes;
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use url::Url;

pub use reqwest::Method;

pub const HEADER_TRACE_ID: &str = "X-Axiom-Trace-Id";
pub const HEADER_ORG_ID: &str = "X-Axiom-Org-Id";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";
pub const CONTENT_TYPE_CSV: &str = "text/csv";

/// Retry budget and backoff bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles for every further retry.
    pub initial_backoff: Duration,
    /// Upper bound of a single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that sends every request exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Backoff before retry number `retry` (0-based), with ±50% jitter.
    fn backoff(&self, retry: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(1 << retry.min(16))
            .min(self.max_backoff);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
        base.mul_f64(jitter).min(self.max_backoff)
    }
}

/// Regenerates a streaming body for a retry.
pub type GetBody = Arc<dyn Fn() -> Result<reqwest::Body, Error> + Send + Sync>;

/// A request body.
///
/// In-memory bodies are replayed on retry. A streaming body can only be
/// sent once unless it carries a `get-body` factory
/// ([`Body::with_get_body`]), which is invoked for every retry.
pub enum Body {
    Empty,
    /// Pre-encoded JSON.
    Json(Bytes),
    /// Raw bytes.
    Bytes(Bytes),
    /// A single-shot stream, optionally regenerable.
    Stream {
        first: Option<reqwest::Body>,
        get_body: Option<GetBody>,
    },
}

impl Body {
    /// Serializes `value` as a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self::Json(serde_json::to_vec(value)?.into()))
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Bytes(bytes.into())
    }

    pub fn stream(body: impl Into<reqwest::Body>) -> Self {
        Self::Stream {
            first: Some(body.into()),
            get_body: None,
        }
    }

    /// Streams the chunks yielded by `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures_util::TryStream + Send + 'static,
        S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
        Bytes: From<S::Ok>,
    {
        Self::stream(reqwest::Body::wrap_stream(stream))
    }

    /// Streams everything read from `reader`.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::from_stream(ReaderStream::new(reader))
    }

    /// Attaches a factory that regenerates a streaming body for retries.
    /// Has no effect on in-memory bodies, which replay anyway.
    #[must_use]
    pub fn with_get_body<F>(self, get_body: F) -> Self
    where
        F: Fn() -> Result<reqwest::Body, Error> + Send + Sync + 'static,
    {
        match self {
            Self::Stream { first, .. } => Self::Stream {
                first,
                get_body: Some(Arc::new(get_body)),
            },
            other => other,
        }
    }

    /// Returns `true` if the body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        match self {
            Self::Empty | Self::Json(_) | Self::Bytes(_) => true,
            Self::Stream { get_body, .. } => get_body.is_some(),
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Json(_) => Some(CONTENT_TYPE_JSON),
            Self::Bytes(_) | Self::Stream { .. } => Some(CONTENT_TYPE_OCTET_STREAM),
        }
    }

    /// The body to send on the given attempt.
    fn for_attempt(&mut self) -> Result<Option<reqwest::Body>, Error> {
        match self {
            Self::Empty => Ok(None),
            Self::Json(bytes) | Self::Bytes(bytes) => Ok(Some(bytes.clone().into())),
            Self::Stream { first, get_body } => match (first.take(), get_body) {
                (Some(body), _) => Ok(Some(body)),
                (None, Some(get_body)) => get_body().map(Some),
                (None, None) => Err(Error::Io(std::io::Error::other(
                    "streaming body already consumed",
                ))),
            },
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Json(b) => f.debug_tuple("Json").field(&b.len()).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Stream { get_body, .. } => f
                .debug_struct("Stream")
                .field("replayable", &get_body.is_some())
                .finish(),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v.into())
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Bytes(s.into())
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<EncodedStream> for Body {
    fn from(s: EncodedStream) -> Self {
        Self::stream(s.into_body())
    }
}

/// Where a successful response body goes.
pub enum ResultSink<'a, T> {
    /// JSON-decode into the value. An empty body leaves it untouched.
    Value(&'a mut T),
    /// Copy the raw bytes.
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
    /// Drop the body.
    Discard,
}

/// Envelope of a completed request.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Value of the `X-Axiom-Trace-Id` header.
    pub trace_id: Option<String>,
    /// Quota reported by the server, if any.
    pub limit: Option<Limit>,
    pub headers: HeaderMap,
}

/// Destination of a request.
#[derive(Debug, Clone)]
pub(crate) enum Target<'a> {
    /// A path relative to the base URL, or an absolute URL restricted to
    /// the ingest and query endpoints.
    Path(&'a str),
    /// A resolved edge endpoint.
    Edge(Url),
}

impl Client {
    /// Executes a request and fills `sink` with the response.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnprivilegedToken` without sending anything if an API
    /// token is used outside the ingest and query endpoints. Error statuses
    /// are returned as `Error::Http` or, for exhausted quotas, `Error::Limit`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Body,
        sink: ResultSink<'_, T>,
    ) -> Result<Response, Error> {
        self.execute(method, Target::Path(path), body, HeaderMap::new(), sink)
            .await
    }

    /// Like [`Client::call`], with `body` encoded as JSON.
    pub async fn call_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        sink: ResultSink<'_, T>,
    ) -> Result<Response, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(method, path, Body::json(body)?, sink).await
    }

    /// Calls `path` and decodes the JSON response.
    pub(crate) async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Body,
    ) -> Result<T, Error> {
        let mut out: Option<T> = None;
        self.call(method, path, body, ResultSink::Value(&mut out))
            .await?;
        out.ok_or_else(|| Error::Serialization(serde::de::Error::custom("empty response body")))
    }

    pub(crate) async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        target: Target<'_>,
        body: Body,
        headers: HeaderMap,
        sink: ResultSink<'_, T>,
    ) -> Result<Response, Error> {
        let url = self.resolve(target)?;
        let run = async {
            let deadline = self.inner.request_timeout.map(|t| Instant::now() + t);
            let resp = self.send(method, url, body, headers, deadline).await?;
            decode(resp, sink).await
        };
        match self.inner.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, run)
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => run.await,
        }
    }

    fn resolve(&self, target: Target<'_>) -> Result<Url, Error> {
        let config = &self.inner.config;
        match target {
            Target::Edge(url) => Ok(url),
            Target::Path(path) => match Url::parse(path) {
                Ok(url) => {
                    if !is_ingest_or_query_path(url.path()) {
                        return Err(Error::InvalidPath(path.to_string()));
                    }
                    Ok(url)
                }
                Err(_) => {
                    let path = path.trim_start_matches('/');
                    let path_only = path.split('?').next().unwrap_or_default();
                    if config.token_kind() == TokenKind::Api
                        && !is_ingest_or_query_path(path_only)
                    {
                        return Err(Error::UnprivilegedToken);
                    }
                    let base = config.base_url().as_str().trim_end_matches('/');
                    Ok(Url::parse(&format!("{base}/{path}"))?)
                }
            },
        }
    }

    fn default_headers(&self, body: &Body) -> Result<HeaderMap, Error> {
        let config = &self.inner.config;
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(CONTENT_TYPE_JSON));
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(config.user_agent())
                .map_err(|_| Error::InvalidHeader("user-agent"))?,
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token()))
            .map_err(|_| Error::InvalidHeader("authorization"))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        if let Some(content_type) = body.content_type() {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if let (TokenKind::Personal, Some(org_id)) = (config.token_kind(), config.org_id()) {
            headers.insert(
                HeaderName::from_static("x-axiom-org-id"),
                HeaderValue::from_str(org_id).map_err(|_| Error::InvalidHeader("x-axiom-org-id"))?,
            );
        }
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        mut body: Body,
        extra: HeaderMap,
        deadline: Option<Instant>,
    ) -> Result<reqwest::Response, Error> {
        let retry = &self.inner.retry;
        let max_attempts = retry.max_attempts.max(1);
        let replayable = body.is_replayable();

        let mut headers = self.default_headers(&body)?;
        headers.extend(extra);

        let mut attempt = 0;
        loop {
            let mut request = self
                .inner
                .http
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(b) = body.for_attempt()? {
                request = request.body(b);
            }

            tracing::debug!(%method, url = %url, attempt, "sending request");
            let result = request.send().await;
            attempt += 1;

            let retryable = match &result {
                Ok(resp) => resp.status().is_server_error(),
                Err(e) => is_transient(e),
            };
            if !retryable || !replayable || attempt >= max_attempts {
                return result.map_err(Error::from);
            }

            let wait = retry.backoff(attempt - 1);
            if deadline.is_some_and(|d| Instant::now() + wait >= d) {
                return result.map_err(Error::from);
            }
            match &result {
                Ok(resp) => tracing::warn!(
                    %method, url = %url, status = resp.status().as_u16(), attempt,
                    backoff_ms = wait.as_millis() as u64,
                    "server error, retrying request"
                ),
                Err(e) => tracing::warn!(
                    %method, url = %url, error = %e, attempt,
                    backoff_ms = wait.as_millis() as u64,
                    "network error, retrying request"
                ),
            }
            drop(result);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Failures worth another attempt: the connection could not be made, timed
/// out, or broke before a response status arrived (e.g. a reset peer).
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || (e.is_request() && e.status().is_none())
}

async fn decode<T: DeserializeOwned>(
    mut resp: reqwest::Response,
    sink: ResultSink<'_, T>,
) -> Result<Response, Error> {
    let headers = resp.headers().clone();
    let envelope = Response {
        status: resp.status().as_u16(),
        trace_id: headers
            .get(HEADER_TRACE_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        limit: parse_limit(&headers),
        headers,
    };

    if envelope.status >= 400 {
        return Err(error_from_response(resp, &envelope).await);
    }

    match sink {
        ResultSink::Value(value) => {
            let bytes = resp.bytes().await?;
            if !bytes.is_empty() {
                *value = serde_json::from_slice(&bytes)?;
            }
        }
        ResultSink::Writer(writer) => {
            while let Some(chunk) = resp.chunk().await? {
                writer.write_all(&chunk).await?;
            }
            writer.flush().await?;
        }
        ResultSink::Discard => {
            // Drain so the connection can be reused.
            let _ = resp.bytes().await;
        }
    }
    Ok(envelope)
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

async fn error_from_response(resp: reqwest::Response, envelope: &Response) -> Error {
    let status = envelope.status;
    let is_json = envelope
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(CONTENT_TYPE_JSON));
    let body = resp.bytes().await.unwrap_or_default();

    let message = if is_json {
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(parsed) if !parsed.message.is_empty() => parsed.message,
            _ => String::from_utf8_lossy(&body).trim().to_string(),
        }
    } else {
        String::new()
    };
    let message = if message.is_empty() {
        status_text(status)
    } else {
        message
    };
    tracing::debug!(status, %message, trace_id = ?envelope.trace_id, "server returned error");

    let trace_id = envelope.trace_id.clone();
    match status {
        401 | 403 | 404 | 409 => Error::Http(HttpError::new(status).with_trace_id(trace_id)),
        429 | 430 => {
            let http = HttpError::with_message(status, message).with_trace_id(trace_id);
            match envelope.limit.clone() {
                Some(limit) => Error::Limit(LimitError::new(http, limit)),
                None => Error::Http(http),
            }
        }
        _ => Error::Http(HttpError::with_message(status, message).with_trace_id(trace_id)),
    }
}

/// Returns `true` for the ingest and query endpoints an API token may call.
pub(crate) fn is_ingest_or_query_path(path: &str) -> bool {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    matches!(
        segments.as_slice(),
        ["v1", "datasets", "_apl"]
            | ["v1", "datasets", _, "ingest"]
            | ["v1", "datasets", _, "query"]
            | ["v1", "ingest", _]
            | ["v1", "query", "_apl"]
    )
}

/// Appends the fields of `params` to `path` as query parameters.
///
/// `params` must serialize to a JSON object. `null` fields are skipped,
/// arrays repeat the key and nested objects are sent as JSON strings.
pub fn add_query_params<T: Serialize + ?Sized>(path: &str, params: &T) -> Result<String, Error> {
    let Value::Object(map) = serde_json::to_value(params)? else {
        return Err(Error::Serialization(serde::ser::Error::custom(
            "query parameters must serialize to an object",
        )));
    };

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    query.append_pair(key, &query_value(item));
                }
            }
            other => {
                query.append_pair(key, &query_value(other));
            }
        }
    }
    let query = query.finish();
    if query.is_empty() {
        return Ok(path.to_string());
    }
    let sep = if path.contains('?') { '&' } else { '?' };
    Ok(format!("{path}{sep}{query}"))
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[test]
    fn api_token_paths() {
        assert!(is_ingest_or_query_path("/v1/datasets/test/ingest"));
        assert!(is_ingest_or_query_path("v1/datasets/_apl"));
        assert!(is_ingest_or_query_path("/v1/datasets/test/query"));
        assert!(is_ingest_or_query_path("/v1/ingest/test"));
        assert!(is_ingest_or_query_path("/v1/query/_apl"));
        assert!(!is_ingest_or_query_path("/v2/datasets"));
        assert!(!is_ingest_or_query_path("/v2/monitors"));
        assert!(!is_ingest_or_query_path("/v1/datasets/test/trim"));
    }

    #[test]
    fn query_params_are_appended() {
        #[derive(Serialize)]
        struct Params {
            #[serde(rename = "timestamp-field")]
            timestamp_field: Option<String>,
            #[serde(rename = "csv-delimiter")]
            csv_delimiter: Option<String>,
            tags: Vec<String>,
            limit: u32,
        }

        let path = add_query_params(
            "/v1/datasets/test/ingest",
            &Params {
                timestamp_field: Some("ts".to_string()),
                csv_delimiter: None,
                tags: vec!["a".to_string(), "b c".to_string()],
                limit: 5,
            },
        )
        .unwrap();
        assert_eq!(
            path,
            "/v1/datasets/test/ingest?limit=5&tags=a&tags=b+c&timestamp-field=ts"
        );

        let path = add_query_params("/v1/datasets/_apl?format=tabular", &serde_json::json!({"x": true}))
            .unwrap();
        assert_eq!(path, "/v1/datasets/_apl?format=tabular&x=true");
    }

    #[test]
    fn empty_query_params_leave_path_alone() {
        let path = add_query_params("/v2/datasets", &serde_json::json!({"cursor": null})).unwrap();
        assert_eq!(path, "/v2/datasets");
        assert!(add_query_params("/v2/datasets", &[1, 2]).is_err());
    }

    #[test]
    fn backoff_is_bounded() {
        let policy = RetryPolicy::default();
        for retry in 0..40 {
            let wait = policy.backoff(retry);
            assert!(wait <= policy.max_backoff);
            assert!(wait >= policy.initial_backoff / 2);
        }
    }

    #[test]
    fn replayable_bodies() {
        assert!(Body::Empty.is_replayable());
        assert!(Body::json(&serde_json::json!({"a": 1})).unwrap().is_replayable());
        assert!(Body::from(b"raw".to_vec()).is_replayable());

        let once = Body::stream(reqwest::Body::from("x"));
        assert!(!once.is_replayable());
        let again = once.with_get_body(|| Ok(reqwest::Body::from("x")));
        assert!(again.is_replayable());
    }

    #[test]
    fn consumed_stream_without_factory_errors() {
        let mut body = Body::stream(reqwest::Body::from("x"));
        assert!(body.for_attempt().unwrap().is_some());
        assert!(body.for_attempt().is_err());
    }
}
