//! Error types for the Axiom client.

use axiom_types::{IngestStatus, Limit, LimitType};
use reqwest::StatusCode;
use std::time::Duration;

/// Errors returned by the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No token was configured or found in the environment.
    #[error("missing token")]
    MissingToken,

    /// A personal token targets the cloud endpoint without an organization ID.
    #[error("missing organization id")]
    MissingOrganizationId,

    /// A configured URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A configured value cannot be sent as an HTTP header.
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),

    /// An API token was used for a path it has no access to.
    #[error("using API token for non-ingest or non-query operation")]
    UnprivilegedToken,

    /// The request path is not allowed, e.g. an absolute URL outside the
    /// ingest and query endpoints.
    #[error("invalid request path: {0}")]
    InvalidPath(String),

    /// The server answered with an error status.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The server answered that a quota is exhausted.
    #[error(transparent)]
    Limit(#[from] LimitError),

    /// The request failed before a response arrived.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A request or response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading a request body or writing a response body failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured request timeout elapsed, including any retries.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A channel ingest stopped before its channel closed.
    ///
    /// `status` aggregates every flush the server answered. Events that were
    /// received but never acknowledged, because they were still buffered or
    /// their flush failed or was aborted, are counted in `status.failed`
    /// without a per-event entry in `status.failures`.
    #[error("ingest stopped after {} events: {source}", .status.ingested)]
    IngestStopped {
        status: Box<IngestStatus>,
        source: Box<Error>,
    },
}

/// Canonical classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid token, organization ID or URL.
    Configuration,
    /// API token used on a disallowed path.
    UnprivilegedToken,
    /// Transport failure or timeout before a response.
    Network,
    /// Any other non-success status.
    Http,
    /// 401: the token is invalid.
    Unauthenticated,
    /// 403: the token is valid but lacks permission.
    Unauthorized,
    /// 404: the resource does not exist.
    NotFound,
    /// 409: the resource already exists.
    Exists,
    /// 429: a per-scope rate limit is exhausted.
    RateLimited,
    /// 430: an ingest or query quota is exhausted.
    QuotaExceeded,
    /// Body encoding or decoding failed.
    Encoding,
    /// Cancelled by the caller.
    Cancelled,
}

impl Error {
    /// Returns the canonical kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingToken
            | Self::MissingOrganizationId
            | Self::InvalidUrl(_)
            | Self::InvalidHeader(_)
            | Self::InvalidPath(_) => ErrorKind::Configuration,
            Self::UnprivilegedToken => ErrorKind::UnprivilegedToken,
            Self::Http(e) => e.kind(),
            Self::Limit(e) => e.kind(),
            Self::Network(_) | Self::Timeout(_) => ErrorKind::Network,
            Self::Serialization(_) | Self::Io(_) => ErrorKind::Encoding,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::IngestStopped { source, .. } => source.kind(),
        }
    }

    /// Returns the HTTP status, if the server responded.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => Some(e.status),
            Self::Limit(e) => Some(e.http.status),
            Self::IngestStopped { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Returns the server trace ID, if the server responded with one.
    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Http(e) => e.trace_id.as_deref(),
            Self::Limit(e) => e.http.trace_id.as_deref(),
            Self::IngestStopped { source, .. } => source.trace_id(),
            _ => None,
        }
    }

    /// Returns the aggregated status of a channel ingest that stopped early.
    pub fn ingest_status(&self) -> Option<&IngestStatus> {
        match self {
            Self::IngestStopped { status, .. } => Some(status.as_ref()),
            _ => None,
        }
    }

    /// Returns the error that caused this one, unwrapping
    /// [`Error::IngestStopped`].
    pub fn cause(&self) -> &Error {
        match self {
            Self::IngestStopped { source, .. } => source.cause(),
            _ => self,
        }
    }
}

impl PartialEq<HttpError> for Error {
    fn eq(&self, other: &HttpError) -> bool {
        match self {
            Self::Http(e) => e == other,
            Self::Limit(e) => e.http == *other,
            Self::IngestStopped { source, .. } => **source == *other,
            _ => false,
        }
    }
}

/// An error status returned by the server.
///
/// Two `HttpError`s are equal iff their statuses and messages match; the
/// trace ID is ignored, so a returned error can be compared against the
/// sentinels such as [`HttpError::not_found`].
#[derive(Debug, Clone, Eq, thiserror::Error)]
#[error("API error {status}: {message}")]
pub struct HttpError {
    pub status: u16,
    pub message: String,
    pub trace_id: Option<String>,
}

impl PartialEq for HttpError {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status && self.message == other.message
    }
}

impl HttpError {
    /// Creates an error whose message is the canonical text of `status`.
    pub fn new(status: u16) -> Self {
        Self::with_message(status, status_text(status))
    }

    pub fn with_message(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            trace_id: None,
        }
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Sentinel for 401 responses.
    pub fn unauthenticated() -> Self {
        Self::new(401)
    }

    /// Sentinel for 403 responses.
    pub fn unauthorized() -> Self {
        Self::new(403)
    }

    /// Sentinel for 404 responses.
    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// Sentinel for 409 responses.
    pub fn exists() -> Self {
        Self::new(409)
    }

    pub fn kind(&self) -> ErrorKind {
        match self.status {
            401 => ErrorKind::Unauthenticated,
            403 => ErrorKind::Unauthorized,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Exists,
            429 => ErrorKind::RateLimited,
            430 => ErrorKind::QuotaExceeded,
            _ => ErrorKind::Http,
        }
    }
}

/// A quota exhaustion reported by the server (429 or 430).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} limit exceeded, try again in {}s", .limit.limit_type, .limit.until_reset().as_secs())]
pub struct LimitError {
    pub http: HttpError,
    pub limit: Limit,
}

impl LimitError {
    pub fn new(http: HttpError, limit: Limit) -> Self {
        Self { http, limit }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.limit.limit_type {
            LimitType::Rate => ErrorKind::RateLimited,
            LimitType::Ingest | LimitType::Query => ErrorKind::QuotaExceeded,
        }
    }
}

/// Canonical text for a status code, including the non-standard 430.
pub(crate) fn status_text(status: u16) -> String {
    if status == 430 {
        return "Quota Exceeded".to_string();
    }
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiom_types::LimitScope;
    use chrono::Utc;

    #[test]
    fn http_error_equality_ignores_trace_id() {
        let a = HttpError::not_found().with_trace_id(Some("abc".to_string()));
        let b = HttpError::not_found();
        assert_eq!(a, b);
        assert_ne!(a, HttpError::with_message(404, "dataset not found"));
        assert_ne!(a, HttpError::exists());
    }

    #[test]
    fn error_compares_against_sentinels() {
        let err = Error::Http(HttpError::unauthenticated().with_trace_id(Some("t".into())));
        assert!(err == HttpError::unauthenticated());
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert_eq!(err.trace_id(), Some("t"));
        assert_eq!(err.status(), Some(401));
        assert!(Error::UnprivilegedToken != HttpError::unauthorized());
    }

    #[test]
    fn status_kinds() {
        assert_eq!(HttpError::new(403).kind(), ErrorKind::Unauthorized);
        assert_eq!(HttpError::new(409).kind(), ErrorKind::Exists);
        assert_eq!(HttpError::new(500).kind(), ErrorKind::Http);
        assert_eq!(HttpError::new(500).message, "Internal Server Error");
        assert_eq!(HttpError::new(430).message, "Quota Exceeded");
    }

    #[test]
    fn limit_error_kind_follows_limit_class() {
        let limit = Limit {
            limit_type: LimitType::Query,
            scope: LimitScope::Unknown,
            limit: 10,
            remaining: 0,
            reset: Utc::now(),
        };
        let err = LimitError::new(HttpError::new(430), limit.clone());
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(err.to_string().starts_with("query limit exceeded"));

        let rate = Limit {
            limit_type: LimitType::Rate,
            ..limit
        };
        let err = Error::Limit(LimitError::new(HttpError::new(429), rate));
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn stopped_ingest_delegates_to_its_cause() {
        let status = IngestStatus {
            ingested: 2,
            failed: 2,
            ..Default::default()
        };
        let err = Error::IngestStopped {
            status: Box::new(status.clone()),
            source: Box::new(Error::Http(
                HttpError::new(500).with_trace_id(Some("t".into())),
            )),
        };
        assert_eq!(err.kind(), ErrorKind::Http);
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.trace_id(), Some("t"));
        assert!(err == HttpError::new(500));
        assert_eq!(err.ingest_status(), Some(&status));
        assert!(matches!(err.cause(), Error::Http(_)));
        assert_eq!(
            err.to_string(),
            "ingest stopped after 2 events: API error 500: Internal Server Error"
        );

        assert_eq!(Error::Cancelled.ingest_status(), None);
        assert!(matches!(Error::Cancelled.cause(), Error::Cancelled));
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert_eq!(Error::MissingToken.kind(), ErrorKind::Configuration);
        assert_eq!(Error::MissingOrganizationId.to_string(), "missing organization id");
        assert_eq!(Error::UnprivilegedToken.kind(), ErrorKind::UnprivilegedToken);
    }
}
