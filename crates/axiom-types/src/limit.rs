//! Quota descriptors reported by the server on every response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The class of a [`Limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// Ingest volume quota.
    Ingest,
    /// Query volume quota.
    Query,
    /// Request rate limit.
    Rate,
}

impl LimitType {
    /// Returns the canonical label for this limit class.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Query => "query",
            Self::Rate => "rate",
        }
    }
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The scope a rate limit applies to.
///
/// Ingest and query limits carry no scope and use [`LimitScope::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    #[default]
    Unknown,
    /// Limited per authenticated user.
    User,
    /// Limited per organization.
    Organization,
    /// Limited per unauthenticated caller.
    Anonymous,
}

impl LimitScope {
    /// Returns the label used in the `X-RateLimit-Scope` header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::User => "user",
            Self::Organization => "organization",
            Self::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LimitScope {
    type Err = ParseLimitScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Unknown),
            "user" => Ok(Self::User),
            "organization" => Ok(Self::Organization),
            "anonymous" => Ok(Self::Anonymous),
            _ => Err(ParseLimitScopeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown limit scope string.
#[derive(Debug, Clone)]
pub struct ParseLimitScopeError(pub String);

impl std::fmt::Display for ParseLimitScopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown limit scope: {}", self.0)
    }
}

impl std::error::Error for ParseLimitScopeError {}

/// A quota descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Which quota this describes.
    pub limit_type: LimitType,
    /// Who the quota applies to. Only set for rate limits.
    pub scope: LimitScope,
    /// Maximum allowed within the current window.
    pub limit: u64,
    /// Remaining within the current window.
    pub remaining: u64,
    /// When the current window ends.
    pub reset: DateTime<Utc>,
}

impl Limit {
    /// Time left until the limit resets, zero if the reset is in the past.
    pub fn until_reset(&self) -> Duration {
        (self.reset - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns `true` if nothing remains in the current window.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scope == LimitScope::Unknown {
            write!(f, "{} limit {}/{}", self.limit_type, self.remaining, self.limit)
        } else {
            write!(
                f,
                "{} limit {}/{} ({})",
                self.limit_type, self.remaining, self.limit, self.scope
            )
        }
    }
}
