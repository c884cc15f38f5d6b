//! Parsing of quota headers.
//!
//! Every response may carry one of three header triplets. The class is
//! decided by the first populated triplet in the order ingest, query, rate;
//! callers rely on that order, so it must not change.

use axiom_types::{Limit, LimitScope, LimitType};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

pub const HEADER_INGEST_LIMIT: &str = "X-IngestLimit-Limit";
pub const HEADER_INGEST_REMAINING: &str = "X-IngestLimit-Remaining";
pub const HEADER_INGEST_RESET: &str = "X-IngestLimit-Reset";

pub const HEADER_QUERY_LIMIT: &str = "X-QueryLimit-Limit";
pub const HEADER_QUERY_REMAINING: &str = "X-QueryLimit-Remaining";
pub const HEADER_QUERY_RESET: &str = "X-QueryLimit-Reset";

pub const HEADER_RATE_SCOPE: &str = "X-RateLimit-Scope";
pub const HEADER_RATE_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATE_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RATE_RESET: &str = "X-RateLimit-Reset";

/// Extracts the limit carried by a response, if any.
pub fn parse_limit(headers: &HeaderMap) -> Option<Limit> {
    parse_triplet(
        headers,
        LimitType::Ingest,
        [HEADER_INGEST_LIMIT, HEADER_INGEST_REMAINING, HEADER_INGEST_RESET],
    )
    .or_else(|| {
        parse_triplet(
            headers,
            LimitType::Query,
            [HEADER_QUERY_LIMIT, HEADER_QUERY_REMAINING, HEADER_QUERY_RESET],
        )
    })
    .or_else(|| {
        parse_triplet(
            headers,
            LimitType::Rate,
            [HEADER_RATE_LIMIT, HEADER_RATE_REMAINING, HEADER_RATE_RESET],
        )
        .map(|mut limit| {
            limit.scope = header_str(headers, HEADER_RATE_SCOPE)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            limit
        })
    })
}

fn parse_triplet(
    headers: &HeaderMap,
    limit_type: LimitType,
    [limit, remaining, reset]: [&str; 3],
) -> Option<Limit> {
    let limit = header_str(headers, limit)?.parse().ok()?;
    let remaining = header_str(headers, remaining)?.parse().ok()?;
    let reset: i64 = header_str(headers, reset)?.parse().ok()?;
    Some(Limit {
        limit_type,
        scope: LimitScope::Unknown,
        limit,
        remaining,
        reset: DateTime::<Utc>::from_timestamp(reset, 0)?,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
