//! Tabular APL queries.

use crate::datasets::Datasets;
use crate::error::Error;
use crate::http::{Body, ResultSink, Target};
use crate::trace::traced;
use axiom_types::QueryResult;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value};

const QUERY_PATH: &str = "/v1/datasets/_apl?format=tabular";
const EDGE_QUERY_PATH: &str = "/v1/query/_apl?format=tabular";

/// Options of an APL query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Resume from this cursor of a previous result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Include the row at `cursor` in the result.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_cursor: bool,
    /// Values for query parameters declared in the APL.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>, include: bool) -> Self {
        self.cursor = Some(cursor.into());
        self.include_cursor = include;
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    apl: &'a str,
    #[serde(flatten)]
    options: &'a QueryOptions,
}

impl Datasets<'_> {
    /// Runs an APL query and returns the tabular result.
    pub async fn query(&self, apl: &str, options: &QueryOptions) -> Result<QueryResult, Error> {
        let span = tracing::info_span!("datasets.query", axiom.apl = apl);
        traced(span, async {
            let body = Body::json(&QueryRequest { apl, options })?;
            let target = match self.client.config().edge_url() {
                Some(edge) => Target::Edge(edge.join(EDGE_QUERY_PATH)?),
                None => Target::Path(QUERY_PATH),
            };

            let mut result = QueryResult::default();
            let response = self
                .client
                .execute(
                    Method::POST,
                    target,
                    body,
                    HeaderMap::new(),
                    ResultSink::Value(&mut result),
                )
                .await?;
            result.trace_id = response.trace_id;
            Ok(result)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_omits_unset_options() {
        let options = QueryOptions::new();
        let body = serde_json::to_value(QueryRequest {
            apl: "['logs'] | count",
            options: &options,
        })
        .unwrap();
        assert_eq!(body, json!({"apl": "['logs'] | count"}));
    }

    #[test]
    fn request_body_carries_range_cursor_and_variables() {
        let options = QueryOptions::new()
            .with_range(
                "2024-01-01T00:00:00Z".parse().unwrap(),
                "2024-01-02T00:00:00Z".parse().unwrap(),
            )
            .with_cursor("c1", true)
            .with_variable("host", "web-1");
        let body = serde_json::to_value(QueryRequest {
            apl: "x",
            options: &options,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "apl": "x",
                "startTime": "2024-01-01T00:00:00Z",
                "endTime": "2024-01-02T00:00:00Z",
                "cursor": "c1",
                "includeCursor": true,
                "variables": {"host": "web-1"},
            })
        );
    }
}
