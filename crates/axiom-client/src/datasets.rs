//! Dataset operations.
//!
//! CRUD methods live here; ingest and query are implemented in
//! [`crate::ingest`] and [`crate::query`] on the same handle.

use crate::client::Client;
use crate::error::Error;
use crate::http::{Body, ResultSink};
use crate::trace::traced;
use axiom_types::{Dataset, DatasetCreateRequest, DatasetUpdateRequest, TrimRequest};
use reqwest::Method;
use std::time::Duration;

/// Dataset operations, borrowed from a [`Client`].
#[derive(Debug, Clone, Copy)]
pub struct Datasets<'a> {
    pub(crate) client: &'a Client,
}

impl<'a> Datasets<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<Dataset>, Error> {
        traced(
            tracing::info_span!("datasets.list"),
            self.client.fetch(Method::GET, "/v2/datasets", Body::Empty),
        )
        .await
    }

    /// Fetches one dataset. A missing dataset is `HttpError::not_found()`.
    pub async fn get(&self, dataset_id: &str) -> Result<Dataset, Error> {
        traced(
            tracing::info_span!("datasets.get", axiom.dataset_id = dataset_id),
            self.client.fetch(
                Method::GET,
                &format!("/v2/datasets/{dataset_id}"),
                Body::Empty,
            ),
        )
        .await
    }

    /// Creates a dataset. An existing one is `HttpError::exists()`.
    pub async fn create(&self, request: &DatasetCreateRequest) -> Result<Dataset, Error> {
        let span = tracing::info_span!("datasets.create", axiom.dataset_name = %request.name);
        traced(span, async {
            self.client
                .fetch(Method::POST, "/v2/datasets", Body::json(request)?)
                .await
        })
        .await
    }

    pub async fn update(
        &self,
        dataset_id: &str,
        request: &DatasetUpdateRequest,
    ) -> Result<Dataset, Error> {
        let span = tracing::info_span!("datasets.update", axiom.dataset_id = dataset_id);
        traced(span, async {
            self.client
                .fetch(
                    Method::PUT,
                    &format!("/v2/datasets/{dataset_id}"),
                    Body::json(request)?,
                )
                .await
        })
        .await
    }

    pub async fn delete(&self, dataset_id: &str) -> Result<(), Error> {
        let span = tracing::info_span!("datasets.delete", axiom.dataset_id = dataset_id);
        traced(span, async {
            self.client
                .call(
                    Method::DELETE,
                    &format!("/v2/datasets/{dataset_id}"),
                    Body::Empty,
                    ResultSink::<()>::Discard,
                )
                .await
                .map(|_| ())
        })
        .await
    }

    /// Deletes all blocks older than `max_age`.
    pub async fn trim(&self, dataset_id: &str, max_age: Duration) -> Result<(), Error> {
        let span = tracing::info_span!(
            "datasets.trim",
            axiom.dataset_id = dataset_id,
            axiom.max_age_secs = max_age.as_secs(),
        );
        let request = TrimRequest {
            max_duration: format!("{}s", max_age.as_secs()),
        };
        traced(span, async {
            self.client
                .call_json(
                    Method::POST,
                    &format!("/v2/datasets/{dataset_id}/trim"),
                    &request,
                    ResultSink::<()>::Discard,
                )
                .await
                .map(|_| ())
        })
        .await
    }
}
