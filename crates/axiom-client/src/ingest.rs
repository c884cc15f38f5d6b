//! Ingest pipeline.
//!
//! Three entry points on [`Datasets`]:
//!
//! - [`Datasets::ingest`] uploads a caller-supplied body as-is.
//! - [`Datasets::ingest_events`] encodes events as NDJSON, compresses them
//!   with zstd and uploads them in one request.
//! - [`Datasets::ingest_channel`] drains a channel, flushing a batch through
//!   `ingest_events` whenever it is full, the flush interval elapses or the
//!   channel closes. The statuses of all flushes are merged into one.
//!
//! When an edge endpoint is configured, ingest requests go there instead of
//! the base URL.

use crate::datasets::Datasets;
use crate::encoding::{encode_with, ContentEncoding, EncodedStream};
use crate::error::Error;
use crate::http::{
    add_query_params, Body, ResultSink, Target, CONTENT_TYPE_CSV, CONTENT_TYPE_JSON,
    CONTENT_TYPE_NDJSON,
};
use crate::trace::traced;
use axiom_types::IngestStatus;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

pub const HEADER_EVENT_LABELS: &str = "X-Axiom-Event-Labels";
pub const HEADER_CSV_FIELDS: &str = "X-Axiom-CSV-Fields";

/// Default number of events per channel flush.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default time between channel flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Format of an ingest payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentType {
    /// A JSON array of events.
    #[default]
    Json,
    /// One JSON event per line.
    NdJson,
    Csv,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => CONTENT_TYPE_JSON,
            Self::NdJson => CONTENT_TYPE_NDJSON,
            Self::Csv => CONTENT_TYPE_CSV,
        }
    }
}

/// Per-request ingest options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOptions {
    /// Field the server reads the event time from. The server default is
    /// `_time`.
    pub timestamp_field: Option<String>,
    /// Layout used to parse the timestamp field.
    pub timestamp_format: Option<String>,
    pub csv_delimiter: Option<String>,
    /// Labels the server attaches to every event of the request.
    pub event_labels: BTreeMap<String, Value>,
    /// Column names for headerless CSV.
    pub csv_fields: Vec<String>,
}

#[derive(Serialize)]
struct IngestParams<'a> {
    #[serde(rename = "timestamp-field")]
    timestamp_field: Option<&'a str>,
    #[serde(rename = "timestamp-format")]
    timestamp_format: Option<&'a str>,
    #[serde(rename = "csv-delimiter")]
    csv_delimiter: Option<&'a str>,
}

impl IngestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }

    #[must_use]
    pub fn csv_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.csv_delimiter = Some(delimiter.into());
        self
    }

    #[must_use]
    pub fn event_label(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event_labels.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn event_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.event_labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn csv_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.csv_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    fn params(&self) -> IngestParams<'_> {
        IngestParams {
            timestamp_field: self.timestamp_field.as_deref(),
            timestamp_format: self.timestamp_format.as_deref(),
            csv_delimiter: self.csv_delimiter.as_deref(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        if !self.event_labels.is_empty() {
            let labels = serde_json::to_string(&self.event_labels)?;
            headers.insert(
                HeaderName::from_static("x-axiom-event-labels"),
                HeaderValue::from_str(&labels)
                    .map_err(|_| Error::InvalidHeader("x-axiom-event-labels"))?,
            );
        }
        if !self.csv_fields.is_empty() {
            headers.insert(
                HeaderName::from_static("x-axiom-csv-fields"),
                HeaderValue::from_str(&self.csv_fields.join(","))
                    .map_err(|_| Error::InvalidHeader("x-axiom-csv-fields"))?,
            );
        }
        Ok(headers)
    }
}

/// Batching parameters of [`Datasets::ingest_channel_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Events per flush. Values below 1 are treated as 1.
    pub batch_size: usize,
    /// Longest time a partial batch waits before it is flushed. Values
    /// below 1 ms are treated as 1 ms.
    pub flush_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl ChannelOptions {
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }
}

impl Datasets<'_> {
    /// Uploads `body` to the dataset without touching it.
    ///
    /// `content_type` and `content_encoding` describe the payload as it is;
    /// use [`crate::encoding::encode`] to compress on the fly.
    pub async fn ingest(
        &self,
        dataset_id: &str,
        body: impl Into<Body>,
        content_type: ContentType,
        content_encoding: ContentEncoding,
        options: &IngestOptions,
    ) -> Result<IngestStatus, Error> {
        let span = tracing::info_span!(
            "datasets.ingest",
            axiom.dataset_id = dataset_id,
            axiom.content_type = content_type.as_str(),
            axiom.content_encoding = content_encoding.as_header().unwrap_or("identity"),
        );
        traced(
            span,
            self.send_ingest(dataset_id, body.into(), content_type, content_encoding, options),
        )
        .await
    }

    /// Ingests `events` as one zstd-compressed NDJSON request.
    ///
    /// No request is made for an empty sequence. If the request is retried
    /// the body is re-encoded from the events.
    pub async fn ingest_events<E, I>(
        &self,
        dataset_id: &str,
        events: I,
        options: &IngestOptions,
    ) -> Result<IngestStatus, Error>
    where
        I: IntoIterator<Item = E>,
        E: Serialize + Send + Sync + 'static,
    {
        let events: Vec<E> = events.into_iter().collect();
        if events.is_empty() {
            return Ok(IngestStatus::default());
        }
        let span = tracing::info_span!(
            "datasets.ingest_events",
            axiom.dataset_id = dataset_id,
            axiom.events = events.len(),
        );
        traced(span, self.send_events(dataset_id, Arc::new(events), options)).await
    }

    /// Ingests everything received on `events` until the channel closes,
    /// using [`ChannelOptions::default`].
    pub async fn ingest_channel<E>(
        &self,
        dataset_id: &str,
        events: mpsc::Receiver<E>,
        options: &IngestOptions,
    ) -> Result<IngestStatus, Error>
    where
        E: Serialize + Send + Sync + 'static,
    {
        self.ingest_channel_with(
            dataset_id,
            events,
            ChannelOptions::default(),
            options,
            CancellationToken::new(),
        )
        .await
    }

    /// Ingests everything received on `events` until the channel closes or
    /// `cancel` fires.
    ///
    /// A batch is flushed when it reaches `batch_size` events, when
    /// `flush_interval` has passed since the last flush and the batch is not
    /// empty, and when the channel closes. Batches are sent one at a time in
    /// the order they fill up; while a flush is in flight nothing is read
    /// from the channel, so a bounded channel pushes back on producers.
    ///
    /// # Errors
    ///
    /// The first failed flush ends the loop, and cancellation aborts it
    /// along with any in-flight flush. Either way the result is
    /// [`Error::IngestStopped`], carrying the merged status of the flushes
    /// that completed and the underlying error (`Error::Cancelled` on
    /// cancellation). Every received event that was not acknowledged is
    /// counted as failed in that status.
    pub async fn ingest_channel_with<E>(
        &self,
        dataset_id: &str,
        mut events: mpsc::Receiver<E>,
        channel: ChannelOptions,
        options: &IngestOptions,
        cancel: CancellationToken,
    ) -> Result<IngestStatus, Error>
    where
        E: Serialize + Send + Sync + 'static,
    {
        let span = tracing::info_span!(
            "datasets.ingest_channel",
            axiom.dataset_id = dataset_id,
            axiom.batch_size = channel.batch_size,
        );
        traced(span, async move {
            let batch_size = channel.batch_size.max(1);
            let period = channel.flush_interval.max(Duration::from_millis(1));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut batch = Vec::with_capacity(batch_size);
            let mut total = IngestStatus::default();
            let mut flushes = 0u64;

            loop {
                let flush = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(stopped(total, batch.len(), Error::Cancelled));
                    }
                    event = events.recv() => match event {
                        Some(event) => {
                            batch.push(event);
                            batch.len() >= batch_size
                        }
                        None => break,
                    },
                    _ = ticker.tick() => !batch.is_empty(),
                };
                if !flush {
                    continue;
                }

                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                let sent = full.len();
                match self.flush(dataset_id, full, options, &cancel).await {
                    Ok(status) => total.add(status),
                    Err(e) => return Err(stopped(total, sent, e)),
                }
                flushes += 1;
                ticker.reset();
            }

            if !batch.is_empty() {
                let sent = batch.len();
                match self.flush(dataset_id, batch, options, &cancel).await {
                    Ok(status) => total.add(status),
                    Err(e) => return Err(stopped(total, sent, e)),
                }
                flushes += 1;
            }

            tracing::debug!(
                flushes,
                ingested = total.ingested,
                failed = total.failed,
                "ingest channel closed"
            );
            Ok(total)
        })
        .await
    }

    async fn flush<E>(
        &self,
        dataset_id: &str,
        batch: Vec<E>,
        options: &IngestOptions,
        cancel: &CancellationToken,
    ) -> Result<IngestStatus, Error>
    where
        E: Serialize + Send + Sync + 'static,
    {
        tracing::debug!(events = batch.len(), "flushing ingest batch");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            status = self.send_events(dataset_id, Arc::new(batch), options) => status,
        }
    }

    async fn send_events<E>(
        &self,
        dataset_id: &str,
        events: Arc<Vec<E>>,
        options: &IngestOptions,
    ) -> Result<IngestStatus, Error>
    where
        E: Serialize + Send + Sync + 'static,
    {
        let body = Body::from(ndjson_zstd(Arc::clone(&events)))
            .with_get_body(move || Ok(ndjson_zstd(Arc::clone(&events)).into_body()));
        self.send_ingest(
            dataset_id,
            body,
            ContentType::NdJson,
            ContentEncoding::Zstd,
            options,
        )
        .await
    }

    async fn send_ingest(
        &self,
        dataset_id: &str,
        body: Body,
        content_type: ContentType,
        content_encoding: ContentEncoding,
        options: &IngestOptions,
    ) -> Result<IngestStatus, Error> {
        let mut headers = options.headers()?;
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type.as_str()),
        );
        if let Some(encoding) = content_encoding.as_header() {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }

        let params = options.params();
        let path = add_query_params(&format!("/v1/datasets/{dataset_id}/ingest"), &params)?;
        let target = match self.client.config().edge_url() {
            Some(edge) => {
                let url = edge_ingest_url(edge, dataset_id)?;
                Target::Edge(Url::parse(&add_query_params(url.as_str(), &params)?)?)
            }
            None => Target::Path(&path),
        };

        let mut status = IngestStatus::default();
        let response = self
            .client
            .execute(
                Method::POST,
                target,
                body,
                headers,
                ResultSink::Value(&mut status),
            )
            .await?;
        status.trace_id = response.trace_id;

        if status.is_partial() {
            tracing::warn!(
                dataset_id,
                ingested = status.ingested,
                failed = status.failed,
                trace_id = ?status.trace_id,
                "some events were rejected"
            );
        }
        Ok(status)
    }
}

/// Ends a channel ingest early, counting `unsent` received events as failed.
fn stopped(mut status: IngestStatus, unsent: usize, source: Error) -> Error {
    status.failed += unsent as u64;
    tracing::warn!(
        ingested = status.ingested,
        failed = status.failed,
        unsent,
        "ingest channel stopped early"
    );
    Error::IngestStopped {
        status: Box::new(status),
        source: Box::new(source),
    }
}

/// Resolves the edge ingest URL: a URL with a path is used verbatim, a bare
/// host gets `/v1/ingest/{dataset}`.
pub(crate) fn edge_ingest_url(edge: &Url, dataset_id: &str) -> Result<Url, Error> {
    if edge.path().trim_matches('/').is_empty() {
        Ok(edge.join(&format!("/v1/ingest/{dataset_id}"))?)
    } else {
        Ok(edge.clone())
    }
}

fn ndjson_zstd<E>(events: Arc<Vec<E>>) -> EncodedStream
where
    E: Serialize + Send + Sync + 'static,
{
    encode_with(ContentEncoding::Zstd, move |w| write_ndjson(w, &events))
}

fn write_ndjson<E: Serialize>(w: &mut dyn Write, events: &[E]) -> io::Result<()> {
    for event in events {
        serde_json::to_writer(&mut *w, event)?;
        w.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edge_url_with_path_is_verbatim() {
        let edge = Url::parse("https://custom-edge.example.com/v1/ingest/logs").unwrap();
        assert_eq!(
            edge_ingest_url(&edge, "ignored").unwrap().as_str(),
            "https://custom-edge.example.com/v1/ingest/logs"
        );

        let edge = Url::parse("https://eu-central-1.aws.edge.axiom.co").unwrap();
        assert_eq!(
            edge_ingest_url(&edge, "logs").unwrap().as_str(),
            "https://eu-central-1.aws.edge.axiom.co/v1/ingest/logs"
        );
    }

    #[test]
    fn ndjson_has_one_event_per_line() {
        let mut out = Vec::new();
        write_ndjson(&mut out, &[json!({"a": 1}), json!({"b": "x\ny"})]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"a\":1}\n{\"b\":\"x\\ny\"}\n");
    }

    #[test]
    fn options_map_to_headers_and_params() {
        let options = IngestOptions::new()
            .timestamp_field("ts")
            .csv_delimiter(";")
            .event_label("env", "prod")
            .event_label("replica", 3)
            .csv_fields(["a", "b"]);

        let headers = options.headers().unwrap();
        assert_eq!(
            headers.get(HEADER_EVENT_LABELS).unwrap(),
            r#"{"env":"prod","replica":3}"#
        );
        assert_eq!(headers.get(HEADER_CSV_FIELDS).unwrap(), "a,b");

        let path = add_query_params("/v1/datasets/x/ingest", &options.params()).unwrap();
        assert_eq!(
            path,
            "/v1/datasets/x/ingest?csv-delimiter=%3B&timestamp-field=ts"
        );
    }

    #[test]
    fn default_options_add_nothing() {
        let options = IngestOptions::default();
        assert!(options.headers().unwrap().is_empty());
        let path = add_query_params("/v1/datasets/x/ingest", &options.params()).unwrap();
        assert_eq!(path, "/v1/datasets/x/ingest");
    }

    #[test]
    fn stopping_counts_unsent_events_as_failed() {
        let done = IngestStatus {
            ingested: 4,
            failed: 1,
            ..Default::default()
        };
        let err = stopped(done, 3, Error::Cancelled);
        let status = err.ingest_status().unwrap();
        assert_eq!(status.ingested, 4);
        assert_eq!(status.failed, 4);
        assert!(status.failures.is_empty());
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
    }

    #[test]
    fn content_types() {
        assert_eq!(ContentType::NdJson.as_str(), "application/x-ndjson");
        assert_eq!(ContentType::Csv.as_str(), "text/csv");
        assert_eq!(ContentType::default().as_str(), "application/json");
    }
}
