//! Client for the Axiom API.
//!
//! The crate is built around two pieces: an HTTP transport
//! ([`Client::call`]) that authenticates, retries and decodes every request,
//! and an ingest pipeline ([`Datasets::ingest_events`],
//! [`Datasets::ingest_channel`]) that turns events into zstd-compressed
//! NDJSON uploads. Dataset and user operations are thin wrappers over the
//! transport.
//!
//! ```no_run
//! # async fn run() -> Result<(), axiom_client::Error> {
//! use axiom_client::{Client, IngestOptions};
//! use serde_json::json;
//!
//! let client = Client::builder().with_token("xaat-...").build()?;
//! let status = client
//!     .datasets()
//!     .ingest_events("logs", [json!({"level": "info"})], &IngestOptions::default())
//!     .await?;
//! println!("ingested {} events", status.ingested);
//! # Ok(())
//! # }
//! ```
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | [`ClientBuilder`], [`Config`], environment resolution |
//! | [`http`] | [`Body`], [`ResultSink`], [`Response`], [`RetryPolicy`] |
//! | [`encoding`] | gzip and zstd request body compression |
//! | [`ingest`] | ingest options and the channel flush loop |
//! | [`query`] | APL queries |
//! | [`limit`] | quota header parsing |
//! | [`trace`] | span helper for façade calls |

pub mod client;
pub mod config;
pub mod datasets;
pub mod encoding;
pub mod error;
pub mod http;
pub mod ingest;
pub mod limit;
pub mod query;
pub mod trace;
pub mod users;

pub use axiom_types::*;
pub use client::Client;
pub use config::{ClientBuilder, Config, TokenKind, CLOUD_URL, ENV_DATASET};
pub use datasets::Datasets;
pub use encoding::ContentEncoding;
pub use error::{Error, ErrorKind, HttpError, LimitError};
pub use http::{add_query_params, Body, Method, ResultSink, Response, RetryPolicy};
pub use ingest::{ChannelOptions, ContentType, IngestOptions};
pub use query::QueryOptions;
pub use tokio_util::sync::CancellationToken;
pub use users::Users;
