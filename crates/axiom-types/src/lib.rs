//! Shared data model for the Axiom client crates.
//!
//! This crate carries the wire types exchanged with the Axiom API and
//! nothing else: no I/O, no HTTP. The transport and ingest pipeline live in
//! `axiom-client`, which re-exports everything defined here.
//!
//! | Module | Types |
//! |--------|-------|
//! | [`ingest`] | [`IngestStatus`], [`IngestFailure`] |
//! | [`limit`] | [`Limit`], [`LimitType`], [`LimitScope`] |
//! | [`query`] | [`QueryResult`], [`Table`], [`Rows`], [`Row`] |
//! | [`dataset`] | [`Dataset`] and its request bodies |
//! | [`user`] | [`User`] |

pub mod dataset;
pub mod ingest;
pub mod limit;
pub mod query;
pub mod user;

pub use dataset::{Dataset, DatasetCreateRequest, DatasetUpdateRequest, TrimRequest};
pub use ingest::{IngestFailure, IngestStatus};
pub use limit::{Limit, LimitScope, LimitType, ParseLimitScopeError};
pub use query::{
    Aggregation, Field, QueryResult, QueryStatus, Row, Rows, Source, Table, TimeRange,
};
pub use user::User;

/// A single event: a JSON document with no client-side schema.
pub type Event = serde_json::Map<String, serde_json::Value>;

/// Default name of the field the server reads the event timestamp from.
pub const TIMESTAMP_FIELD: &str = "_time";

/// Reserved field naming the source that produced an event.
pub const SOURCE_FIELD: &str = "_source";
